//! The timer engine sequencing job execution against clock events.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clock_core::{ClockKind, EventSink, Timestamp};
use clock_service::ClockService;
use parking_lot::{Condvar, Mutex};

use crate::error::SchedulerError;

/// Completion acknowledgment of one woken job invocation.
pub type CompletionSender = crossbeam_channel::Sender<()>;

/// The scheduler's view of one job timer.
pub trait SchedulerTimer: Send + Sync {
    /// Sets the execution time and wakes the timer. When `done` is given the
    /// timer sends on it once the invocation finished.
    fn wake_up(&self, wakeup_time: Timestamp, done: Option<CompletionSender>);
    /// Clears last-call bookkeeping after a backward time jump.
    fn reset(&self);
}

struct TimerEntry {
    timer: Arc<dyn SchedulerTimer>,
    next_instant: Timestamp,
    period: Timestamp,
}

// Bounded number of drain passes per wake, so bursty due timers cannot starve
// the resynchronization with the clock.
const MAX_DRAIN_PASSES: usize = 1000;
const IDLE_WAIT: Duration = Duration::from_millis(300);

/// Sorted-by-due-time timer engine with two drain protocols.
///
/// Discrete clocks drive the synchronous protocol: on every update or reset
/// event the due timers run strictly ordered by their next instant, each one
/// completing before the next starts. Continuous clocks are drained from the
/// scheduler's own processing thread, waking due timers without waiting for
/// completion.
pub struct TimerScheduler {
    clock: Arc<ClockService>,
    timers: Mutex<Vec<TimerEntry>>,
    // exclusivity between draining and the reset bracket; held across
    // time_reset_begin .. time_reset_end
    processing_busy: Mutex<bool>,
    processing_released: Condvar,
    trigger_lock: Mutex<()>,
    trigger_event: Condvar,
    cancelled: AtomicBool,
    started: AtomicBool,
    startup_reset_time: AtomicI64,
}

impl TimerScheduler {
    pub fn new(clock: Arc<ClockService>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            timers: Mutex::new(Vec::new()),
            processing_busy: Mutex::new(false),
            processing_released: Condvar::new(),
            trigger_lock: Mutex::new(()),
            trigger_event: Condvar::new(),
            cancelled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            startup_reset_time: AtomicI64::new(-1),
        })
    }

    /// Subscribes to the clock service's time events.
    pub fn register_with_clock(self: &Arc<Self>) {
        self.clock.register_event_sink(self.clone());
    }

    pub fn unregister_from_clock(self: &Arc<Self>) {
        let sink: Arc<dyn EventSink> = self.clone();
        self.clock.unregister_event_sink(&sink);
    }

    pub fn add_timer(
        &self,
        timer: Arc<dyn SchedulerTimer>,
        period: Timestamp,
        initial_delay: Timestamp,
    ) -> Result<(), SchedulerError> {
        {
            let mut timers = self.timers.lock();
            timers.push(TimerEntry { timer, next_instant: self.time() + initial_delay, period });
        }
        self.trigger_event.notify_all();
        Ok(())
    }

    pub fn remove_timer(&self, timer: &Arc<dyn SchedulerTimer>) -> Result<(), SchedulerError> {
        let mut timers = self.timers.lock();
        let before = timers.len();
        timers.retain(|entry| !Arc::ptr_eq(&entry.timer, timer));
        if timers.len() == before {
            return Err(SchedulerError::NotFound("timer".to_string()));
        }
        Ok(())
    }

    pub fn start(&self) -> Result<(), SchedulerError> {
        let pending_reset = self.startup_reset_time.load(Ordering::SeqCst);
        if pending_reset > -1 && self.clock_kind() == ClockKind::Discrete {
            // a reset arrived before start, replay the first step now
            self.process_queue_sync(pending_reset);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        self.startup_reset_time.store(-1, Ordering::SeqCst);
        self.trigger_event.notify_all();
    }

    fn time(&self) -> Timestamp {
        self.clock.time()
    }

    fn clock_kind(&self) -> ClockKind {
        self.clock.kind()
    }

    fn acquire_processing(&self) {
        let mut busy = self.processing_busy.lock();
        while *busy {
            self.processing_released.wait(&mut busy);
        }
        *busy = true;
    }

    fn release_processing(&self) {
        *self.processing_busy.lock() = false;
        self.processing_released.notify_one();
    }

    /// Lock-step drain: due timers run in next-instant order, each completing
    /// before the next one wakes. Returns the time to wait until the next
    /// timer is due, or -1 if the list is empty.
    fn process_queue_sync(&self, current: Timestamp) -> Timestamp {
        self.acquire_processing();

        // the asynchronous drain never sorts, so sort here first
        {
            let mut timers = self.timers.lock();
            timers.sort_by_key(|entry| entry.next_instant);
        }

        let mut time_to_wait = -1;
        loop {
            let timer;
            let call_time;
            {
                let mut timers = self.timers.lock();
                let Some(head) = timers.first() else { break };
                if head.next_instant != 0 && head.next_instant > current {
                    time_to_wait = head.next_instant - current;
                    break;
                }

                timer = head.timer.clone();
                call_time = head.next_instant;

                if head.period != 0 {
                    let mut entry = timers.remove(0);
                    entry.next_instant += entry.period;
                    // find the re-insertion slot, skipping entries that are
                    // already overdue so delayed one-shots still get a turn
                    let mut insert_at = timers.len();
                    for (index, other) in timers.iter().enumerate() {
                        if other.next_instant <= current {
                            continue;
                        }
                        if entry.next_instant < other.next_instant {
                            insert_at = index;
                            break;
                        }
                    }
                    timers.insert(insert_at, entry);
                } else {
                    timers.remove(0);
                }
            }

            let (done_tx, done_rx) = crossbeam_channel::bounded(1);
            timer.wake_up(call_time, Some(done_tx));
            let _ = done_rx.recv();
        }

        self.release_processing();
        time_to_wait
    }

    /// Free-running drain: wakes every due timer without waiting, reinserts
    /// periodic ones and computes the minimum wait until the next due time.
    fn process_queue_async(&self, current: Timestamp) -> Timestamp {
        self.acquire_processing();

        let mut min_wait: Timestamp = -1;
        let mut loop_again = true;
        let mut passes = 0;
        while loop_again && passes < MAX_DRAIN_PASSES {
            let mut timers = self.timers.lock();
            loop_again = false;
            let mut index = 0;
            while index < timers.len() {
                let due = {
                    let entry = &timers[index];
                    entry.next_instant == 0 || entry.next_instant <= current
                };
                if due {
                    timers[index].timer.wake_up(current, None);
                    if timers[index].period <= 0 {
                        timers.remove(index);
                    } else {
                        let period = timers[index].period;
                        timers[index].next_instant += period;
                        // a reinserted periodic timer may be due again
                        loop_again = true;
                        index += 1;
                    }
                } else {
                    let diff = timers[index].next_instant - current;
                    if min_wait < 0 || diff < min_wait {
                        min_wait = diff;
                    }
                    index += 1;
                }
            }
            passes += 1;
        }

        self.release_processing();

        if passes >= MAX_DRAIN_PASSES {
            // still work left, force a zero-wait yield and resample the clock
            0
        } else {
            min_wait
        }
    }

    /// The processing loop, run on the scheduler's own thread.
    pub fn execute(&self) -> Result<(), SchedulerError> {
        while !self.cancelled.load(Ordering::SeqCst) {
            let mut time_to_wait = -1;
            if self.clock_kind() == ClockKind::Continuous {
                time_to_wait = self.process_queue_async(self.time());
            }

            if time_to_wait < 0 {
                // nothing due, wait for an external trigger
                while !self.cancelled.load(Ordering::SeqCst) {
                    let mut guard = self.trigger_lock.lock();
                    let result = self.trigger_event.wait_for(&mut guard, IDLE_WAIT);
                    if !result.timed_out() {
                        break;
                    }
                }
            } else if time_to_wait / 1_000 == 0 {
                // below a millisecond, waiting is not worth it
                thread::yield_now();
            } else {
                let mut guard = self.trigger_lock.lock();
                self.trigger_event
                    .wait_for(&mut guard, Duration::from_micros(time_to_wait as u64));
            }
        }
        Ok(())
    }
}

impl EventSink for TimerScheduler {
    fn time_update_begin(&self, _old_time: Timestamp, _new_time: Timestamp) {}

    fn time_updating(&self, new_time: Timestamp) {
        if self.started.load(Ordering::SeqCst) {
            self.process_queue_sync(new_time);
        }
    }

    fn time_update_end(&self, _new_time: Timestamp) {}

    fn time_reset_begin(&self, old_time: Timestamp, new_time: Timestamp) {
        self.acquire_processing();

        if !self.started.load(Ordering::SeqCst) {
            self.startup_reset_time.store(new_time, Ordering::SeqCst);
        }

        let forward = old_time < new_time;
        let diff = (new_time - old_time).abs();
        {
            let mut timers = self.timers.lock();
            for entry in timers.iter_mut() {
                if forward {
                    // shift forward, preserving each timer's relative phase
                    entry.next_instant += diff;
                } else {
                    // shifting backward alone would make every timer overdue;
                    // clear their bookkeeping as well
                    entry.timer.reset();
                    entry.next_instant -= diff;
                }
            }
        }
        self.trigger_event.notify_all();
    }

    fn time_reset_end(&self, new_time: Timestamp) {
        self.release_processing();

        if self.started.load(Ordering::SeqCst) && self.clock_kind() == ClockKind::Discrete {
            self.process_queue_sync(new_time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use participant_api::{CollectingReporter, MemoryPropertyStore};

    struct RecordingTimer {
        tag: &'static str,
        log: Arc<Mutex<Vec<(&'static str, Timestamp)>>>,
        resets: AtomicI64,
    }

    impl RecordingTimer {
        fn new(tag: &'static str, log: Arc<Mutex<Vec<(&'static str, Timestamp)>>>) -> Arc<Self> {
            Arc::new(Self { tag, log, resets: AtomicI64::new(0) })
        }
    }

    impl SchedulerTimer for RecordingTimer {
        fn wake_up(&self, wakeup_time: Timestamp, done: Option<CompletionSender>) {
            self.log.lock().push((self.tag, wakeup_time));
            if let Some(done) = done {
                let _ = done.send(());
            }
        }
        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scheduler() -> Arc<TimerScheduler> {
        let clock = ClockService::new(
            Arc::new(MemoryPropertyStore::new()),
            Arc::new(CollectingReporter::new()),
        );
        TimerScheduler::new(clock)
    }

    #[test]
    fn sync_drain_runs_due_timers_in_next_instant_order() {
        let scheduler = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));

        // clock is stopped so instants count from 0; all three due at t=100
        let t10 = RecordingTimer::new("t10", log.clone());
        let t20 = RecordingTimer::new("t20", log.clone());
        let t30 = RecordingTimer::new("t30", log.clone());
        scheduler.add_timer(t10, 10, 100).unwrap();
        scheduler.add_timer(t20, 20, 100).unwrap();
        scheduler.add_timer(t30, 30, 100).unwrap();

        let wait = scheduler.process_queue_sync(100);

        // each ran exactly once at the common due time, in stable order
        assert_eq!(*log.lock(), vec![("t10", 100), ("t20", 100), ("t30", 100)]);
        // the earliest reinserted instant is 100 + 10
        assert_eq!(wait, 10);
    }

    #[test]
    fn sync_drain_waits_for_completion_between_timers() {
        struct BlockingTimer {
            running: Arc<AtomicBool>,
            overlap: Arc<AtomicBool>,
        }

        impl SchedulerTimer for BlockingTimer {
            fn wake_up(&self, _wakeup_time: Timestamp, done: Option<CompletionSender>) {
                if self.running.swap(true, Ordering::SeqCst) {
                    self.overlap.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(10));
                self.running.store(false, Ordering::SeqCst);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            fn reset(&self) {}
        }

        let scheduler = scheduler();
        let running = Arc::new(AtomicBool::new(false));
        let overlap = Arc::new(AtomicBool::new(false));
        for _ in 0..3 {
            scheduler
                .add_timer(
                    Arc::new(BlockingTimer { running: running.clone(), overlap: overlap.clone() }),
                    0, // one-shot
                    0,
                )
                .unwrap();
        }

        scheduler.process_queue_sync(100);
        assert!(!overlap.load(Ordering::SeqCst), "lock-step drain overlapped executions");
        assert!(scheduler.timers.lock().is_empty(), "one-shot timers must be removed");
    }

    #[test]
    fn async_drain_computes_min_wait_and_removes_one_shots() {
        let scheduler = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));

        let periodic = RecordingTimer::new("periodic", log.clone());
        let oneshot = RecordingTimer::new("oneshot", log.clone());
        {
            let mut timers = scheduler.timers.lock();
            timers.push(TimerEntry { timer: periodic, next_instant: 50, period: 100 });
            timers.push(TimerEntry { timer: oneshot, next_instant: 60, period: 0 });
        }

        // nothing due yet, the wait is until the earliest timer
        assert_eq!(scheduler.process_queue_async(10), 40);
        assert!(log.lock().is_empty());

        // both due; the periodic one is reinserted, the one-shot removed
        let wait = scheduler.process_queue_async(60);
        assert_eq!(log.lock().len(), 2);
        assert_eq!(scheduler.timers.lock().len(), 1);
        assert_eq!(wait, 90); // periodic reinserted at 150, drained at 60
    }

    #[test]
    fn forward_reset_shifts_timers_without_resetting_them() {
        let scheduler = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        let timer = RecordingTimer::new("t", log);
        scheduler.add_timer(timer.clone(), 100, 0).unwrap();

        scheduler.time_reset_begin(0, 1_000);
        scheduler.time_reset_end(1_000);

        assert_eq!(scheduler.timers.lock()[0].next_instant, 1_000);
        assert_eq!(timer.resets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backward_reset_rebases_and_resets_timers() {
        let scheduler = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        let timer = RecordingTimer::new("t", log.clone());
        {
            let mut timers = scheduler.timers.lock();
            timers.push(TimerEntry { timer: timer.clone(), next_instant: 10_000, period: 100 });
        }

        scheduler.time_reset_begin(10_000, 2_000);
        scheduler.time_reset_end(2_000);

        // shifted back by the jump size instead of appearing overdue
        assert_eq!(scheduler.timers.lock()[0].next_instant, 2_000);
        assert_eq!(timer.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_before_start_replays_on_start_for_discrete_clocks() {
        let properties = Arc::new(MemoryPropertyStore::new());
        let clock = ClockService::new(properties, Arc::new(CollectingReporter::new()));
        clock.set_main_clock(clock_core::CLOCK_LOCAL_SYSTEM_SIM_TIME).unwrap();
        let scheduler = TimerScheduler::new(clock);

        let log = Arc::new(Mutex::new(Vec::new()));
        let timer = RecordingTimer::new("t", log.clone());
        scheduler.add_timer(timer, 0, 0).unwrap();

        scheduler.time_reset_begin(0, 0);
        scheduler.time_reset_end(0);
        assert!(log.lock().is_empty(), "not started, nothing may run yet");

        scheduler.start().unwrap();
        assert_eq!(log.lock().len(), 1, "the pending reset replays on start");
    }

    #[test]
    fn remove_timer_rejects_unknown_entries() {
        let scheduler = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        let registered = RecordingTimer::new("registered", log.clone());
        let stranger = RecordingTimer::new("stranger", log);

        scheduler.add_timer(registered.clone(), 10, 0).unwrap();
        let registered: Arc<dyn SchedulerTimer> = registered;
        let stranger: Arc<dyn SchedulerTimer> = stranger;
        assert!(scheduler.remove_timer(&stranger).is_err());
        assert!(scheduler.remove_timer(&registered).is_ok());
    }
}
