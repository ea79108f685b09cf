//! Built-in clocks.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use participant_api::Timestamp;

use crate::clock::{Clock, ClockKind, EventSink};
use crate::driver::{ContinuousDriver, DiscreteDriver, TimeSource};

/// Name of the built-in continuous wall-time clock.
pub const CLOCK_LOCAL_SYSTEM_REAL_TIME: &str = "local_system_realtime";
/// Name of the built-in discrete stepped simulation-time clock.
pub const CLOCK_LOCAL_SYSTEM_SIM_TIME: &str = "local_system_simtime";

struct MonotonicSource {
    epoch: Mutex<Instant>,
}

impl MonotonicSource {
    fn new() -> Self {
        Self { epoch: Mutex::new(Instant::now()) }
    }
}

impl TimeSource for MonotonicSource {
    fn now(&self) -> Timestamp {
        self.epoch.lock().elapsed().as_micros() as Timestamp
    }

    fn reset(&self) -> Timestamp {
        *self.epoch.lock() = Instant::now();
        0
    }
}

/// Continuous clock reporting elapsed wall time since its last reset.
pub struct SystemRealClock {
    driver: ContinuousDriver<MonotonicSource>,
}

impl Default for SystemRealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRealClock {
    pub fn new() -> Self {
        Self { driver: ContinuousDriver::new(MonotonicSource::new()) }
    }
}

impl Clock for SystemRealClock {
    fn name(&self) -> &str {
        CLOCK_LOCAL_SYSTEM_REAL_TIME
    }

    fn kind(&self) -> ClockKind {
        ClockKind::Continuous
    }

    fn time(&self) -> Timestamp {
        self.driver.time()
    }

    fn reset(&self) {
        self.driver.reset();
    }

    fn start(&self, sink: Arc<dyn EventSink>) {
        self.driver.start(sink);
    }

    fn stop(&self) {
        self.driver.stop();
    }
}

struct StepShared {
    cycle_time_us: AtomicI64,
    time_factor_bits: AtomicU64,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StepShared {
    fn cycle_time_us(&self) -> Timestamp {
        self.cycle_time_us.load(Ordering::SeqCst)
    }

    fn time_factor(&self) -> f64 {
        f64::from_bits(self.time_factor_bits.load(Ordering::SeqCst))
    }
}

/// Discrete clock advancing in fixed steps driven by a worker thread.
///
/// Each step adds `cycle_time` of simulation time; the worker sleeps
/// `cycle_time / time_factor` of wall time in between. A time factor of 0.0
/// steps without any delay.
pub struct SimStepClock {
    driver: Arc<DiscreteDriver>,
    shared: Arc<StepShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for SimStepClock {
    fn default() -> Self {
        Self::new(100, 1.0)
    }
}

impl SimStepClock {
    pub fn new(cycle_time_ms: i64, time_factor: f64) -> Self {
        Self {
            driver: Arc::new(DiscreteDriver::new()),
            shared: Arc::new(StepShared {
                cycle_time_us: AtomicI64::new(cycle_time_ms * 1_000),
                time_factor_bits: AtomicU64::new(time_factor.to_bits()),
                stopped: Mutex::new(true),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Applies a new step configuration. Takes effect on the next start.
    pub fn update_configuration(&self, cycle_time_ms: i64, time_factor: f64) {
        tracing::debug!(cycle_time_ms, time_factor, "simulation step clock reconfigured");
        self.shared.cycle_time_us.store(cycle_time_ms * 1_000, Ordering::SeqCst);
        self.shared.time_factor_bits.store(time_factor.to_bits(), Ordering::SeqCst);
    }

    fn run_stepper(driver: Arc<DiscreteDriver>, shared: Arc<StepShared>) {
        loop {
            let cycle_us = shared.cycle_time_us();
            let factor = shared.time_factor();
            let wait = if factor == 0.0 {
                Duration::ZERO
            } else {
                Duration::from_micros((cycle_us as f64 / factor) as u64)
            };

            {
                let mut stopped = shared.stopped.lock();
                if *stopped {
                    break;
                }
                if !wait.is_zero() {
                    shared.wake.wait_for(&mut stopped, wait);
                    if *stopped {
                        break;
                    }
                }
            }

            let next = driver.time() + cycle_us;
            driver.set_new_time(next, true);
        }
    }
}

impl Clock for SimStepClock {
    fn name(&self) -> &str {
        CLOCK_LOCAL_SYSTEM_SIM_TIME
    }

    fn kind(&self) -> ClockKind {
        ClockKind::Discrete
    }

    fn time(&self) -> Timestamp {
        self.driver.time()
    }

    fn reset(&self) {
        self.driver.reset();
    }

    fn start(&self, sink: Arc<dyn EventSink>) {
        self.stop();
        self.driver.start(sink);
        *self.shared.stopped.lock() = false;
        let driver = self.driver.clone();
        let shared = self.shared.clone();
        let handle = thread::spawn(move || Self::run_stepper(driver, shared));
        *self.worker.lock() = Some(handle);
    }

    fn stop(&self) {
        {
            let mut stopped = self.shared.stopped.lock();
            *stopped = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.driver.stop();
    }
}

impl Drop for SimStepClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct NullSink;

    impl EventSink for NullSink {
        fn time_update_begin(&self, _old_time: Timestamp, _new_time: Timestamp) {}
        fn time_updating(&self, _new_time: Timestamp) {}
        fn time_update_end(&self, _new_time: Timestamp) {}
        fn time_reset_begin(&self, _old_time: Timestamp, _new_time: Timestamp) {}
        fn time_reset_end(&self, _new_time: Timestamp) {}
    }

    #[derive(Default)]
    struct CountingSink {
        updates: Mutex<Vec<Timestamp>>,
    }

    impl EventSink for CountingSink {
        fn time_update_begin(&self, _old_time: Timestamp, _new_time: Timestamp) {}
        fn time_updating(&self, new_time: Timestamp) {
            self.updates.lock().push(new_time);
        }
        fn time_update_end(&self, _new_time: Timestamp) {}
        fn time_reset_begin(&self, _old_time: Timestamp, _new_time: Timestamp) {}
        fn time_reset_end(&self, _new_time: Timestamp) {}
    }

    #[test]
    fn real_clock_advances_and_restarts_at_zero() {
        let clock = SystemRealClock::new();
        clock.start(Arc::new(NullSink));
        let first = clock.time();
        std::thread::sleep(Duration::from_millis(5));
        let second = clock.time();
        assert!(second > first);
        clock.reset();
        assert!(clock.time() < second);
        clock.stop();
    }

    #[test]
    fn sim_clock_steps_approximately_real_time_at_factor_one() {
        // 100ms cycle at factor 1.0 reaches ~1s of simulation time after ~1s
        let clock = SimStepClock::new(100, 1.0);
        clock.start(Arc::new(NullSink));
        std::thread::sleep(Duration::from_millis(1_050));
        let elapsed = clock.time();
        clock.stop();
        assert!(
            (900_000..=1_200_000).contains(&elapsed),
            "expected roughly 1s of simulated time, got {elapsed}us"
        );
    }

    #[test]
    fn sim_clock_steps_are_cycle_multiples() {
        let clock = SimStepClock::new(10, 1.0);
        let sink = Arc::new(CountingSink::default());
        clock.start(sink.clone());
        std::thread::sleep(Duration::from_millis(100));
        clock.stop();

        let updates = sink.updates.lock();
        assert!(!updates.is_empty());
        for (i, time) in updates.iter().enumerate() {
            assert_eq!(*time, (i as Timestamp + 1) * 10_000);
        }
    }

    #[test]
    fn sim_clock_stop_halts_stepping() {
        let clock = SimStepClock::new(10, 1.0);
        clock.start(Arc::new(NullSink));
        std::thread::sleep(Duration::from_millis(50));
        clock.stop();
        let frozen = clock.time();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(clock.time(), frozen);
    }
}
