//! Event-firing drivers backing concrete clocks.
//!
//! Clock implementations compose one of these drivers instead of re-deriving
//! the event rules. The drivers own the stored time, the started flag and the
//! sink handle, and encode the one correctness-critical branching: the first
//! observed value after start and any value below the stored one are resets
//! (bracketed on both sides), everything else on a discrete clock is an
//! update.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use participant_api::Timestamp;

use crate::clock::EventSink;

/// Type-specific time supply for a [`ContinuousDriver`].
pub trait TimeSource: Send + Sync {
    /// Samples the source.
    fn now(&self) -> Timestamp;
    /// Re-anchors the source and returns the time the clock restarts at.
    fn reset(&self) -> Timestamp;
}

struct DriverState {
    current_time: AtomicI64,
    updated: AtomicBool,
    started: AtomicBool,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

impl DriverState {
    fn new() -> Self {
        Self {
            current_time: AtomicI64::new(0),
            updated: AtomicBool::new(false),
            started: AtomicBool::new(false),
            sink: RwLock::new(None),
        }
    }

    fn fire_reset(&self, new_time: Timestamp) {
        let old_time = self.current_time.load(Ordering::SeqCst);
        let sink = self.sink.read().clone();
        if let Some(sink) = &sink {
            sink.time_reset_begin(old_time, new_time);
        }
        self.current_time.store(new_time, Ordering::SeqCst);
        if let Some(sink) = &sink {
            sink.time_reset_end(new_time);
        }
    }

    fn attach(&self, sink: Arc<dyn EventSink>) {
        self.updated.store(false, Ordering::SeqCst);
        *self.sink.write() = Some(sink);
        self.started.store(true, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.started.store(false, Ordering::SeqCst);
        *self.sink.write() = None;
        self.updated.store(false, Ordering::SeqCst);
    }
}

/// Driver for clocks whose time advances on its own.
///
/// Every read samples the [`TimeSource`] and folds the value through reset
/// detection, so a continuous clock can perform jump resets too.
pub struct ContinuousDriver<S> {
    source: S,
    state: DriverState,
}

impl<S: TimeSource> ContinuousDriver<S> {
    pub fn new(source: S) -> Self {
        Self { source, state: DriverState::new() }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn time(&self) -> Timestamp {
        self.observe(self.source.now());
        self.state.current_time.load(Ordering::SeqCst)
    }

    fn observe(&self, new_time: Timestamp) {
        let old_time = self.state.current_time.load(Ordering::SeqCst);
        if !self.state.updated.swap(true, Ordering::SeqCst) {
            // first observed value after start becomes the new baseline
            self.state.fire_reset(new_time);
        }
        if new_time < old_time {
            self.state.fire_reset(new_time);
        }
        self.state.current_time.store(new_time, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        let restart_time = self.source.reset();
        self.state.fire_reset(restart_time);
    }

    pub fn start(&self, sink: Arc<dyn EventSink>) {
        self.state.attach(sink);
        self.reset();
    }

    pub fn stop(&self) {
        self.state.detach();
    }

    pub fn is_started(&self) -> bool {
        self.state.started.load(Ordering::SeqCst)
    }
}

/// Driver for clocks whose time only moves on explicit update calls.
pub struct DiscreteDriver {
    state: DriverState,
}

impl Default for DiscreteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscreteDriver {
    pub fn new() -> Self {
        Self { state: DriverState::new() }
    }

    pub fn time(&self) -> Timestamp {
        self.state.current_time.load(Ordering::SeqCst)
    }

    /// Advances the stored time.
    ///
    /// The first update after start and any value below the stored time are
    /// delivered as resets. Otherwise the update fires `time_updating`,
    /// bracketed by begin/end only when `send_update_before_after` is set;
    /// a relay that already delivered the bracket passes `false` here to
    /// avoid double wrapping.
    pub fn set_new_time(&self, new_time: Timestamp, send_update_before_after: bool) {
        let old_time = self.state.current_time.load(Ordering::SeqCst);
        if !self.state.updated.swap(true, Ordering::SeqCst) {
            self.state.fire_reset(new_time);
        } else if new_time < old_time {
            self.state.fire_reset(new_time);
        } else {
            let sink = self.state.sink.read().clone();
            if send_update_before_after {
                if let Some(sink) = &sink {
                    sink.time_update_begin(old_time, new_time);
                }
            }
            self.state.current_time.store(new_time, Ordering::SeqCst);
            if let Some(sink) = &sink {
                sink.time_updating(new_time);
            }
            if send_update_before_after {
                if let Some(sink) = &sink {
                    sink.time_update_end(new_time);
                }
            }
        }
    }

    /// Jumps the stored time, always delivered as a reset pair.
    pub fn set_reset_time(&self, new_time: Timestamp) {
        self.state.fire_reset(new_time);
    }

    pub fn reset(&self) {
        self.state.updated.store(true, Ordering::SeqCst);
        self.state.fire_reset(0);
    }

    pub fn start(&self, sink: Arc<dyn EventSink>) {
        self.state.attach(sink);
        self.reset();
    }

    pub fn stop(&self) {
        self.state.detach();
    }

    pub fn is_started(&self) -> bool {
        self.state.started.load(Ordering::SeqCst)
    }

    /// Currently attached sink, if started.
    pub fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.state.sink.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl EventSink for RecordingSink {
        fn time_update_begin(&self, old_time: Timestamp, new_time: Timestamp) {
            self.events.lock().push(format!("update_begin {old_time} {new_time}"));
        }
        fn time_updating(&self, new_time: Timestamp) {
            self.events.lock().push(format!("updating {new_time}"));
        }
        fn time_update_end(&self, new_time: Timestamp) {
            self.events.lock().push(format!("update_end {new_time}"));
        }
        fn time_reset_begin(&self, old_time: Timestamp, new_time: Timestamp) {
            self.events.lock().push(format!("reset_begin {old_time} {new_time}"));
        }
        fn time_reset_end(&self, new_time: Timestamp) {
            self.events.lock().push(format!("reset_end {new_time}"));
        }
    }

    #[test]
    fn discrete_forward_update_fires_exact_triplet() {
        let driver = DiscreteDriver::new();
        let sink = Arc::new(RecordingSink::default());
        driver.start(sink.clone());
        sink.take(); // drop the start reset

        driver.set_new_time(100, true);
        assert_eq!(sink.take(), vec!["update_begin 0 100", "updating 100", "update_end 100"]);

        // equal timestamps still go through the update path
        driver.set_new_time(100, true);
        assert_eq!(sink.take(), vec!["update_begin 100 100", "updating 100", "update_end 100"]);
    }

    #[test]
    fn discrete_update_without_bracket() {
        let driver = DiscreteDriver::new();
        let sink = Arc::new(RecordingSink::default());
        driver.start(sink.clone());
        driver.set_new_time(50, true);
        sink.take();

        driver.set_new_time(70, false);
        assert_eq!(sink.take(), vec!["updating 70"]);
    }

    #[test]
    fn discrete_backward_update_is_a_reset() {
        let driver = DiscreteDriver::new();
        let sink = Arc::new(RecordingSink::default());
        driver.start(sink.clone());
        driver.set_new_time(500, true);
        sink.take();

        driver.set_new_time(20, true);
        assert_eq!(sink.take(), vec!["reset_begin 500 20", "reset_end 20"]);
        assert_eq!(driver.time(), 20);
    }

    #[test]
    fn discrete_start_resets_to_zero() {
        let driver = DiscreteDriver::new();
        let sink = Arc::new(RecordingSink::default());
        driver.start(sink.clone());
        assert_eq!(sink.take(), vec!["reset_begin 0 0", "reset_end 0"]);
        assert_eq!(driver.time(), 0);
    }

    #[test]
    fn discrete_explicit_jump_is_always_a_reset_pair() {
        let driver = DiscreteDriver::new();
        let sink = Arc::new(RecordingSink::default());
        driver.start(sink.clone());
        driver.set_new_time(100, true);
        sink.take();

        // forward jumps through the reset entry point still bracket both sides
        driver.set_reset_time(500);
        assert_eq!(sink.take(), vec!["reset_begin 100 500", "reset_end 500"]);
    }

    struct StepSource {
        values: Mutex<Vec<Timestamp>>,
    }

    impl TimeSource for StepSource {
        fn now(&self) -> Timestamp {
            self.values.lock().remove(0)
        }
        fn reset(&self) -> Timestamp {
            0
        }
    }

    #[test]
    fn continuous_backward_sample_fires_reset_pair() {
        let source = StepSource { values: Mutex::new(vec![10, 30, 5]) };
        let driver = ContinuousDriver::new(source);
        let sink = Arc::new(RecordingSink::default());
        driver.start(sink.clone());
        sink.take(); // start reset at 0

        assert_eq!(driver.time(), 10);
        // first sample after start re-baselines through a reset
        assert_eq!(sink.take(), vec!["reset_begin 0 10", "reset_end 10"]);

        assert_eq!(driver.time(), 30);
        assert!(sink.take().is_empty());

        assert_eq!(driver.time(), 5);
        assert_eq!(sink.take(), vec!["reset_begin 30 5", "reset_end 5"]);
    }
}
