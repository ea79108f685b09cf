//! Clock and event-sink contracts.

use std::sync::Arc;

use participant_api::Timestamp;

/// Kind of a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockKind {
    /// Time advances steadily between reads.
    Continuous,
    /// Time only changes through explicit update calls.
    Discrete,
}

impl ClockKind {
    /// Numeric id used on the remote query surface.
    pub fn as_wire_id(self) -> i64 {
        match self {
            ClockKind::Continuous => 0,
            ClockKind::Discrete => 1,
        }
    }

    pub fn from_wire_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(ClockKind::Continuous),
            1 => Some(ClockKind::Discrete),
            _ => None,
        }
    }
}

/// Receiver of time events, notified synchronously on the thread that changed
/// the time.
///
/// Continuous clocks only ever emit the two reset events. Discrete clocks may
/// emit all five; whether an update carries the begin/end bracket is decided
/// by the updater.
pub trait EventSink: Send + Sync {
    /// Sent before a discrete time update; the clock still reads `old_time`.
    fn time_update_begin(&self, old_time: Timestamp, new_time: Timestamp);
    /// Sent while a discrete time update is taking effect.
    fn time_updating(&self, new_time: Timestamp);
    /// Sent after a discrete time update; the clock now reads `new_time`.
    fn time_update_end(&self, new_time: Timestamp);
    /// Sent before any time jump, forward or backward; the clock still reads
    /// `old_time`.
    fn time_reset_begin(&self, old_time: Timestamp, new_time: Timestamp);
    /// Sent after a time jump took effect.
    fn time_reset_end(&self, new_time: Timestamp);
}

/// A named time source.
pub trait Clock: Send + Sync {
    /// Stable identity; used as the registration key.
    fn name(&self) -> &str;
    fn kind(&self) -> ClockKind;
    /// Current time in microseconds.
    fn time(&self) -> Timestamp;
    /// Jumps the clock back to its origin, sending the reset event pair.
    fn reset(&self);
    /// Starts the clock; all events go to `sink` until [`Clock::stop`].
    fn start(&self, sink: Arc<dyn EventSink>);
    fn stop(&self);
}
