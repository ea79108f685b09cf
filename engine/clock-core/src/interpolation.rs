//! Present-time estimation from a remote reference timestamp.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use participant_api::Timestamp;

/// Microseconds on a process-wide monotonic axis.
pub fn monotonic_micros() -> Timestamp {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as Timestamp
}

/// Extrapolates a remote clock between reference refreshes.
///
/// Each refresh carries the remote timestamp plus the measured round trip of
/// the request; half the round trip is assumed to have passed since the
/// remote clock was read. Between refreshes [`InterpolationTime::get_time`]
/// advances the estimate along the local monotonic axis, clamped so that it
/// never returns less than its own previous return value.
///
/// All fields are individual atomics so concurrent readers never take a lock.
pub struct InterpolationTime {
    last_raw_time: AtomicI64,
    offset: AtomicI64,
    last_interpolated: AtomicI64,
}

impl Default for InterpolationTime {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpolationTime {
    pub fn new() -> Self {
        Self {
            last_raw_time: AtomicI64::new(0),
            offset: AtomicI64::new(0),
            last_interpolated: AtomicI64::new(0),
        }
    }

    /// Feeds a fresh reference sample.
    ///
    /// A reference older than the previous one means the remote clock jumped
    /// backward; that becomes a hard reset instead of a refresh.
    pub fn set_time(&self, reference_time: Timestamp, roundtrip_time: Timestamp) {
        if reference_time < self.last_raw_time.load(Ordering::SeqCst) {
            self.reset_time(reference_time);
            return;
        }
        self.last_raw_time.store(reference_time, Ordering::SeqCst);
        let adjusted = reference_time + roundtrip_time / 2;
        self.offset.store(monotonic_micros() - adjusted, Ordering::SeqCst);
    }

    /// Hard-resets the estimate to `new_time` and returns it.
    pub fn reset_time(&self, new_time: Timestamp) -> Timestamp {
        self.last_raw_time.store(new_time, Ordering::SeqCst);
        self.offset.store(monotonic_micros() - new_time, Ordering::SeqCst);
        self.last_interpolated.store(new_time, Ordering::SeqCst);
        new_time
    }

    /// Current extrapolated time; never goes backward between calls.
    pub fn get_time(&self) -> Timestamp {
        let estimate = monotonic_micros() - self.offset.load(Ordering::SeqCst);
        let mut previous = self.last_interpolated.load(Ordering::SeqCst);
        loop {
            if estimate <= previous {
                return previous;
            }
            match self.last_interpolated.compare_exchange(
                previous,
                estimate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return estimate,
                Err(current) => previous = current,
            }
        }
    }
}
