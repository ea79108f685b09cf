//! # clock-core
//!
//! Clock abstraction for participant timing.
//!
//! A [`Clock`] is a named time source that is either continuous (time advances
//! on its own between reads) or discrete (time only moves on explicit update
//! calls). While started, a clock reports time changes to one [`EventSink`];
//! resets bracket both sides, discrete updates may additionally carry a
//! begin/end bracket around the updating notification.

pub mod clock;
pub mod driver;
pub mod interpolation;
pub mod system;

pub use clock::{Clock, ClockKind, EventSink};
pub use driver::{ContinuousDriver, DiscreteDriver, TimeSource};
pub use interpolation::{monotonic_micros, InterpolationTime};
pub use system::{SimStepClock, SystemRealClock, CLOCK_LOCAL_SYSTEM_REAL_TIME, CLOCK_LOCAL_SYSTEM_SIM_TIME};

pub use participant_api::Timestamp;
