//! # job-scheduler
//!
//! Drives registered jobs against the participant's main clock.
//!
//! A job is a named unit of work with a three-phase execution contract:
//! data in, execute, data out. The timer scheduler sequences job timers
//! against clock events, lock-stepped for discrete clocks and free-running
//! for continuous clocks, and every invocation runs under a wall-clock
//! runtime budget with a configurable violation policy.

pub mod clock_based;
pub mod error;
pub mod job;
pub mod runtime_check;
pub mod service;
pub mod timer;
pub mod timer_scheduler;


pub use clock_based::{ClockBasedScheduler, JobEntry, Scheduler, SCHEDULER_CLOCK_BASED};
pub use error::SchedulerError;
pub use job::{BasicJob, Job, JobConfig, JobInfo, ViolationStrategy};
pub use runtime_check::{ErrorStateCallback, JobRuntimeCheck};
pub use service::{
    SchedulerService, SchedulerServiceEndpoint, PROPERTY_LEGACY_COMPATIBILITY_MODE,
    PROPERTY_SCHEDULER, RPC_SCHEDULER_SERVICE_OBJECT,
};
pub use timer::TimerThread;
pub use timer_scheduler::{CompletionSender, SchedulerTimer, TimerScheduler};
