//! Error types for scheduling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    InvalidState(String),

    #[error("`{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("`{0}` is not registered")]
    NotFound(String),

    #[error("job processing cancelled")]
    Cancelled,

    #[error("{0}")]
    Execution(String),
}
