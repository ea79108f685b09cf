//! Error types for clock synchronization.

use clock_service::ClockServiceError;
use participant_api::RemoteCallError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("`{0}` is not registered")]
    NotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteCallError),

    #[error(transparent)]
    Clock(#[from] ClockServiceError),

    #[error("remote object registry: {0}")]
    Registry(String),
}
