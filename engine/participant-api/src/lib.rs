//! # participant-api
//!
//! Contracts between participant components and their host environment.
//!
//! Timing, scheduling and synchronization components do not own configuration
//! storage, diagnostics or the remote transport. They consume them through the
//! narrow traits defined here, so a host can wire in its own property backend,
//! incident channel and RPC layer without touching component code.

pub mod incident;
pub mod properties;
pub mod remote;

pub use incident::{codes, CollectingReporter, Incident, IncidentReporter, LogIncidentReporter, Severity};
pub use properties::{MemoryPropertyStore, PropertyStore, PropertyValue};
pub use remote::{
    MemoryRemoteRegistry, RegistryError, RemoteCallError, RemoteObjectRegistry, RemoteRequestHandler,
};

/// Timestamp in microseconds. `-1` is the conventional "unset" sentinel.
pub type Timestamp = i64;
