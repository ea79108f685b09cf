//! Typed proxies for the calls crossing the participant boundary.
//!
//! Every method can fail with a [`RemoteCallError`]; callers degrade the
//! affected peer instead of propagating the failure into local event
//! delivery.

use clock_core::{ClockKind, Timestamp};
use participant_api::RemoteCallError;

use crate::flags::{SyncEventFlags, SyncEventKind};

/// Calls a slave offers to the master.
pub trait SyncSlaveLink: Send + Sync {
    /// Delivers one master event; returns the slave's resulting local time.
    fn sync_time_event(
        &self,
        event: SyncEventKind,
        new_time: Timestamp,
        old_time: Timestamp,
    ) -> Result<Timestamp, RemoteCallError>;
}

/// Calls a master offers to its slaves.
pub trait SyncMasterLink: Send + Sync {
    fn register_sync_slave(
        &self,
        flags: SyncEventFlags,
        slave_name: &str,
    ) -> Result<(), RemoteCallError>;
    fn unregister_sync_slave(&self, slave_name: &str) -> Result<(), RemoteCallError>;
    fn master_time(&self) -> Result<Timestamp, RemoteCallError>;
    fn master_kind(&self) -> Result<ClockKind, RemoteCallError>;
}

/// Builds the proxy for a named slave when it registers.
pub trait SyncSlaveLinkFactory: Send + Sync {
    fn connect(&self, slave_name: &str) -> Result<Box<dyn SyncSlaveLink>, RemoteCallError>;
}
