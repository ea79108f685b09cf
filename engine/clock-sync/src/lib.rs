//! # clock-sync
//!
//! Clock synchronization across participants.
//!
//! One participant acts as the time master: its clock service events are
//! relayed to registered remote slaves, filtered by each slave's event
//! subscription. A slave participant runs a synthetic clock fed by the
//! master, either by periodic polling plus interpolation (continuous master)
//! or by consuming relayed step events directly (discrete master).

pub mod error;
pub mod flags;
pub mod links;
pub mod loopback;
pub mod master;
pub mod service;
pub mod slave;

#[cfg(test)]
mod integration_tests;

pub use error::SyncError;
pub use flags::{subscription_for, SyncEventFlags, SyncEventKind};
pub use links::{SyncMasterLink, SyncSlaveLink, SyncSlaveLinkFactory};
pub use loopback::{RegistryMasterLink, RegistrySlaveLink, RegistrySlaveLinkFactory};
pub use master::{install_sync_master, ClockSyncMaster, MasterEndpoint, RPC_CLOCK_SYNC_MASTER_OBJECT};
pub use service::{
    ClockSyncService, MasterLinkFactory, DEFAULT_SLAVE_SYNC_CYCLE_TIME_MS,
    PROPERTY_SLAVE_SYNC_CYCLE_TIME_MS, PROPERTY_TIMING_MASTER,
};
pub use slave::{
    ApplyFn, FarClockUpdater, InterpolatingSlaveClock, MasterEventHandler, SlaveEndpoint,
    SteppedSlaveClock, CLOCK_SLAVE_MASTER_ON_DEMAND, CLOCK_SLAVE_MASTER_ON_DEMAND_DISCRETE,
    RPC_CLOCK_SYNC_SLAVE_OBJECT,
};
