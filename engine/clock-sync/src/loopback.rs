//! Link implementations routing through a remote object registry.
//!
//! These are the default transport glue: every call is marshaled to strings
//! and dispatched through the named handler objects, exactly like a real
//! transport adapter would. With a [`MemoryRemoteRegistry`] per participant
//! they connect participants living in one process.
//!
//! [`MemoryRemoteRegistry`]: participant_api::MemoryRemoteRegistry

use std::collections::HashMap;
use std::sync::Arc;

use clock_core::{ClockKind, Timestamp};
use parking_lot::RwLock;
use participant_api::{RemoteCallError, RemoteObjectRegistry};

use crate::flags::{SyncEventFlags, SyncEventKind};
use crate::links::{SyncMasterLink, SyncSlaveLink, SyncSlaveLinkFactory};
use crate::master::RPC_CLOCK_SYNC_MASTER_OBJECT;
use crate::slave::RPC_CLOCK_SYNC_SLAVE_OBJECT;

fn call(
    registry: &dyn RemoteObjectRegistry,
    object: &str,
    method: &str,
    params: &[&str],
) -> Result<String, RemoteCallError> {
    let handler = registry
        .lookup(object)
        .ok_or_else(|| RemoteCallError::new(format!("remote object `{object}` is not reachable")))?;
    handler.handle(method, params)
}

fn expect_ok(reply: &str, method: &str) -> Result<(), RemoteCallError> {
    if reply == "0" {
        Ok(())
    } else {
        Err(RemoteCallError::new(format!("{method} was rejected by the peer")))
    }
}

/// Master proxy dispatching through the master participant's registry.
pub struct RegistryMasterLink {
    registry: Arc<dyn RemoteObjectRegistry>,
}

impl RegistryMasterLink {
    pub fn new(registry: Arc<dyn RemoteObjectRegistry>) -> Self {
        Self { registry }
    }
}

impl SyncMasterLink for RegistryMasterLink {
    fn register_sync_slave(
        &self,
        flags: SyncEventFlags,
        slave_name: &str,
    ) -> Result<(), RemoteCallError> {
        let bits = flags.bits().to_string();
        let reply = call(
            self.registry.as_ref(),
            RPC_CLOCK_SYNC_MASTER_OBJECT,
            "registerSyncSlave",
            &[&bits, slave_name],
        )?;
        expect_ok(&reply, "registerSyncSlave")
    }

    fn unregister_sync_slave(&self, slave_name: &str) -> Result<(), RemoteCallError> {
        let reply = call(
            self.registry.as_ref(),
            RPC_CLOCK_SYNC_MASTER_OBJECT,
            "unregisterSyncSlave",
            &[slave_name],
        )?;
        expect_ok(&reply, "unregisterSyncSlave")
    }

    fn master_time(&self) -> Result<Timestamp, RemoteCallError> {
        let reply = call(self.registry.as_ref(), RPC_CLOCK_SYNC_MASTER_OBJECT, "getMasterTime", &[])?;
        reply
            .parse()
            .map_err(|_| RemoteCallError::new(format!("invalid master time `{reply}`")))
    }

    fn master_kind(&self) -> Result<ClockKind, RemoteCallError> {
        let reply = call(self.registry.as_ref(), RPC_CLOCK_SYNC_MASTER_OBJECT, "getMasterType", &[])?;
        let id: i64 = reply
            .parse()
            .map_err(|_| RemoteCallError::new(format!("invalid master type `{reply}`")))?;
        ClockKind::from_wire_id(id)
            .ok_or_else(|| RemoteCallError::new(format!("unknown master type {id}")))
    }
}

/// Slave proxy dispatching through the slave participant's registry.
pub struct RegistrySlaveLink {
    registry: Arc<dyn RemoteObjectRegistry>,
}

impl SyncSlaveLink for RegistrySlaveLink {
    fn sync_time_event(
        &self,
        event: SyncEventKind,
        new_time: Timestamp,
        old_time: Timestamp,
    ) -> Result<Timestamp, RemoteCallError> {
        let event_id = event.as_wire_id().to_string();
        let new_time = new_time.to_string();
        let old_time = old_time.to_string();
        let reply = call(
            self.registry.as_ref(),
            RPC_CLOCK_SYNC_SLAVE_OBJECT,
            "syncTimeEvent",
            &[&event_id, &new_time, &old_time],
        )?;
        reply
            .parse()
            .map_err(|_| RemoteCallError::new(format!("invalid slave time `{reply}`")))
    }
}

/// Resolves slave names to their participant registries.
#[derive(Default)]
pub struct RegistrySlaveLinkFactory {
    participants: RwLock<HashMap<String, Arc<dyn RemoteObjectRegistry>>>,
}

impl RegistrySlaveLinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_participant(&self, name: impl Into<String>, registry: Arc<dyn RemoteObjectRegistry>) {
        self.participants.write().insert(name.into(), registry);
    }
}

impl SyncSlaveLinkFactory for RegistrySlaveLinkFactory {
    fn connect(&self, slave_name: &str) -> Result<Box<dyn SyncSlaveLink>, RemoteCallError> {
        let registry = self
            .participants
            .read()
            .get(slave_name)
            .cloned()
            .ok_or_else(|| RemoteCallError::new(format!("unknown participant `{slave_name}`")))?;
        Ok(Box::new(RegistrySlaveLink { registry }))
    }
}
