//! The clock sync master: relays local time events to remote slaves.

use std::collections::HashMap;
use std::sync::Arc;

use clock_core::{EventSink, Timestamp};
use clock_service::ClockService;
use parking_lot::Mutex;
use participant_api::{
    codes, Incident, IncidentReporter, RegistryError, RemoteCallError, RemoteObjectRegistry,
    RemoteRequestHandler,
};

use crate::error::SyncError;
use crate::flags::{SyncEventFlags, SyncEventKind};
use crate::links::{SyncSlaveLink, SyncSlaveLinkFactory};

/// Remote object name of the master's registration surface.
pub const RPC_CLOCK_SYNC_MASTER_OBJECT: &str = "clock_sync_master";

const ORIGIN: &str = "ClockSyncMaster";

struct SlaveEntry {
    link: Box<dyn SyncSlaveLink>,
    flags: SyncEventFlags,
    active: bool,
}

/// Relay from the local clock service to registered remote slaves.
///
/// Installed as the clock service's relay sink, so slaves observe a time
/// change only after every local listener has reacted. A failing remote call
/// deactivates the affected slave; the next registration from that slave
/// reactivates it.
pub struct ClockSyncMaster {
    slaves: Mutex<HashMap<String, SlaveEntry>>,
    link_factory: Box<dyn SyncSlaveLinkFactory>,
    incidents: Arc<dyn IncidentReporter>,
}

impl ClockSyncMaster {
    pub fn new(link_factory: Box<dyn SyncSlaveLinkFactory>, incidents: Arc<dyn IncidentReporter>) -> Self {
        Self { slaves: Mutex::new(HashMap::new()), link_factory, incidents }
    }

    /// Registers a slave or reconfigures an existing one, activating it.
    pub fn register_slave(&self, slave_name: &str, flags: SyncEventFlags) -> Result<(), SyncError> {
        let mut slaves = self.slaves.lock();
        if let Some(entry) = slaves.get_mut(slave_name) {
            entry.flags = flags;
            entry.active = true;
            tracing::debug!(slave = slave_name, ?flags, "sync slave reconfigured");
            return Ok(());
        }
        let link = self.link_factory.connect(slave_name)?;
        slaves.insert(slave_name.to_string(), SlaveEntry { link, flags, active: true });
        tracing::info!(slave = slave_name, ?flags, "sync slave registered");
        Ok(())
    }

    /// Removes a slave registration.
    pub fn unregister_slave(&self, slave_name: &str) -> Result<(), SyncError> {
        match self.slaves.lock().remove(slave_name) {
            Some(_) => {
                tracing::info!(slave = slave_name, "sync slave unregistered");
                Ok(())
            }
            None => Err(SyncError::NotFound(slave_name.to_string())),
        }
    }

    /// Acknowledgment of a relayed event from a slave. Accepted and ignored;
    /// kept for wire compatibility.
    pub fn receive_slave_synced_event(
        &self,
        _slave_name: &str,
        _time: Timestamp,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    pub fn active_slave_count(&self) -> usize {
        self.slaves.lock().values().filter(|entry| entry.active).count()
    }

    fn relay(&self, event: SyncEventKind, new_time: Timestamp, old_time: Timestamp) {
        let mut slaves = self.slaves.lock();
        for (name, entry) in slaves.iter_mut() {
            if !entry.active || !entry.flags.contains(event.flag()) {
                continue;
            }
            if let Err(error) = entry.link.sync_time_event(event, new_time, old_time) {
                entry.active = false;
                self.incidents.report(Incident::warning(
                    codes::REMOTE_DEGRADED,
                    ORIGIN,
                    format!("relaying {event:?} to slave {name} failed, slave deactivated: {error}"),
                ));
            }
        }
    }
}

impl EventSink for ClockSyncMaster {
    fn time_update_begin(&self, old_time: Timestamp, new_time: Timestamp) {
        self.relay(SyncEventKind::UpdateBefore, new_time, old_time);
    }

    fn time_updating(&self, new_time: Timestamp) {
        self.relay(SyncEventKind::Updating, new_time, 0);
    }

    fn time_update_end(&self, new_time: Timestamp) {
        self.relay(SyncEventKind::UpdateAfter, new_time, 0);
    }

    fn time_reset_begin(&self, old_time: Timestamp, new_time: Timestamp) {
        self.relay(SyncEventKind::Reset, new_time, old_time);
    }

    fn time_reset_end(&self, _new_time: Timestamp) {
        // the reset was already relayed on the begin side
    }
}

/// Wires a master into a participant: pins it as the clock service's relay
/// sink and publishes its registration surface.
pub fn install_sync_master(
    clock_service: &Arc<ClockService>,
    master: Arc<ClockSyncMaster>,
    registry: &dyn RemoteObjectRegistry,
) -> Result<(), RegistryError> {
    clock_service.install_relay_sink(master.clone());
    registry.register_object(
        RPC_CLOCK_SYNC_MASTER_OBJECT,
        Arc::new(MasterEndpoint::new(master, clock_service.clone())),
    )
}

/// String-dispatch endpoint for slave registration and master time queries.
pub struct MasterEndpoint {
    master: Arc<ClockSyncMaster>,
    clock_service: Arc<ClockService>,
}

impl MasterEndpoint {
    pub fn new(master: Arc<ClockSyncMaster>, clock_service: Arc<ClockService>) -> Self {
        Self { master, clock_service }
    }
}

impl RemoteRequestHandler for MasterEndpoint {
    fn handle(&self, method: &str, params: &[&str]) -> Result<String, RemoteCallError> {
        match method {
            "registerSyncSlave" => {
                let (flags, name) = match params {
                    [flags, name] => (*flags, *name),
                    _ => return Err(RemoteCallError::new("registerSyncSlave expects flags and name")),
                };
                let bits: u32 = flags
                    .parse()
                    .map_err(|_| RemoteCallError::new(format!("invalid flag value `{flags}`")))?;
                match self.master.register_slave(name, SyncEventFlags::from_bits_truncate(bits)) {
                    Ok(()) => Ok("0".to_string()),
                    Err(_) => Ok("-1".to_string()),
                }
            }
            "unregisterSyncSlave" => {
                let name = params
                    .first()
                    .ok_or_else(|| RemoteCallError::new("unregisterSyncSlave expects a name"))?;
                match self.master.unregister_slave(name) {
                    Ok(()) => Ok("0".to_string()),
                    Err(_) => Ok("-1".to_string()),
                }
            }
            "slaveSyncedEvent" => {
                let (time, name) = match params {
                    [time, name] => (*time, *name),
                    _ => return Err(RemoteCallError::new("slaveSyncedEvent expects time and name")),
                };
                let time: Timestamp = time
                    .parse()
                    .map_err(|_| RemoteCallError::new(format!("invalid timestamp `{time}`")))?;
                match self.master.receive_slave_synced_event(name, time) {
                    Ok(()) => Ok("0".to_string()),
                    Err(_) => Ok("-1".to_string()),
                }
            }
            "getMasterTime" => Ok(self.clock_service.time().to_string()),
            "getMasterType" => Ok(self.clock_service.kind().as_wire_id().to_string()),
            other => Err(RemoteCallError::new(format!("unknown sync master method `{other}`"))),
        }
    }
}
