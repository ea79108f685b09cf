//! Lifecycle component creating and wiring the slave clock of a participant.

use std::sync::Arc;

use clock_service::{ClockService, PROPERTY_MAIN_CLOCK};
use parking_lot::Mutex;
use participant_api::{
    IncidentReporter, PropertyStore, PropertyValue, RemoteCallError, RemoteObjectRegistry,
};

use crate::error::SyncError;
use crate::links::SyncMasterLink;
use crate::slave::{
    InterpolatingSlaveClock, SteppedSlaveClock, CLOCK_SLAVE_MASTER_ON_DEMAND,
    CLOCK_SLAVE_MASTER_ON_DEMAND_DISCRETE,
};

/// Name of the participant acting as time master.
pub const PROPERTY_TIMING_MASTER: &str = "Timing.TimingMaster.ParticipantName";
/// Poll cycle of the slave's master-time requests in milliseconds.
pub const PROPERTY_SLAVE_SYNC_CYCLE_TIME_MS: &str = "Clock.SlaveSyncCycleTime_ms";

pub const DEFAULT_SLAVE_SYNC_CYCLE_TIME_MS: i64 = 1000;

/// Builds the proxy to a named master participant.
pub trait MasterLinkFactory: Send + Sync {
    fn connect(&self, master_name: &str) -> Result<Arc<dyn SyncMasterLink>, RemoteCallError>;
}

enum SlaveClockHandle {
    Interpolating(Arc<InterpolatingSlaveClock>),
    Stepped(Arc<SteppedSlaveClock>),
}

/// Creates the matching slave clock when the configured main clock is one of
/// the slave modes, registers it with the clock service and drives its sync
/// lifecycle.
pub struct ClockSyncService {
    participant_name: String,
    properties: Arc<dyn PropertyStore>,
    incidents: Arc<dyn IncidentReporter>,
    clock_service: Arc<ClockService>,
    remote_registry: Arc<dyn RemoteObjectRegistry>,
    link_factory: Box<dyn MasterLinkFactory>,
    slave_clock: Mutex<Option<SlaveClockHandle>>,
}

impl ClockSyncService {
    pub fn new(
        participant_name: impl Into<String>,
        properties: Arc<dyn PropertyStore>,
        incidents: Arc<dyn IncidentReporter>,
        clock_service: Arc<ClockService>,
        remote_registry: Arc<dyn RemoteObjectRegistry>,
        link_factory: Box<dyn MasterLinkFactory>,
    ) -> Self {
        Self {
            participant_name: participant_name.into(),
            properties,
            incidents,
            clock_service,
            remote_registry,
            link_factory,
            slave_clock: Mutex::new(None),
        }
    }

    /// Seeds property defaults.
    pub fn create(&self) {
        self.properties
            .set_default(PROPERTY_TIMING_MASTER, PropertyValue::Text(String::new()));
        self.properties.set_default(
            PROPERTY_SLAVE_SYNC_CYCLE_TIME_MS,
            PropertyValue::Int(DEFAULT_SLAVE_SYNC_CYCLE_TIME_MS),
        );
    }

    /// Creates and registers the slave clock if a slave mode is configured.
    pub fn initializing(&self) -> Result<(), SyncError> {
        let main_clock = self.properties.get_text_or(PROPERTY_MAIN_CLOCK, "");
        let master_name = self.properties.get_text_or(PROPERTY_TIMING_MASTER, "");
        let mut cycle_time = self
            .properties
            .get_int_or(PROPERTY_SLAVE_SYNC_CYCLE_TIME_MS, DEFAULT_SLAVE_SYNC_CYCLE_TIME_MS);
        if cycle_time <= 0 {
            cycle_time = DEFAULT_SLAVE_SYNC_CYCLE_TIME_MS;
        }

        let handle = match main_clock.as_str() {
            CLOCK_SLAVE_MASTER_ON_DEMAND => {
                let master = self.connect_master(&main_clock, &master_name)?;
                Some(SlaveClockHandle::Interpolating(InterpolatingSlaveClock::new(
                    master,
                    self.participant_name.clone(),
                    cycle_time,
                    self.incidents.clone(),
                )))
            }
            CLOCK_SLAVE_MASTER_ON_DEMAND_DISCRETE => {
                let master = self.connect_master(&main_clock, &master_name)?;
                Some(SlaveClockHandle::Stepped(SteppedSlaveClock::new(
                    master,
                    self.participant_name.clone(),
                    cycle_time,
                    false,
                    self.incidents.clone(),
                )))
            }
            _ => None,
        };

        if let Some(handle) = handle {
            match &handle {
                SlaveClockHandle::Interpolating(clock) => {
                    self.clock_service.register_clock(clock.clone())?
                }
                SlaveClockHandle::Stepped(clock) => {
                    self.clock_service.register_clock(clock.clone())?
                }
            }
            *self.slave_clock.lock() = Some(handle);
        }
        Ok(())
    }

    fn connect_master(
        &self,
        main_clock: &str,
        master_name: &str,
    ) -> Result<Arc<dyn SyncMasterLink>, SyncError> {
        if master_name.is_empty() {
            return Err(SyncError::InvalidArgument(format!(
                "main clock `{main_clock}` requires `{PROPERTY_TIMING_MASTER}` to name the time master"
            )));
        }
        Ok(self.link_factory.connect(master_name)?)
    }

    /// Unregisters and drops the slave clock.
    pub fn deinitializing(&self) {
        if let Some(handle) = self.slave_clock.lock().take() {
            let name = match &handle {
                SlaveClockHandle::Interpolating(clock) => clock_name(clock.as_ref()),
                SlaveClockHandle::Stepped(clock) => clock_name(clock.as_ref()),
            };
            let _ = self.clock_service.unregister_clock(&name);
        }
    }

    pub fn start(&self) -> Result<(), SyncError> {
        match &*self.slave_clock.lock() {
            Some(SlaveClockHandle::Interpolating(clock)) => {
                clock.start_sync(self.remote_registry.as_ref())
            }
            Some(SlaveClockHandle::Stepped(clock)) => {
                clock.start_sync(self.remote_registry.as_ref())
            }
            None => Ok(()),
        }
    }

    pub fn stop(&self) {
        match &*self.slave_clock.lock() {
            Some(SlaveClockHandle::Interpolating(clock)) => {
                clock.stop_sync(self.remote_registry.as_ref())
            }
            Some(SlaveClockHandle::Stepped(clock)) => {
                clock.stop_sync(self.remote_registry.as_ref())
            }
            None => {}
        }
    }
}

fn clock_name(clock: &dyn clock_core::Clock) -> String {
    clock.name().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use participant_api::{CollectingReporter, MemoryPropertyStore, MemoryRemoteRegistry};

    struct NoMasterFactory;

    impl MasterLinkFactory for NoMasterFactory {
        fn connect(&self, master_name: &str) -> Result<Arc<dyn SyncMasterLink>, RemoteCallError> {
            Err(RemoteCallError::new(format!("no route to `{master_name}`")))
        }
    }

    fn service_with_main_clock(main_clock: &str, master: &str) -> ClockSyncService {
        let properties = Arc::new(MemoryPropertyStore::new());
        properties.set(PROPERTY_MAIN_CLOCK, PropertyValue::Text(main_clock.to_string()));
        if !master.is_empty() {
            properties.set(PROPERTY_TIMING_MASTER, PropertyValue::Text(master.to_string()));
        }
        let incidents = Arc::new(CollectingReporter::new());
        let clock_service = ClockService::new(properties.clone(), incidents.clone());
        ClockSyncService::new(
            "participant_b",
            properties,
            incidents,
            clock_service,
            Arc::new(MemoryRemoteRegistry::new()),
            Box::new(NoMasterFactory),
        )
    }

    #[test]
    fn slave_mode_without_master_name_is_rejected() {
        let service = service_with_main_clock(CLOCK_SLAVE_MASTER_ON_DEMAND, "");
        service.create();
        assert!(matches!(service.initializing(), Err(SyncError::InvalidArgument(_))));
    }

    #[test]
    fn non_slave_main_clock_creates_no_slave_clock() {
        let service = service_with_main_clock("local_system_realtime", "participant_a");
        service.create();
        service.initializing().unwrap();
        assert!(service.slave_clock.lock().is_none());
        service.start().unwrap();
        service.stop();
        service.deinitializing();
    }

    #[test]
    fn unreachable_master_surfaces_as_remote_error() {
        let service = service_with_main_clock(CLOCK_SLAVE_MASTER_ON_DEMAND, "participant_a");
        service.create();
        assert!(matches!(service.initializing(), Err(SyncError::Remote(_))));
    }
}
