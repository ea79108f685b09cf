//! Two-participant synchronization through in-process registries.

use std::sync::Arc;
use std::time::Duration;

use clock_core::{Clock, ClockKind, DiscreteDriver, EventSink, Timestamp};
use clock_service::{ClockService, PROPERTY_MAIN_CLOCK};
use participant_api::{
    CollectingReporter, MemoryPropertyStore, MemoryRemoteRegistry, PropertyStore, PropertyValue,
    RemoteCallError,
};

use crate::loopback::{RegistryMasterLink, RegistrySlaveLinkFactory};
use crate::master::{install_sync_master, ClockSyncMaster};
use crate::service::{ClockSyncService, MasterLinkFactory, PROPERTY_TIMING_MASTER};
use crate::slave::{CLOCK_SLAVE_MASTER_ON_DEMAND, CLOCK_SLAVE_MASTER_ON_DEMAND_DISCRETE};

/// Discrete clock stepped by the test instead of a worker thread.
struct ManualStepClock {
    driver: Arc<DiscreteDriver>,
}

impl ManualStepClock {
    fn new() -> Arc<Self> {
        Arc::new(Self { driver: Arc::new(DiscreteDriver::new()) })
    }

    fn step_to(&self, time: Timestamp) {
        self.driver.set_new_time(time, true);
    }
}

impl Clock for ManualStepClock {
    fn name(&self) -> &str {
        "manual_step"
    }
    fn kind(&self) -> ClockKind {
        ClockKind::Discrete
    }
    fn time(&self) -> Timestamp {
        self.driver.time()
    }
    fn reset(&self) {
        self.driver.reset();
    }
    fn start(&self, sink: Arc<dyn EventSink>) {
        self.driver.start(sink);
    }
    fn stop(&self) {
        self.driver.stop();
    }
}

struct FixedRouteFactory {
    registry: Arc<MemoryRemoteRegistry>,
}

impl MasterLinkFactory for FixedRouteFactory {
    fn connect(&self, _master_name: &str) -> Result<Arc<dyn crate::SyncMasterLink>, RemoteCallError> {
        Ok(Arc::new(RegistryMasterLink::new(self.registry.clone())))
    }
}

struct Participants {
    master_clock_service: Arc<ClockService>,
    slave_clock_service: Arc<ClockService>,
    sync_service: ClockSyncService,
}

fn wire_participants(slave_main_clock: &str) -> Participants {
    let reporter = Arc::new(CollectingReporter::new());

    // participant_a, the time master
    let master_registry = Arc::new(MemoryRemoteRegistry::new());
    let slave_registry = Arc::new(MemoryRemoteRegistry::new());
    let master_properties = Arc::new(MemoryPropertyStore::new());
    let master_clock_service = ClockService::new(master_properties, reporter.clone());

    let slave_links = RegistrySlaveLinkFactory::new();
    slave_links.add_participant("participant_b", slave_registry.clone());
    let master = Arc::new(ClockSyncMaster::new(Box::new(slave_links), reporter.clone()));
    install_sync_master(&master_clock_service, master, master_registry.as_ref()).unwrap();

    // participant_b, the time slave
    let slave_properties = Arc::new(MemoryPropertyStore::new());
    slave_properties.set(PROPERTY_MAIN_CLOCK, PropertyValue::Text(slave_main_clock.to_string()));
    slave_properties
        .set(PROPERTY_TIMING_MASTER, PropertyValue::Text("participant_a".to_string()));
    slave_properties.set(
        crate::service::PROPERTY_SLAVE_SYNC_CYCLE_TIME_MS,
        PropertyValue::Int(10),
    );
    let slave_clock_service = ClockService::new(slave_properties.clone(), reporter.clone());
    let sync_service = ClockSyncService::new(
        "participant_b",
        slave_properties,
        reporter,
        slave_clock_service.clone(),
        slave_registry,
        Box::new(FixedRouteFactory { registry: master_registry }),
    );
    sync_service.create();

    Participants { master_clock_service, slave_clock_service, sync_service }
}

#[test]
fn discrete_steps_propagate_to_the_slave_participant() {
    let participants = wire_participants(CLOCK_SLAVE_MASTER_ON_DEMAND_DISCRETE);

    let manual = ManualStepClock::new();
    participants.master_clock_service.register_clock(manual.clone()).unwrap();
    participants.master_clock_service.set_main_clock("manual_step").unwrap();
    participants.master_clock_service.start();

    participants.sync_service.initializing().unwrap();
    participants.slave_clock_service.ready().unwrap();
    participants.slave_clock_service.start();
    participants.sync_service.start().unwrap();

    manual.step_to(100_000);
    manual.step_to(200_000);

    assert_eq!(participants.slave_clock_service.time(), 200_000);
    assert_eq!(participants.slave_clock_service.kind(), ClockKind::Discrete);

    // a backward master step arrives as a reset; the slave restarts at zero
    // and re-synchronizes on the next relayed step
    manual.step_to(50_000);
    assert_eq!(participants.slave_clock_service.time(), 0);
    manual.step_to(60_000);
    assert_eq!(participants.slave_clock_service.time(), 60_000);

    participants.sync_service.stop();
    participants.slave_clock_service.stop();
    participants.master_clock_service.stop();
    participants.sync_service.deinitializing();
}

#[test]
fn continuous_master_time_is_interpolated_on_the_slave() {
    let participants = wire_participants(CLOCK_SLAVE_MASTER_ON_DEMAND);

    participants.master_clock_service.start();

    participants.sync_service.initializing().unwrap();
    participants.slave_clock_service.ready().unwrap();
    participants.slave_clock_service.start();
    participants.sync_service.start().unwrap();

    std::thread::sleep(Duration::from_millis(120));

    let master_time = participants.master_clock_service.time();
    let slave_time = participants.slave_clock_service.time();
    assert!(slave_time > 0, "slave clock never adopted master time");
    assert!(
        (master_time - slave_time).abs() < 100_000,
        "slave drifted too far from master: master={master_time} slave={slave_time}"
    );

    participants.sync_service.stop();
    participants.slave_clock_service.stop();
    participants.master_clock_service.stop();
    participants.sync_service.deinitializing();
}
