//! The slave side: synthetic clocks fed by a remote time master.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clock_core::{
    monotonic_micros, Clock, ClockKind, ContinuousDriver, DiscreteDriver, EventSink,
    InterpolationTime, TimeSource, Timestamp,
};
use parking_lot::{Condvar, Mutex};
use participant_api::{
    codes, Incident, IncidentReporter, RemoteCallError, RemoteObjectRegistry, RemoteRequestHandler,
};

use crate::error::SyncError;
use crate::flags::{subscription_for, SyncEventKind};
use crate::links::SyncMasterLink;

/// Name of the interpolating slave clock (continuous master).
pub const CLOCK_SLAVE_MASTER_ON_DEMAND: &str = "slave_master_on_demand";
/// Name of the stepped slave clock (discrete master).
pub const CLOCK_SLAVE_MASTER_ON_DEMAND_DISCRETE: &str = "slave_master_on_demand_discrete";
/// Remote object name under which a slave receives relayed events.
pub const RPC_CLOCK_SYNC_SLAVE_OBJECT: &str = "clock_sync_slave";

const ORIGIN: &str = "ClockSyncSlave";

/// Receiver of relayed master events on the slave side.
pub trait MasterEventHandler: Send + Sync {
    /// Handles one relayed event and returns the local time afterwards.
    fn on_master_event(
        &self,
        event: SyncEventKind,
        new_time: Timestamp,
        old_time: Timestamp,
    ) -> Timestamp;
}

/// String-dispatch endpoint the master's relay calls into.
pub struct SlaveEndpoint {
    handler: Arc<dyn MasterEventHandler>,
}

impl SlaveEndpoint {
    pub fn new(handler: Arc<dyn MasterEventHandler>) -> Self {
        Self { handler }
    }
}

impl RemoteRequestHandler for SlaveEndpoint {
    fn handle(&self, method: &str, params: &[&str]) -> Result<String, RemoteCallError> {
        match method {
            "syncTimeEvent" => {
                let (event, new_time, old_time) = match params {
                    [event, new_time, old_time] => (*event, *new_time, *old_time),
                    _ => {
                        return Err(RemoteCallError::new(
                            "syncTimeEvent expects event id, new time and old time",
                        ))
                    }
                };
                let event_id: i64 = event
                    .parse()
                    .map_err(|_| RemoteCallError::new(format!("invalid event id `{event}`")))?;
                let event = SyncEventKind::from_wire_id(event_id)
                    .ok_or_else(|| RemoteCallError::new(format!("unknown event id {event_id}")))?;
                let new_time: Timestamp = new_time
                    .parse()
                    .map_err(|_| RemoteCallError::new(format!("invalid timestamp `{new_time}`")))?;
                let old_time: Timestamp = old_time
                    .parse()
                    .map_err(|_| RemoteCallError::new(format!("invalid timestamp `{old_time}`")))?;
                Ok(self.handler.on_master_event(event, new_time, old_time).to_string())
            }
            other => Err(RemoteCallError::new(format!("unknown sync slave method `{other}`"))),
        }
    }
}

/// Callback fed with each polled master time and measured round trip.
pub type ApplyFn = Arc<dyn Fn(Timestamp, Timestamp) + Send + Sync>;

struct UpdaterInner {
    master: Arc<dyn SyncMasterLink>,
    local_name: String,
    before_and_after: bool,
    poll_cycle: Duration,
    master_kind: Mutex<Option<ClockKind>>,
    stopped: Mutex<bool>,
    wake: Condvar,
    apply: Mutex<Option<ApplyFn>>,
    incidents: Arc<dyn IncidentReporter>,
}

impl UpdaterInner {
    fn master_kind(&self) -> Option<ClockKind> {
        *self.master_kind.lock()
    }

    fn register_with_master(&self) {
        match self.master.master_kind() {
            Ok(kind) => *self.master_kind.lock() = Some(kind),
            Err(error) => {
                *self.master_kind.lock() = None;
                self.incidents.report(Incident::warning(
                    codes::REMOTE_DEGRADED,
                    ORIGIN,
                    format!("querying the master clock type failed: {error}"),
                ));
            }
        }

        let flags = subscription_for(self.before_and_after);
        if let Err(error) = self.master.register_sync_slave(flags, &self.local_name) {
            *self.master_kind.lock() = None;
            self.incidents.report(Incident::warning(
                codes::REMOTE_DEGRADED,
                ORIGIN,
                format!("registering with the time master failed: {error}"),
            ));
        }
    }

    fn unregister_from_master(&self) {
        if let Err(error) = self.master.unregister_sync_slave(&self.local_name) {
            self.incidents.report(Incident::warning(
                codes::REMOTE_DEGRADED,
                ORIGIN,
                format!("unregistering from the time master failed: {error}"),
            ));
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps one poll cycle. Short cycles yield once instead of blocking so
    /// a stop request is still seen promptly; there is no unconditional spin.
    fn wait_one_cycle(&self) -> bool {
        if self.poll_cycle > Duration::from_millis(5) {
            let mut stopped = self.stopped.lock();
            if *stopped {
                return false;
            }
            self.wake.wait_for(&mut stopped, self.poll_cycle);
            !*stopped
        } else {
            thread::yield_now();
            !self.is_stopped()
        }
    }
}

/// Keeps a slave clock aligned with its remote master.
///
/// Owns the registration state and, for continuous masters, a poll worker
/// that periodically fetches the master time and feeds the measured round
/// trip into the owning clock.
pub struct FarClockUpdater {
    inner: Arc<UpdaterInner>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl FarClockUpdater {
    pub fn new(
        master: Arc<dyn SyncMasterLink>,
        local_name: impl Into<String>,
        poll_cycle_ms: i64,
        before_and_after: bool,
        incidents: Arc<dyn IncidentReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(UpdaterInner {
                master,
                local_name: local_name.into(),
                before_and_after,
                poll_cycle: Duration::from_millis(poll_cycle_ms.max(0) as u64),
                master_kind: Mutex::new(None),
                stopped: Mutex::new(true),
                wake: Condvar::new(),
                apply: Mutex::new(None),
                incidents,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Installs the callback invoked with each polled master time and the
    /// measured round trip.
    pub fn set_apply(&self, apply: ApplyFn) {
        *self.inner.apply.lock() = Some(apply);
    }

    pub fn register_with_master(&self) {
        self.inner.register_with_master();
    }

    pub fn unregister_from_master(&self) {
        self.inner.unregister_from_master();
    }

    pub fn master_kind(&self) -> Option<ClockKind> {
        self.inner.master_kind()
    }

    pub fn start_worker(&self) {
        self.stop_worker();
        *self.inner.stopped.lock() = false;
        let inner = self.inner.clone();
        *self.worker.lock() = Some(thread::spawn(move || Self::run(inner)));
    }

    /// Stops the poll worker; returns whether it was running.
    pub fn stop_worker(&self) -> bool {
        {
            let mut stopped = self.inner.stopped.lock();
            if *stopped {
                return false;
            }
            *stopped = true;
        }
        self.inner.wake.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        true
    }

    fn run(inner: Arc<UpdaterInner>) {
        let mut first_poll = true;
        loop {
            if !first_poll && !inner.wait_one_cycle() {
                break;
            }
            first_poll = false;
            if inner.is_stopped() {
                break;
            }

            if inner.master_kind().is_none() {
                inner.register_with_master();
            }

            if inner.master_kind() == Some(ClockKind::Continuous) {
                let begin = monotonic_micros();
                match inner.master.master_time() {
                    Ok(master_time) => {
                        let roundtrip = monotonic_micros() - begin;
                        let apply = inner.apply.lock().clone();
                        if let Some(apply) = apply {
                            apply(master_time, roundtrip);
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "master time poll failed, re-registering");
                        inner.register_with_master();
                    }
                }
            }
        }
    }
}

impl Drop for FarClockUpdater {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

struct InterpolationSource {
    interpolation: Arc<InterpolationTime>,
}

impl TimeSource for InterpolationSource {
    fn now(&self) -> Timestamp {
        self.interpolation.get_time()
    }

    fn reset(&self) -> Timestamp {
        self.interpolation.reset_time(0)
    }
}

/// Continuous slave clock extrapolating the master time between polls.
pub struct InterpolatingSlaveClock {
    driver: ContinuousDriver<InterpolationSource>,
    updater: FarClockUpdater,
}

impl InterpolatingSlaveClock {
    pub fn new(
        master: Arc<dyn SyncMasterLink>,
        local_name: impl Into<String>,
        poll_cycle_ms: i64,
        incidents: Arc<dyn IncidentReporter>,
    ) -> Arc<Self> {
        let interpolation = Arc::new(InterpolationTime::new());
        let updater = FarClockUpdater::new(master, local_name, poll_cycle_ms, false, incidents);
        let feed = interpolation.clone();
        updater.set_apply(Arc::new(move |time, roundtrip| feed.set_time(time, roundtrip)));
        Arc::new(Self {
            driver: ContinuousDriver::new(InterpolationSource { interpolation }),
            updater,
        })
    }

    /// Publishes the slave endpoint, registers with the master and starts the
    /// poll worker unless the master turned out to be discrete.
    pub fn start_sync(self: &Arc<Self>, registry: &dyn RemoteObjectRegistry) -> Result<(), SyncError> {
        registry
            .register_object(RPC_CLOCK_SYNC_SLAVE_OBJECT, Arc::new(SlaveEndpoint::new(self.clone())))
            .map_err(|error| SyncError::Registry(error.to_string()))?;
        self.updater.register_with_master();
        if self.updater.master_kind() != Some(ClockKind::Discrete) {
            self.updater.start_worker();
        }
        Ok(())
    }

    pub fn stop_sync(&self, registry: &dyn RemoteObjectRegistry) {
        self.updater.stop_worker();
        self.updater.unregister_from_master();
        let _ = registry.unregister_object(RPC_CLOCK_SYNC_SLAVE_OBJECT);
    }
}

impl MasterEventHandler for InterpolatingSlaveClock {
    fn on_master_event(
        &self,
        event: SyncEventKind,
        _new_time: Timestamp,
        _old_time: Timestamp,
    ) -> Timestamp {
        if event == SyncEventKind::Reset {
            self.reset();
        }
        self.time()
    }
}

impl Clock for InterpolatingSlaveClock {
    fn name(&self) -> &str {
        CLOCK_SLAVE_MASTER_ON_DEMAND
    }

    fn kind(&self) -> ClockKind {
        ClockKind::Continuous
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

/// Discrete slave clock driven by relayed master step events.
pub struct SteppedSlaveClock {
    driver: Arc<DiscreteDriver>,
    updater: FarClockUpdater,
    before_and_after: bool,
    // serializes relayed bracket events against local updates
    update_lock: Mutex<()>,
}

impl SteppedSlaveClock {
    pub fn new(
        master: Arc<dyn SyncMasterLink>,
        local_name: impl Into<String>,
        poll_cycle_ms: i64,
        before_and_after: bool,
        incidents: Arc<dyn IncidentReporter>,
    ) -> Arc<Self> {
        let driver = Arc::new(DiscreteDriver::new());
        let updater =
            FarClockUpdater::new(master, local_name, poll_cycle_ms, before_and_after, incidents);
        let feed = driver.clone();
        updater.set_apply(Arc::new(move |time, _roundtrip| feed.set_new_time(time, true)));
        Arc::new(Self { driver, updater, before_and_after, update_lock: Mutex::new(()) })
    }

    pub fn start_sync(self: &Arc<Self>, registry: &dyn RemoteObjectRegistry) -> Result<(), SyncError> {
        registry
            .register_object(RPC_CLOCK_SYNC_SLAVE_OBJECT, Arc::new(SlaveEndpoint::new(self.clone())))
            .map_err(|error| SyncError::Registry(error.to_string()))?;
        self.updater.register_with_master();
        if self.updater.master_kind() != Some(ClockKind::Discrete) {
            self.updater.start_worker();
        }
        Ok(())
    }

    pub fn stop_sync(&self, registry: &dyn RemoteObjectRegistry) {
        self.updater.stop_worker();
        self.updater.unregister_from_master();
        let _ = registry.unregister_object(RPC_CLOCK_SYNC_SLAVE_OBJECT);
    }

    fn reset_on_event(&self) {
        let restart = self.updater.stop_worker();
        self.driver.reset();
        if restart {
            self.updater.start_worker();
        }
    }
}

impl MasterEventHandler for SteppedSlaveClock {
    fn on_master_event(
        &self,
        event: SyncEventKind,
        new_time: Timestamp,
        old_time: Timestamp,
    ) -> Timestamp {
        match event {
            SyncEventKind::Reset => {
                if new_time != old_time {
                    self.reset_on_event();
                }
            }
            SyncEventKind::UpdateBefore => {
                let _guard = self.update_lock.lock();
                if let Some(sink) = self.driver.sink() {
                    sink.time_update_begin(old_time, new_time);
                }
            }
            SyncEventKind::Updating => {
                // when the master already relays the bracket, don't wrap again
                self.driver.set_new_time(new_time, !self.before_and_after);
            }
            SyncEventKind::UpdateAfter => {
                let _guard = self.update_lock.lock();
                if let Some(sink) = self.driver.sink() {
                    sink.time_update_end(new_time);
                }
            }
        }
        self.driver.time()
    }
}

impl Clock for SteppedSlaveClock {
    fn name(&self) -> &str {
        CLOCK_SLAVE_MASTER_ON_DEMAND_DISCRETE
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
