//! The clock service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clock_core::{
    Clock, ClockKind, EventSink, SimStepClock, SystemRealClock, Timestamp,
    CLOCK_LOCAL_SYSTEM_SIM_TIME,
};
use parking_lot::Mutex;
use participant_api::{
    codes, Incident, IncidentReporter, PropertyStore, PropertyValue, RegistryError,
    RemoteObjectRegistry,
};
use thiserror::Error;

use crate::config::{
    DEFAULT_SIM_CYCLE_TIME_MS, DEFAULT_SIM_TIME_FACTOR, PROPERTY_MAIN_CLOCK,
    PROPERTY_MAIN_CLOCK_CYCLE_TIME_MS, PROPERTY_MAIN_CLOCK_TIME_FACTOR, RPC_CLOCK_SERVICE_OBJECT,
};
use crate::remote_api::ClockServiceEndpoint;
use crate::sink_registry::EventSinkRegistry;

const ORIGIN: &str = "ClockService";

#[derive(Debug, Error)]
pub enum ClockServiceError {
    #[error("a clock named `{0}` is already registered")]
    AlreadyRegistered(String),
    #[error("no clock named `{0}` is registered")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
}

/// Registry of clocks with one selected main clock.
///
/// The built-in wall-time and stepped simulation clocks are always present;
/// the wall-time clock is the fallback whenever a configured main clock
/// cannot be resolved. Event sinks registered here receive the main clock's
/// events while the service is started.
pub struct ClockService {
    clocks: Mutex<Vec<Arc<dyn Clock>>>,
    current_clock: Mutex<Arc<dyn Clock>>,
    builtin_real: Arc<SystemRealClock>,
    builtin_sim: Arc<SimStepClock>,
    sink_registry: Arc<EventSinkRegistry>,
    started: AtomicBool,
    properties: Arc<dyn PropertyStore>,
    incidents: Arc<dyn IncidentReporter>,
}

impl ClockService {
    pub fn new(properties: Arc<dyn PropertyStore>, incidents: Arc<dyn IncidentReporter>) -> Arc<Self> {
        let builtin_real = Arc::new(SystemRealClock::new());
        let builtin_sim = Arc::new(SimStepClock::new(DEFAULT_SIM_CYCLE_TIME_MS, DEFAULT_SIM_TIME_FACTOR));
        builtin_real.reset();
        builtin_sim.reset();

        let clocks: Vec<Arc<dyn Clock>> = vec![builtin_real.clone(), builtin_sim.clone()];
        let current_clock: Arc<dyn Clock> = builtin_real.clone();

        Arc::new(Self {
            clocks: Mutex::new(clocks),
            current_clock: Mutex::new(current_clock),
            builtin_real,
            builtin_sim,
            sink_registry: Arc::new(EventSinkRegistry::new()),
            started: AtomicBool::new(false),
            properties,
            incidents,
        })
    }

    /// Seeds property defaults so hosts see the effective configuration.
    pub fn create(&self) {
        self.properties.set_default(
            PROPERTY_MAIN_CLOCK,
            PropertyValue::Text(self.builtin_real.name().to_string()),
        );
        self.properties.set_default(
            PROPERTY_MAIN_CLOCK_CYCLE_TIME_MS,
            PropertyValue::Int(DEFAULT_SIM_CYCLE_TIME_MS),
        );
        self.properties.set_default(
            PROPERTY_MAIN_CLOCK_TIME_FACTOR,
            PropertyValue::Float(DEFAULT_SIM_TIME_FACTOR),
        );
    }

    /// Registers the remote query surface.
    pub fn register_remote_api(
        self: &Arc<Self>,
        registry: &dyn RemoteObjectRegistry,
    ) -> Result<(), RegistryError> {
        registry.register_object(
            RPC_CLOCK_SERVICE_OBJECT,
            Arc::new(ClockServiceEndpoint::new(self.clone())),
        )
    }

    pub fn unregister_remote_api(&self, registry: &dyn RemoteObjectRegistry) -> Result<(), RegistryError> {
        registry.unregister_object(RPC_CLOCK_SERVICE_OBJECT)
    }

    /// Applies the configured main clock and discrete-step settings.
    pub fn ready(&self) -> Result<(), ClockServiceError> {
        let configured = self
            .properties
            .get_text_or(PROPERTY_MAIN_CLOCK, self.builtin_real.name());
        if configured != self.current_main_clock() {
            self.set_main_clock(&configured)?;
        }

        if configured == CLOCK_LOCAL_SYSTEM_SIM_TIME {
            let mut cycle_time = self
                .properties
                .get_int_or(PROPERTY_MAIN_CLOCK_CYCLE_TIME_MS, DEFAULT_SIM_CYCLE_TIME_MS);
            if cycle_time <= 0 {
                cycle_time = DEFAULT_SIM_CYCLE_TIME_MS;
            }
            let mut time_factor = self
                .properties
                .get_float_or(PROPERTY_MAIN_CLOCK_TIME_FACTOR, DEFAULT_SIM_TIME_FACTOR);
            if time_factor < 0.1 && time_factor != 0.0 {
                time_factor = DEFAULT_SIM_TIME_FACTOR;
            }
            self.builtin_sim.update_configuration(cycle_time, time_factor);
        }

        Ok(())
    }

    /// Starts the main clock. Events flow to the registered sinks until
    /// [`ClockService::stop`].
    pub fn start(&self) {
        let clock = self.current_clock.lock().clone();
        tracing::info!(clock = clock.name(), "starting clock service");
        clock.start(self.sink_registry.clone() as Arc<dyn EventSink>);
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        let clock = self.current_clock.lock().clone();
        clock.stop();
        self.started.store(false, Ordering::SeqCst);
        tracing::info!(clock = clock.name(), "clock service stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Time of the main clock. Returns 0 while the service is stopped so
    /// callers never read a stale value before the main clock is live.
    pub fn time(&self) -> Timestamp {
        if !self.is_started() {
            return 0;
        }
        let clock = self.current_clock.lock().clone();
        clock.time()
    }

    pub fn time_by_name(&self, clock_name: &str) -> Option<Timestamp> {
        self.find_clock(clock_name).map(|clock| clock.time())
    }

    pub fn kind(&self) -> ClockKind {
        let clock = self.current_clock.lock().clone();
        clock.kind()
    }

    pub fn kind_by_name(&self, clock_name: &str) -> Option<ClockKind> {
        self.find_clock(clock_name).map(|clock| clock.kind())
    }

    pub fn clock_list(&self) -> Vec<String> {
        self.clocks.lock().iter().map(|clock| clock.name().to_string()).collect()
    }

    pub fn current_main_clock(&self) -> String {
        self.current_clock.lock().name().to_string()
    }

    fn find_clock(&self, clock_name: &str) -> Option<Arc<dyn Clock>> {
        self.clocks.lock().iter().find(|clock| clock.name() == clock_name).cloned()
    }

    pub fn register_clock(&self, clock: Arc<dyn Clock>) -> Result<(), ClockServiceError> {
        if self.is_started() {
            return Err(self.invalid_state(format!(
                "registering clock {} failed, the clock set is frozen while the service is running",
                clock.name()
            )));
        }
        let mut clocks = self.clocks.lock();
        if clocks.iter().any(|existing| existing.name() == clock.name()) {
            let error = ClockServiceError::AlreadyRegistered(clock.name().to_string());
            self.incidents
                .report(Incident::critical(codes::ALREADY_REGISTERED, ORIGIN, error.to_string()));
            return Err(error);
        }
        tracing::debug!(clock = clock.name(), "clock registered");
        clocks.push(clock);
        Ok(())
    }

    pub fn unregister_clock(&self, clock_name: &str) -> Result<(), ClockServiceError> {
        if self.is_started() {
            return Err(self.invalid_state(format!(
                "unregistering clock {clock_name} failed, the clock set is frozen while the service is running"
            )));
        }
        let mut clocks = self.clocks.lock();
        let before = clocks.len();
        clocks.retain(|clock| clock.name() != clock_name);
        if clocks.len() == before {
            let error = ClockServiceError::NotFound(clock_name.to_string());
            self.incidents
                .report(Incident::critical(codes::NOT_FOUND, ORIGIN, error.to_string()));
            return Err(error);
        }
        drop(clocks);

        let mut current = self.current_clock.lock();
        if current.name() == clock_name {
            // the main clock vanished, fall back to the built-in wall clock
            *current = self.builtin_real.clone();
        }
        Ok(())
    }

    /// Selects the main clock. On an unknown name the built-in wall clock
    /// becomes the main clock and the error is still returned.
    pub fn set_main_clock(&self, clock_name: &str) -> Result<(), ClockServiceError> {
        if self.is_started() {
            return Err(self.invalid_state(format!(
                "setting main clock {clock_name} failed, the selection is frozen while the service is running"
            )));
        }
        match self.find_clock(clock_name) {
            Some(clock) => {
                *self.current_clock.lock() = clock;
                self.properties
                    .set(PROPERTY_MAIN_CLOCK, PropertyValue::Text(clock_name.to_string()));
                Ok(())
            }
            None => {
                *self.current_clock.lock() = self.builtin_real.clone();
                let error = ClockServiceError::NotFound(clock_name.to_string());
                self.incidents.report(Incident::critical(
                    codes::NOT_FOUND,
                    ORIGIN,
                    format!("setting main clock failed, {error}; falling back to the built-in wall clock"),
                ));
                Err(error)
            }
        }
    }

    pub fn register_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.sink_registry.register_sink(sink);
    }

    pub fn unregister_event_sink(&self, sink: &Arc<dyn EventSink>) {
        self.sink_registry.unregister_sink(sink);
    }

    /// Installs the sink notified after all others. Remote relays use this so
    /// slaves observe time changes only after every local listener reacted.
    pub fn install_relay_sink(&self, sink: Arc<dyn EventSink>) {
        self.sink_registry.set_relay_sink(sink);
    }

    pub fn remove_relay_sink(&self) {
        self.sink_registry.clear_relay_sink();
    }

    fn invalid_state(&self, description: String) -> ClockServiceError {
        self.incidents
            .report(Incident::critical(codes::INVALID_STATE, ORIGIN, description.clone()));
        ClockServiceError::InvalidState(description)
    }
}

impl Drop for ClockService {
    fn drop(&mut self) {
        if self.is_started() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clock_core::CLOCK_LOCAL_SYSTEM_REAL_TIME;
    use participant_api::{CollectingReporter, MemoryPropertyStore};

    fn service_with_reporter() -> (Arc<ClockService>, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        let service = ClockService::new(Arc::new(MemoryPropertyStore::new()), reporter.clone());
        (service, reporter)
    }

    #[test]
    fn builtins_are_registered_and_real_clock_is_main() {
        let (service, _) = service_with_reporter();
        let clocks = service.clock_list();
        assert!(clocks.contains(&CLOCK_LOCAL_SYSTEM_REAL_TIME.to_string()));
        assert!(clocks.contains(&CLOCK_LOCAL_SYSTEM_SIM_TIME.to_string()));
        assert_eq!(service.current_main_clock(), CLOCK_LOCAL_SYSTEM_REAL_TIME);
    }

    #[test]
    fn time_is_zero_until_started() {
        let (service, _) = service_with_reporter();
        assert_eq!(service.time(), 0);
        service.start();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(service.time() > 0);
        service.stop();
        assert_eq!(service.time(), 0);
    }

    #[test]
    fn unknown_main_clock_falls_back_to_builtin_real_time() {
        let (service, reporter) = service_with_reporter();
        service.set_main_clock(CLOCK_LOCAL_SYSTEM_SIM_TIME).unwrap();

        let result = service.set_main_clock("does_not_exist");
        assert!(matches!(result, Err(ClockServiceError::NotFound(_))));
        assert_eq!(service.current_main_clock(), CLOCK_LOCAL_SYSTEM_REAL_TIME);
        assert_eq!(reporter.count_with_code(codes::NOT_FOUND), 1);
    }

    #[test]
    fn mutation_is_rejected_while_started() {
        let (service, reporter) = service_with_reporter();
        service.start();

        let clock: Arc<dyn Clock> = Arc::new(SystemRealClock::new());
        assert!(matches!(service.register_clock(clock), Err(ClockServiceError::InvalidState(_))));
        assert!(matches!(
            service.unregister_clock(CLOCK_LOCAL_SYSTEM_SIM_TIME),
            Err(ClockServiceError::InvalidState(_))
        ));
        assert!(matches!(
            service.set_main_clock(CLOCK_LOCAL_SYSTEM_SIM_TIME),
            Err(ClockServiceError::InvalidState(_))
        ));
        assert_eq!(reporter.count_with_code(codes::INVALID_STATE), 3);

        // registry unchanged
        assert_eq!(service.clock_list().len(), 2);
        service.stop();
    }

    #[test]
    fn duplicate_clock_name_is_rejected() {
        let (service, reporter) = service_with_reporter();
        let clock: Arc<dyn Clock> = Arc::new(SystemRealClock::new());
        let result = service.register_clock(clock);
        assert!(matches!(result, Err(ClockServiceError::AlreadyRegistered(_))));
        assert_eq!(reporter.count_with_code(codes::ALREADY_REGISTERED), 1);
    }

    #[test]
    fn unregistering_the_main_clock_falls_back() {
        let (service, _) = service_with_reporter();
        service.set_main_clock(CLOCK_LOCAL_SYSTEM_SIM_TIME).unwrap();
        service.unregister_clock(CLOCK_LOCAL_SYSTEM_SIM_TIME).unwrap();
        assert_eq!(service.current_main_clock(), CLOCK_LOCAL_SYSTEM_REAL_TIME);
    }

    #[test]
    fn ready_applies_configured_main_clock() {
        let properties = Arc::new(MemoryPropertyStore::new());
        properties.set(
            PROPERTY_MAIN_CLOCK,
            PropertyValue::Text(CLOCK_LOCAL_SYSTEM_SIM_TIME.to_string()),
        );
        properties.set(PROPERTY_MAIN_CLOCK_CYCLE_TIME_MS, PropertyValue::Int(10));
        let service = ClockService::new(properties, Arc::new(CollectingReporter::new()));
        service.create();
        service.ready().unwrap();
        assert_eq!(service.current_main_clock(), CLOCK_LOCAL_SYSTEM_SIM_TIME);
        assert_eq!(service.kind(), ClockKind::Discrete);
    }

    #[test]
    fn queries_by_name() {
        let (service, _) = service_with_reporter();
        assert_eq!(service.kind_by_name(CLOCK_LOCAL_SYSTEM_SIM_TIME), Some(ClockKind::Discrete));
        assert_eq!(service.kind_by_name("nope"), None);
        assert!(service.time_by_name(CLOCK_LOCAL_SYSTEM_REAL_TIME).is_some());
        assert!(service.time_by_name("nope").is_none());
    }
}
