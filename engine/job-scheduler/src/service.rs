//! The scheduler service: registries for schedulers and jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clock_service::ClockService;
use parking_lot::Mutex;
use participant_api::{
    codes, Incident, IncidentReporter, PropertyStore, PropertyValue, RegistryError,
    RemoteCallError, RemoteObjectRegistry, RemoteRequestHandler,
};

use crate::clock_based::{ClockBasedScheduler, JobEntry, Scheduler, SCHEDULER_CLOCK_BASED};
use crate::error::SchedulerError;
use crate::job::{Job, JobConfig, JobInfo};
use crate::runtime_check::ErrorStateCallback;

/// Name of the active scheduler.
pub const PROPERTY_SCHEDULER: &str = "Scheduling.Scheduler";
/// Reconfigures all jobs for legacy-compatible data pumping when set.
pub const PROPERTY_LEGACY_COMPATIBILITY_MODE: &str = "Scheduling.LegacyCompatibilityMode_bool";
/// Remote object name of the scheduler query surface.
pub const RPC_SCHEDULER_SERVICE_OBJECT: &str = "scheduler_service";

const ORIGIN: &str = "SchedulerService";

/// Registry of schedulers and jobs with one active scheduler.
///
/// The built-in clock-based scheduler is always registered and can never be
/// unregistered. All registry mutation is rejected while the service is
/// started, so the active scheduler owns a stable job and scheduler set for
/// its whole running lifetime.
pub struct SchedulerService {
    clock: Arc<ClockService>,
    properties: Arc<dyn PropertyStore>,
    incidents: Arc<dyn IncidentReporter>,
    schedulers: Mutex<Vec<Arc<dyn Scheduler>>>,
    current: Mutex<Arc<dyn Scheduler>>,
    jobs: Mutex<Vec<JobEntry>>,
    started: AtomicBool,
}

impl SchedulerService {
    pub fn new(
        clock: Arc<ClockService>,
        properties: Arc<dyn PropertyStore>,
        incidents: Arc<dyn IncidentReporter>,
        set_error_state: ErrorStateCallback,
    ) -> Arc<Self> {
        let default_scheduler: Arc<dyn Scheduler> =
            Arc::new(ClockBasedScheduler::new(incidents.clone(), set_error_state));
        Arc::new(Self {
            clock,
            properties,
            incidents,
            schedulers: Mutex::new(vec![default_scheduler.clone()]),
            current: Mutex::new(default_scheduler),
            jobs: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Seeds property defaults.
    pub fn create(&self) {
        self.properties.set_default(
            PROPERTY_SCHEDULER,
            PropertyValue::Text(SCHEDULER_CLOCK_BASED.to_string()),
        );
    }

    pub fn register_remote_api(
        self: &Arc<Self>,
        registry: &dyn RemoteObjectRegistry,
    ) -> Result<(), RegistryError> {
        registry.register_object(
            RPC_SCHEDULER_SERVICE_OBJECT,
            Arc::new(SchedulerServiceEndpoint::new(self.clone())),
        )
    }

    pub fn unregister_remote_api(
        &self,
        registry: &dyn RemoteObjectRegistry,
    ) -> Result<(), RegistryError> {
        registry.unregister_object(RPC_SCHEDULER_SERVICE_OBJECT)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn register_scheduler(&self, scheduler: Arc<dyn Scheduler>) -> Result<(), SchedulerError> {
        if self.is_started() {
            return Err(self.invalid_state("registering a scheduler while running is not possible"));
        }
        let mut schedulers = self.schedulers.lock();
        if schedulers.iter().any(|existing| existing.name() == scheduler.name()) {
            let error = SchedulerError::AlreadyRegistered(scheduler.name().to_string());
            self.incidents
                .report(Incident::critical(codes::ALREADY_REGISTERED, ORIGIN, error.to_string()));
            return Err(error);
        }
        schedulers.push(scheduler);
        Ok(())
    }

    pub fn unregister_scheduler(&self, scheduler_name: &str) -> Result<(), SchedulerError> {
        if self.is_started() {
            return Err(self.invalid_state("unregistering a scheduler while running is not possible"));
        }
        if scheduler_name == SCHEDULER_CLOCK_BASED {
            let error = SchedulerError::InvalidState(
                "unregistering the default scheduler is not possible".to_string(),
            );
            self.incidents
                .report(Incident::critical(codes::INVALID_ARGUMENT, ORIGIN, error.to_string()));
            return Err(error);
        }

        let mut schedulers = self.schedulers.lock();
        let before = schedulers.len();
        schedulers.retain(|scheduler| scheduler.name() != scheduler_name);
        if schedulers.len() == before {
            let error = SchedulerError::NotFound(scheduler_name.to_string());
            self.incidents
                .report(Incident::critical(codes::NOT_FOUND, ORIGIN, error.to_string()));
            return Err(error);
        }

        let mut current = self.current.lock();
        if current.name() == scheduler_name {
            // fall back to the default scheduler
            let default = schedulers
                .iter()
                .find(|scheduler| scheduler.name() == SCHEDULER_CLOCK_BASED)
                .cloned();
            if let Some(default) = default {
                *current = default;
            }
        }
        Ok(())
    }

    pub fn scheduler_list(&self) -> Vec<String> {
        self.schedulers.lock().iter().map(|scheduler| scheduler.name().to_string()).collect()
    }

    /// Selects the active scheduler. On an unknown name the previous
    /// selection stays active.
    pub fn set_scheduler(&self, scheduler_name: &str) -> Result<(), SchedulerError> {
        let found = self
            .schedulers
            .lock()
            .iter()
            .find(|scheduler| scheduler.name() == scheduler_name)
            .cloned();
        match found {
            Some(scheduler) => {
                *self.current.lock() = scheduler;
                Ok(())
            }
            None => {
                let error = SchedulerError::NotFound(scheduler_name.to_string());
                self.incidents.report(Incident::critical(
                    codes::NOT_FOUND,
                    ORIGIN,
                    format!("setting scheduler failed, {error}"),
                ));
                Err(error)
            }
        }
    }

    /// Returns the named scheduler, or the active one for an empty name.
    pub fn scheduler(&self, scheduler_name: &str) -> Option<Arc<dyn Scheduler>> {
        if scheduler_name.is_empty() {
            return Some(self.current.lock().clone());
        }
        self.schedulers
            .lock()
            .iter()
            .find(|scheduler| scheduler.name() == scheduler_name)
            .cloned()
    }

    pub fn current_scheduler_name(&self) -> String {
        self.current.lock().name().to_string()
    }

    pub fn add_job(
        &self,
        name: &str,
        job: Arc<dyn Job>,
        config: JobConfig,
    ) -> Result<(), SchedulerError> {
        if self.is_started() {
            return Err(self.invalid_state(format!(
                "adding job {name} while running is not possible"
            )));
        }
        let mut jobs = self.jobs.lock();
        if jobs.iter().any(|entry| entry.info.name() == name) {
            let error = SchedulerError::AlreadyRegistered(name.to_string());
            self.incidents
                .report(Incident::critical(codes::ALREADY_REGISTERED, ORIGIN, error.to_string()));
            return Err(error);
        }
        jobs.push(JobEntry { job, info: JobInfo::new(name, config) });
        Ok(())
    }

    pub fn remove_job(&self, name: &str) -> Result<(), SchedulerError> {
        if self.is_started() {
            return Err(self.invalid_state(format!(
                "removing job {name} while running is not possible"
            )));
        }
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|entry| entry.info.name() != name);
        if jobs.len() == before {
            let error = SchedulerError::NotFound(name.to_string());
            self.incidents
                .report(Incident::critical(codes::NOT_FOUND, ORIGIN, error.to_string()));
            return Err(error);
        }
        Ok(())
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.jobs.lock().iter().map(|entry| entry.info.clone()).collect()
    }

    /// Applies configuration and initializes the active scheduler with the
    /// registered job set.
    pub fn ready(&self) -> Result<(), SchedulerError> {
        if self.properties.get_bool_or(PROPERTY_LEGACY_COMPATIBILITY_MODE, false) {
            self.reconfigure_jobs_for_compatibility()?;
        }

        let configured = self.properties.get_text_or(PROPERTY_SCHEDULER, SCHEDULER_CLOCK_BASED);
        self.set_scheduler(&configured)?;

        let current = self.current.lock().clone();
        let jobs = self.jobs.lock().clone();
        current.initialize(self.clock.clone(), &jobs)
    }

    pub fn start(&self) -> Result<(), SchedulerError> {
        self.started.store(true, Ordering::SeqCst);
        let current = self.current.lock().clone();
        current.start()
    }

    pub fn stop(&self) -> Result<(), SchedulerError> {
        let current = self.current.lock().clone();
        let result = current.stop();
        self.started.store(false, Ordering::SeqCst);
        result
    }

    pub fn deinitializing(&self) -> Result<(), SchedulerError> {
        self.stop()?;
        let current = self.current.lock().clone();
        current.deinitialize()
    }

    pub fn tasks(&self) -> Vec<JobInfo> {
        self.current.lock().tasks()
    }

    fn reconfigure_jobs_for_compatibility(&self) -> Result<(), SchedulerError> {
        for entry in self.jobs.lock().iter() {
            if !entry.job.set_legacy_compat(true) {
                let error = SchedulerError::Execution(format!(
                    "property {PROPERTY_LEGACY_COMPATIBILITY_MODE} is set but job {} does not \
                     support the compatibility mode",
                    entry.info.name()
                ));
                self.incidents.report(Incident::critical(
                    codes::INVALID_ARGUMENT,
                    ORIGIN,
                    error.to_string(),
                ));
                return Err(error);
            }
        }
        Ok(())
    }

    fn invalid_state(&self, description: impl Into<String>) -> SchedulerError {
        let description = description.into();
        self.incidents
            .report(Incident::critical(codes::INVALID_STATE, ORIGIN, description.clone()));
        SchedulerError::InvalidState(description)
    }
}

/// String-dispatch endpoint answering scheduler queries.
pub struct SchedulerServiceEndpoint {
    service: Arc<SchedulerService>,
}

impl SchedulerServiceEndpoint {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self { service }
    }
}

impl RemoteRequestHandler for SchedulerServiceEndpoint {
    fn handle(&self, method: &str, _params: &[&str]) -> Result<String, RemoteCallError> {
        match method {
            "getSchedulers" => Ok(self.service.scheduler_list().join(",")),
            "getCurrentScheduler" => Ok(self.service.current_scheduler_name()),
            "getJobs" => Ok(self
                .service
                .jobs()
                .iter()
                .map(|info| info.name().to_string())
                .collect::<Vec<_>>()
                .join(",")),
            other => Err(RemoteCallError::new(format!("unknown scheduler service method `{other}`"))),
        }
    }
}
