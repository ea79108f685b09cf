//! The built-in clock-based scheduler.

use std::sync::Arc;
use std::thread;

use clock_service::ClockService;
use parking_lot::Mutex;
use participant_api::IncidentReporter;

use crate::error::SchedulerError;
use crate::job::{Job, JobInfo};
use crate::runtime_check::{ErrorStateCallback, JobRuntimeCheck};
use crate::timer::TimerThread;
use crate::timer_scheduler::{SchedulerTimer, TimerScheduler};

/// Name of the always-available clock-based scheduler.
pub const SCHEDULER_CLOCK_BASED: &str = "clock_based_scheduler";

/// A registered job together with its scheduling info.
#[derive(Clone)]
pub struct JobEntry {
    pub job: Arc<dyn Job>,
    pub info: JobInfo,
}

/// Pluggable strategy deciding when registered jobs run.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;
    /// Builds the runtime for the given job set against the clock service.
    fn initialize(&self, clock: Arc<ClockService>, jobs: &[JobEntry]) -> Result<(), SchedulerError>;
    fn start(&self) -> Result<(), SchedulerError>;
    fn stop(&self) -> Result<(), SchedulerError>;
    fn deinitialize(&self) -> Result<(), SchedulerError>;
    fn tasks(&self) -> Vec<JobInfo>;
}

struct Runtime {
    engine: Arc<TimerScheduler>,
    timers: Vec<Arc<TimerThread>>,
    infos: Vec<JobInfo>,
    processing_thread: Option<thread::JoinHandle<()>>,
}

/// Scheduler creating one timer thread per job, driven by a [`TimerScheduler`]
/// subscribed to the clock service.
pub struct ClockBasedScheduler {
    incidents: Arc<dyn IncidentReporter>,
    set_error_state: ErrorStateCallback,
    runtime: Mutex<Option<Runtime>>,
}

impl ClockBasedScheduler {
    pub fn new(incidents: Arc<dyn IncidentReporter>, set_error_state: ErrorStateCallback) -> Self {
        Self { incidents, set_error_state, runtime: Mutex::new(None) }
    }
}

impl Scheduler for ClockBasedScheduler {
    fn name(&self) -> &str {
        SCHEDULER_CLOCK_BASED
    }

    fn initialize(&self, clock: Arc<ClockService>, jobs: &[JobEntry]) -> Result<(), SchedulerError> {
        // drop a previous runtime first so its clock subscription goes away
        if let Some(previous) = self.runtime.lock().take() {
            previous.engine.unregister_from_clock();
        }

        let engine = TimerScheduler::new(clock);
        engine.register_with_clock();

        let mut timers = Vec::with_capacity(jobs.len());
        let mut infos = Vec::with_capacity(jobs.len());
        for entry in jobs {
            let config = entry.info.config();
            let check = JobRuntimeCheck::new(
                entry.info.name(),
                config.runtime_violation_strategy,
                config.max_runtime_real_time_us,
                self.incidents.clone(),
                self.set_error_state.clone(),
            );
            let timer = TimerThread::new(entry.info.name(), entry.job.clone(), check);
            engine.add_timer(
                timer.clone() as Arc<dyn SchedulerTimer>,
                config.cycle_sim_time_us,
                config.delay_sim_time_us,
            )?;
            timers.push(timer);
            infos.push(entry.info.clone());
        }

        tracing::info!(jobs = infos.len(), "clock based scheduler initialized");
        *self.runtime.lock() =
            Some(Runtime { engine, timers, infos, processing_thread: None });
        Ok(())
    }

    fn start(&self) -> Result<(), SchedulerError> {
        let mut guard = self.runtime.lock();
        let runtime = guard.as_mut().ok_or_else(|| {
            SchedulerError::InvalidState("scheduler must be initialized before start".to_string())
        })?;

        for timer in &runtime.timers {
            timer.start()?;
        }
        runtime.engine.start()?;

        let engine = runtime.engine.clone();
        runtime.processing_thread = Some(thread::spawn(move || {
            let _ = engine.execute();
        }));
        Ok(())
    }

    fn stop(&self) -> Result<(), SchedulerError> {
        let mut guard = self.runtime.lock();
        if let Some(runtime) = guard.as_mut() {
            runtime.engine.stop();
            for timer in &runtime.timers {
                let handle: Arc<dyn SchedulerTimer> = timer.clone();
                let _ = runtime.engine.remove_timer(&handle);
                timer.stop();
            }
            if let Some(handle) = runtime.processing_thread.take() {
                let _ = handle.join();
            }
        }
        Ok(())
    }

    fn deinitialize(&self) -> Result<(), SchedulerError> {
        self.stop()?;
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.engine.unregister_from_clock();
        }
        Ok(())
    }

    fn tasks(&self) -> Vec<JobInfo> {
        self.runtime.lock().as_ref().map(|runtime| runtime.infos.clone()).unwrap_or_default()
    }
}
