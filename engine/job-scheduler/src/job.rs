//! Jobs and their configuration.

use clock_core::Timestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SchedulerError;

/// What happens when a job overruns its configured runtime budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationStrategy {
    /// No action.
    Ignore,
    /// Report a warning incident and continue.
    Warn,
    /// Report an incident and suppress the data-out phase for this tick only.
    SkipOutputPublish,
    /// Report a critical incident, force the participant into its error state
    /// and cancel further processing of this job.
    SetStateToError,
    Unknown,
}

impl Default for ViolationStrategy {
    fn default() -> Self {
        ViolationStrategy::Ignore
    }
}

/// Scheduling configuration of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Cycle time in simulation time.
    pub cycle_sim_time_us: Timestamp,
    /// Delay of the first invocation in simulation time.
    pub delay_sim_time_us: Timestamp,
    /// Wall-clock runtime budget of the execute phase; 0 disables the check.
    pub max_runtime_real_time_us: Timestamp,
    /// Deprecated since 2.3; kept for configuration round-trips, not
    /// consulted anywhere.
    pub max_waiting_time_us: Timestamp,
    pub runtime_violation_strategy: ViolationStrategy,
    /// Names of jobs this job depends on.
    pub dependencies: Vec<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            cycle_sim_time_us: 0,
            delay_sim_time_us: 0,
            max_runtime_real_time_us: 0,
            max_waiting_time_us: 0,
            runtime_violation_strategy: ViolationStrategy::default(),
            dependencies: Vec::new(),
        }
    }
}

impl JobConfig {
    /// Configuration of a plain periodic job.
    pub fn periodic(cycle_sim_time_us: Timestamp) -> Self {
        Self { cycle_sim_time_us, ..Self::default() }
    }
}

/// A job's name together with its configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    name: String,
    config: JobConfig,
}

impl JobInfo {
    pub fn new(name: impl Into<String>, config: JobConfig) -> Self {
        Self { name: name.into(), config }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }
}

/// The three-phase execution contract, invoked once per scheduling tick.
pub trait Job: Send + Sync {
    /// Data reception phase.
    fn execute_data_in(&self, time_of_execution: Timestamp) -> Result<(), SchedulerError>;
    /// Processing phase; this is what the runtime budget measures.
    fn execute(&self, time_of_execution: Timestamp) -> Result<(), SchedulerError>;
    /// Data transmission phase.
    fn execute_data_out(&self, time_of_execution: Timestamp) -> Result<(), SchedulerError>;

    /// Switches the data phases to legacy-compatible pumping. Returns false
    /// if the implementation does not support the compatibility mode.
    fn set_legacy_compat(&self, enabled: bool) -> bool {
        let _ = enabled;
        false
    }
}

type PhaseFn = Box<dyn Fn(Timestamp) -> Result<(), SchedulerError> + Send + Sync>;

/// Job wrapping a user callback as the execute phase.
///
/// The data phases are no-ops unless pump callbacks are installed, which the
/// legacy compatibility layer uses to move signal readers and writers around
/// the user call.
pub struct BasicJob {
    name: String,
    config: RwLock<JobConfig>,
    execute_fn: PhaseFn,
    data_in_fn: RwLock<Option<PhaseFn>>,
    data_out_fn: RwLock<Option<PhaseFn>>,
    legacy_compat: AtomicBool,
}

impl BasicJob {
    pub fn new(
        name: impl Into<String>,
        cycle_sim_time_us: Timestamp,
        execute_fn: impl Fn(Timestamp) -> Result<(), SchedulerError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_config(name, JobConfig::periodic(cycle_sim_time_us), execute_fn)
    }

    pub fn with_config(
        name: impl Into<String>,
        config: JobConfig,
        execute_fn: impl Fn(Timestamp) -> Result<(), SchedulerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            config: RwLock::new(config),
            execute_fn: Box::new(execute_fn),
            data_in_fn: RwLock::new(None),
            data_out_fn: RwLock::new(None),
            legacy_compat: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> JobConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration without changing the job's identity.
    pub fn reconfigure(&self, config: JobConfig) {
        *self.config.write() = config;
    }

    pub fn reset(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    pub fn legacy_compat(&self) -> bool {
        self.legacy_compat.load(Ordering::SeqCst)
    }

    /// Installs the data pumping callbacks run around the execute phase.
    pub fn set_data_pumps(
        &self,
        data_in: impl Fn(Timestamp) -> Result<(), SchedulerError> + Send + Sync + 'static,
        data_out: impl Fn(Timestamp) -> Result<(), SchedulerError> + Send + Sync + 'static,
    ) {
        *self.data_in_fn.write() = Some(Box::new(data_in));
        *self.data_out_fn.write() = Some(Box::new(data_out));
    }
}

impl Job for BasicJob {
    fn execute_data_in(&self, time_of_execution: Timestamp) -> Result<(), SchedulerError> {
        match &*self.data_in_fn.read() {
            Some(pump) => pump(time_of_execution),
            None => Ok(()),
        }
    }

    fn execute(&self, time_of_execution: Timestamp) -> Result<(), SchedulerError> {
        (self.execute_fn)(time_of_execution)
    }

    fn execute_data_out(&self, time_of_execution: Timestamp) -> Result<(), SchedulerError> {
        match &*self.data_out_fn.read() {
            Some(pump) => pump(time_of_execution),
            None => Ok(()),
        }
    }

    fn set_legacy_compat(&self, enabled: bool) -> bool {
        self.legacy_compat.store(enabled, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    #[test]
    fn config_round_trips_through_toml() {
        let config = JobConfig {
            cycle_sim_time_us: 100_000,
            delay_sim_time_us: 5_000,
            max_runtime_real_time_us: 20_000,
            max_waiting_time_us: 0,
            runtime_violation_strategy: ViolationStrategy::SkipOutputPublish,
            dependencies: vec!["sensor_front".to_string(), "sensor_rear".to_string()],
        };

        let encoded = toml::to_string(&config).unwrap();
        let decoded: JobConfig = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn basic_job_runs_the_callback() {
        let count = Arc::new(AtomicI64::new(0));
        let seen = count.clone();
        let job = BasicJob::new("counter", 100_000, move |time| {
            seen.store(time, Ordering::SeqCst);
            Ok(())
        });

        job.execute_data_in(42).unwrap();
        job.execute(42).unwrap();
        job.execute_data_out(42).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn reconfigure_keeps_identity() {
        let job = BasicJob::new("sensor", 100_000, |_| Ok(()));
        assert_eq!(job.config().cycle_sim_time_us, 100_000);

        job.reconfigure(JobConfig::periodic(50_000));
        assert_eq!(job.name(), "sensor");
        assert_eq!(job.config().cycle_sim_time_us, 50_000);
    }

    #[test]
    fn data_pumps_wrap_the_user_call() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = order.clone();
        let job = BasicJob::new("pumped", 1_000, move |_| {
            log.lock().push("execute");
            Ok(())
        });
        let log_in = order.clone();
        let log_out = order.clone();
        job.set_data_pumps(
            move |_| {
                log_in.lock().push("in");
                Ok(())
            },
            move |_| {
                log_out.lock().push("out");
                Ok(())
            },
        );

        job.execute_data_in(0).unwrap();
        job.execute(0).unwrap();
        job.execute_data_out(0).unwrap();
        assert_eq!(*order.lock(), vec!["in", "execute", "out"]);
    }

    #[test]
    fn legacy_compat_is_supported_on_basic_jobs() {
        let job = BasicJob::new("compat", 1_000, |_| Ok(()));
        assert!(!job.legacy_compat());
        assert!(job.set_legacy_compat(true));
        assert!(job.legacy_compat());
    }
}
