//! Wall-clock runtime budget enforcement around job invocations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clock_core::Timestamp;
use participant_api::{codes, Incident, IncidentReporter};

use crate::error::SchedulerError;
use crate::job::{Job, ViolationStrategy};

const ORIGIN: &str = "JobRuntimeCheck";

/// Forces the participant into its error state.
pub type ErrorStateCallback = Arc<dyn Fn() -> Result<(), SchedulerError> + Send + Sync>;

/// Runs one job's three phases per tick and enforces its runtime budget.
///
/// The execute phase is measured in wall-clock time. Phase failures are
/// reported as warning incidents and never abort the tick; budget violations
/// apply the configured strategy before the data-out phase runs, so a caller
/// waiting on job completion observes the policy's side effects as already
/// applied.
pub struct JobRuntimeCheck {
    job_name: String,
    strategy: ViolationStrategy,
    max_runtime_us: Timestamp,
    incidents: Arc<dyn IncidentReporter>,
    set_error_state: ErrorStateCallback,
    cancelled: AtomicBool,
}

impl JobRuntimeCheck {
    pub fn new(
        job_name: impl Into<String>,
        strategy: ViolationStrategy,
        max_runtime_us: Timestamp,
        incidents: Arc<dyn IncidentReporter>,
        set_error_state: ErrorStateCallback,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            strategy,
            max_runtime_us,
            incidents,
            set_error_state,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn run_job(&self, trigger_time: Timestamp, job: &dyn Job) -> Result<(), SchedulerError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(SchedulerError::Cancelled);
        }

        if job.execute_data_in(trigger_time).is_err() {
            self.incidents.report(Incident::warning(
                codes::EXECUTION_FAILURE,
                ORIGIN,
                format!(
                    "job {}: data input step failed for this processing cycle",
                    self.job_name
                ),
            ));
        }

        let started = Instant::now();
        let result = job.execute(trigger_time);
        let execution_time = started.elapsed().as_micros() as Timestamp;

        if result.is_err() {
            self.incidents.report(Incident::warning(
                codes::EXECUTION_FAILURE,
                ORIGIN,
                format!(
                    "job {}: data processing step failed for this processing cycle",
                    self.job_name
                ),
            ));
        }

        let mut skip_output = false;
        if self.max_runtime_us > 0 && execution_time > self.max_runtime_us {
            self.apply_violation_strategy(execution_time, &mut skip_output)?;
        }

        if !skip_output && job.execute_data_out(trigger_time).is_err() {
            self.incidents.report(Incident::warning(
                codes::EXECUTION_FAILURE,
                ORIGIN,
                format!(
                    "job {}: data output step failed for this processing cycle",
                    self.job_name
                ),
            ));
        }

        result
    }

    fn apply_violation_strategy(
        &self,
        process_duration: Timestamp,
        skip_output: &mut bool,
    ) -> Result<(), SchedulerError> {
        match self.strategy {
            ViolationStrategy::Ignore | ViolationStrategy::Unknown => Ok(()),
            ViolationStrategy::Warn => {
                self.incidents.report(Incident::warning(
                    codes::RUNTIME_VIOLATION,
                    ORIGIN,
                    format!(
                        "job {}: computation time ({process_duration} us) exceeded the configured maximum runtime",
                        self.job_name
                    ),
                ));
                Ok(())
            }
            ViolationStrategy::SkipOutputPublish => {
                self.incidents.report(Incident::critical(
                    codes::RUNTIME_VIOLATION,
                    ORIGIN,
                    format!(
                        "job {}: computation time ({process_duration} us) exceeded the configured maximum runtime, \
                         queued output will not be published during this processing cycle",
                        self.job_name
                    ),
                ));
                *skip_output = true;
                Ok(())
            }
            ViolationStrategy::SetStateToError => {
                self.incidents.report(Incident::critical(
                    codes::RUNTIME_VIOLATION,
                    ORIGIN,
                    format!(
                        "job {}: computation time ({process_duration} us) exceeded the configured maximum runtime, \
                         forcing the participant into its error state",
                        self.job_name
                    ),
                ));
                (self.set_error_state)().map_err(|error| {
                    SchedulerError::Execution(format!(
                        "failed to force the participant into its error state: {error}"
                    ))
                })?;
                self.cancelled.store(true, Ordering::SeqCst);
                *skip_output = true;
                Err(SchedulerError::Cancelled)
            }
        }
    }
}
