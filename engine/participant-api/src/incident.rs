//! Structured incident reporting.
//!
//! Incidents are the side channel for reported-but-recovered errors. A failing
//! operation returns a typed error to its caller and, where operational
//! context matters, additionally reports an incident carrying code, severity
//! and source location.

use std::panic::Location;

use parking_lot::Mutex;

/// Severity of a reported incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Well-known incident codes.
pub mod codes {
    pub const ALREADY_REGISTERED: i32 = 10;
    pub const NOT_FOUND: i32 = 11;
    pub const INVALID_STATE: i32 = 12;
    pub const INVALID_ARGUMENT: i32 = 13;
    pub const EXECUTION_FAILURE: i32 = 20;
    pub const RUNTIME_VIOLATION: i32 = 21;
    pub const REMOTE_DEGRADED: i32 = 30;
}

/// A severity-tagged diagnostic event with its source location.
#[derive(Debug, Clone)]
pub struct Incident {
    pub code: i32,
    pub severity: Severity,
    pub origin: &'static str,
    pub description: String,
    pub file: &'static str,
    pub line: u32,
}

impl Incident {
    #[track_caller]
    pub fn new(code: i32, severity: Severity, origin: &'static str, description: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            code,
            severity,
            origin,
            description: description.into(),
            file: location.file(),
            line: location.line(),
        }
    }

    #[track_caller]
    pub fn warning(code: i32, origin: &'static str, description: impl Into<String>) -> Self {
        Self::new(code, Severity::Warning, origin, description)
    }

    #[track_caller]
    pub fn critical(code: i32, origin: &'static str, description: impl Into<String>) -> Self {
        Self::new(code, Severity::Critical, origin, description)
    }
}

/// Sink for reported incidents.
pub trait IncidentReporter: Send + Sync {
    fn report(&self, incident: Incident);
}

/// Forwards incidents onto the tracing log stream.
#[derive(Debug, Default)]
pub struct LogIncidentReporter;

impl IncidentReporter for LogIncidentReporter {
    fn report(&self, incident: Incident) {
        match incident.severity {
            Severity::Info => tracing::info!(
                code = incident.code,
                origin = incident.origin,
                file = incident.file,
                line = incident.line,
                "{}",
                incident.description
            ),
            Severity::Warning => tracing::warn!(
                code = incident.code,
                origin = incident.origin,
                file = incident.file,
                line = incident.line,
                "{}",
                incident.description
            ),
            Severity::Critical => tracing::error!(
                code = incident.code,
                origin = incident.origin,
                file = incident.file,
                line = incident.line,
                "{}",
                incident.description
            ),
        }
    }
}

/// Stores reported incidents for later inspection. Intended for tests.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    incidents: Mutex<Vec<Incident>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Incident> {
        std::mem::take(&mut *self.incidents.lock())
    }

    pub fn count(&self) -> usize {
        self.incidents.lock().len()
    }

    pub fn count_with_code(&self, code: i32) -> usize {
        self.incidents.lock().iter().filter(|incident| incident.code == code).count()
    }

    pub fn last(&self) -> Option<Incident> {
        self.incidents.lock().last().cloned()
    }
}

impl IncidentReporter for CollectingReporter {
    fn report(&self, incident: Incident) {
        self.incidents.lock().push(incident);
    }
}
