//! Remote query surface of the clock service.

use std::sync::Arc;

use participant_api::{RemoteCallError, RemoteRequestHandler};

use crate::service::ClockService;

/// String-dispatch endpoint answering clock queries from remote participants.
///
/// Unknown clock names answer `-1`, matching the in-process query surface
/// where a missing clock has no time or type.
pub struct ClockServiceEndpoint {
    service: Arc<ClockService>,
}

impl ClockServiceEndpoint {
    pub fn new(service: Arc<ClockService>) -> Self {
        Self { service }
    }
}

impl RemoteRequestHandler for ClockServiceEndpoint {
    fn handle(&self, method: &str, params: &[&str]) -> Result<String, RemoteCallError> {
        match method {
            "getClocks" => Ok(self.service.clock_list().join(",")),
            "getCurrentClock" => Ok(self.service.current_main_clock()),
            "getTime" => {
                let clock_name = params.first().copied().unwrap_or("");
                if clock_name.is_empty() {
                    Ok(self.service.time().to_string())
                } else {
                    Ok(self.service.time_by_name(clock_name).unwrap_or(-1).to_string())
                }
            }
            "getType" => {
                let clock_name = params.first().copied().unwrap_or("");
                if clock_name.is_empty() {
                    Ok(self.service.kind().as_wire_id().to_string())
                } else {
                    Ok(self
                        .service
                        .kind_by_name(clock_name)
                        .map(|kind| kind.as_wire_id())
                        .unwrap_or(-1)
                        .to_string())
                }
            }
            other => Err(RemoteCallError::new(format!("unknown clock service method `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clock_core::{CLOCK_LOCAL_SYSTEM_REAL_TIME, CLOCK_LOCAL_SYSTEM_SIM_TIME};
    use participant_api::{CollectingReporter, MemoryPropertyStore};

    fn endpoint() -> ClockServiceEndpoint {
        let service = ClockService::new(
            Arc::new(MemoryPropertyStore::new()),
            Arc::new(CollectingReporter::new()),
        );
        ClockServiceEndpoint::new(service)
    }

    #[test]
    fn answers_clock_queries() {
        let endpoint = endpoint();
        let clocks = endpoint.handle("getClocks", &[]).unwrap();
        assert!(clocks.contains(CLOCK_LOCAL_SYSTEM_REAL_TIME));
        assert!(clocks.contains(','));

        assert_eq!(
            endpoint.handle("getCurrentClock", &[]).unwrap(),
            CLOCK_LOCAL_SYSTEM_REAL_TIME
        );
        // service not started, main clock time reads zero
        assert_eq!(endpoint.handle("getTime", &[]).unwrap(), "0");
        assert_eq!(endpoint.handle("getType", &[CLOCK_LOCAL_SYSTEM_SIM_TIME]).unwrap(), "1");
        assert_eq!(endpoint.handle("getType", &["missing"]).unwrap(), "-1");
        assert!(endpoint.handle("bogus", &[]).is_err());
    }
}
