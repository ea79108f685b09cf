//! # clock-service
//!
//! Owns the set of registered clocks of a participant, the selected main
//! clock and the fan-out of its time events to local listeners. While the
//! service is started the clock set and the main-clock selection are frozen;
//! mutation attempts fail with an invalid-state error.

pub mod config;
pub mod remote_api;
pub mod service;
pub mod sink_registry;

pub use config::{
    DEFAULT_SIM_CYCLE_TIME_MS, DEFAULT_SIM_TIME_FACTOR, PROPERTY_MAIN_CLOCK,
    PROPERTY_MAIN_CLOCK_CYCLE_TIME_MS, PROPERTY_MAIN_CLOCK_TIME_FACTOR, RPC_CLOCK_SERVICE_OBJECT,
};
pub use remote_api::ClockServiceEndpoint;
pub use service::{ClockService, ClockServiceError};
pub use sink_registry::EventSinkRegistry;
