//! Configuration keys of the clock service. Key names are stable.

/// Name of the main clock.
pub const PROPERTY_MAIN_CLOCK: &str = "Clock.MainClock";
/// Step length of the built-in discrete simulation clock in milliseconds.
pub const PROPERTY_MAIN_CLOCK_CYCLE_TIME_MS: &str = "Clock.MainClock.CycleTime_ms";
/// Rate of discrete steps relative to wall time. 0.0 means no delay between
/// steps.
pub const PROPERTY_MAIN_CLOCK_TIME_FACTOR: &str = "Clock.MainClock.TimeFactor_float";

pub const DEFAULT_SIM_CYCLE_TIME_MS: i64 = 100;
pub const DEFAULT_SIM_TIME_FACTOR: f64 = 1.0;

/// Remote object name of the clock query surface.
pub const RPC_CLOCK_SERVICE_OBJECT: &str = "clock_service";
