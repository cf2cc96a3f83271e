//! Values used when a configuration file leaves a field out.

use noclip_execution::{grace, penalty};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9321";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_JSON_LOGS: bool = false;
pub const DEFAULT_DISPLAY: &str = "none";
/// Outbound frames buffered per plugin connection before it starts lagging.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 1024;

pub const DEFAULT_PENALTY_ENABLED: bool = true;
pub const DEFAULT_MIN_SPEED_KPH: f32 = penalty::DEFAULT_MIN_SPEED_KPH;
pub const DEFAULT_MIN_VIOLATION_INTERVAL_MS: u64 =
    penalty::DEFAULT_MIN_VIOLATION_INTERVAL.as_millis() as u64;
pub const DEFAULT_DURATIONS_SECS: [u64; 5] = penalty::DEFAULT_DURATIONS_SECS;
pub const DEFAULT_DECAYS_SECS: [u64; 5] = penalty::DEFAULT_DECAYS_SECS;
pub const DEFAULT_NOTIFY: bool = true;

pub const DEFAULT_RACE_START_ENABLED: bool = true;
pub const DEFAULT_INCLUDE_QUALIFYING: bool = false;
pub const DEFAULT_GRACE_MIN_SECONDS: u64 = grace::DEFAULT_MIN.as_secs();
pub const DEFAULT_GRACE_MAX_SECONDS: u64 = grace::DEFAULT_MAX.as_secs();

pub const DEFAULT_OFF_TRACK_ENABLED: bool = true;
