use anyhow::Context;
use noclip_execution::{ArbiterConfig, GraceConfig, OffTrackConfig, PenaltyConfig, TagStyle};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, num::NonZeroUsize, path::Path, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;

pub mod bridge;
pub mod defaults;
pub mod server;


/// Service configuration, as read from YAML.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,
    #[serde(default)]
    pub penalty: PenaltySection,
    #[serde(default)]
    pub race_start: RaceStartSection,
    #[serde(default)]
    pub off_track: OffTrackSection,
    #[serde(default = "default_display")]
    pub display: String,
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PenaltySection {
    pub enabled: bool,
    pub min_speed_kph: f32,
    pub min_violation_interval_ms: u64,
    /// Ghost duration per stack level, levels 1 through 5.
    pub durations_secs: [u64; 5],
    /// Clean time needed to drop each level, levels 1 through 5.
    pub decays_secs: [u64; 5],
    pub notify: bool,
}

impl Default for PenaltySection {
    fn default() -> Self {
        Self {
            enabled: defaults::DEFAULT_PENALTY_ENABLED,
            min_speed_kph: defaults::DEFAULT_MIN_SPEED_KPH,
            min_violation_interval_ms: defaults::DEFAULT_MIN_VIOLATION_INTERVAL_MS,
            durations_secs: defaults::DEFAULT_DURATIONS_SECS,
            decays_secs: defaults::DEFAULT_DECAYS_SECS,
            notify: defaults::DEFAULT_NOTIFY,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaceStartSection {
    pub enabled: bool,
    pub include_qualifying: bool,
    pub min_seconds: u64,
    pub max_seconds: u64,
    pub seed: Option<u64>,
}

impl Default for RaceStartSection {
    fn default() -> Self {
        Self {
            enabled: defaults::DEFAULT_RACE_START_ENABLED,
            include_qualifying: defaults::DEFAULT_INCLUDE_QUALIFYING,
            min_seconds: defaults::DEFAULT_GRACE_MIN_SECONDS,
            max_seconds: defaults::DEFAULT_GRACE_MAX_SECONDS,
            seed: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OffTrackSection {
    pub enabled: bool,
}

impl Default for OffTrackSection {
    fn default() -> Self {
        Self {
            enabled: defaults::DEFAULT_OFF_TRACK_ENABLED,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
            json_logs: default_json_logs(),
            penalty: PenaltySection::default(),
            race_start: RaceStartSection::default(),
            off_track: OffTrackSection::default(),
            display: default_display(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("listen must be a socket address: {value}")]
    InvalidListen { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("invalid display style {value}: {reason}")]
    InvalidDisplay { value: String, reason: &'static str },
    #[error("penalty config is invalid: {reason}")]
    InvalidPenalty { reason: &'static str },
    #[error("race_start window is invalid (min_seconds={min}, max_seconds={max}): {reason}")]
    InvalidGraceWindow {
        min: u64,
        max: u64,
        reason: &'static str,
    },
}

/// Configuration after every field has been checked and converted.
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub listen: SocketAddr,
    pub log_level: Level,
    pub json_logs: bool,
    pub arbiter: ArbiterConfig,
    pub display: TagStyle,
    pub outbound_buffer: NonZeroUsize,
}

fn default_listen() -> String {
    defaults::DEFAULT_LISTEN.to_string()
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

fn default_json_logs() -> bool {
    defaults::DEFAULT_JSON_LOGS
}

fn default_display() -> String {
    defaults::DEFAULT_DISPLAY.to_string()
}

fn default_outbound_buffer() -> usize {
    defaults::DEFAULT_OUTBOUND_BUFFER
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl Config {
    /// Read and parse a YAML configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        serde_yaml::from_str(&contents).context("Could not parse config file")
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let listen = SocketAddr::from_str(&self.listen).map_err(|_| ConfigError::InvalidListen {
            value: self.listen.clone(),
        })?;
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;
        let display =
            TagStyle::from_str(&self.display).map_err(|reason| ConfigError::InvalidDisplay {
                value: self.display.clone(),
                reason,
            })?;
        let outbound_buffer = NonZeroUsize::new(self.outbound_buffer).ok_or(
            ConfigError::InvalidNonZero {
                field: "outbound_buffer",
                value: 0,
            },
        )?;

        let penalty = self.penalty_config()?;
        let race_start = self.race_start_config()?;
        let off_track = OffTrackConfig {
            enabled: self.off_track.enabled,
        };

        Ok(ValidatedConfig {
            listen,
            log_level,
            json_logs: self.json_logs,
            arbiter: ArbiterConfig {
                penalty,
                race_start,
                off_track,
            },
            display,
            outbound_buffer,
        })
    }

    fn penalty_config(&self) -> Result<PenaltyConfig, ConfigError> {
        let section = &self.penalty;
        for secs in section.durations_secs {
            ensure_nonzero("penalty.durations_secs", secs)?;
        }
        for secs in section.decays_secs {
            ensure_nonzero("penalty.decays_secs", secs)?;
        }
        let config = PenaltyConfig {
            enabled: section.enabled,
            min_speed_kph: section.min_speed_kph,
            min_violation_interval: Duration::from_millis(section.min_violation_interval_ms),
            durations: section.durations_secs.map(Duration::from_secs),
            decays: section.decays_secs.map(Duration::from_secs),
            notify: section.notify,
        };
        config
            .validate()
            .map_err(|reason| ConfigError::InvalidPenalty { reason })?;
        Ok(config)
    }

    fn race_start_config(&self) -> Result<GraceConfig, ConfigError> {
        let section = &self.race_start;
        let config = GraceConfig {
            enabled: section.enabled,
            include_qualifying: section.include_qualifying,
            min: Duration::from_secs(section.min_seconds),
            max: Duration::from_secs(section.max_seconds),
            seed: section.seed,
        };
        config
            .validate()
            .map_err(|reason| ConfigError::InvalidGraceWindow {
                min: section.min_seconds,
                max: section.max_seconds,
                reason,
            })?;
        Ok(config)
    }
}
