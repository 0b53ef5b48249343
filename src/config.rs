//! Configuration management for Trolley
//!
//! This module handles loading, validation, and management of the host
//! configuration from YAML files. Device policy (schedules, limits, power-on
//! behaviour) is not configured here; it lives in the persisted
//! [`DeviceSettings`](crate::settings::DeviceSettings) record.

use crate::error::{Result, TrolleyError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Controller cadences and timeouts
    pub timing: TimingConfig,

    /// Power sensor calibration
    pub sensors: SensorConfig,

    /// Persistent store locations
    pub storage: StorageConfig,

    /// Cabinet hardware description
    pub cabinet: CabinetConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Controller cadences, grace periods and bounded waits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Controller tick period in milliseconds
    pub tick_interval_ms: u64,

    /// Sensor polling period in milliseconds
    pub sensor_poll_ms: u64,

    /// Interval between charge-current samples during smart charge (ms)
    pub current_sample_ms: u64,

    /// Heartbeat interval while active (ms)
    pub heartbeat_ms: u64,

    /// Heartbeat interval in Standby and AutoOff (ms)
    pub slow_heartbeat_ms: u64,

    /// Delay before the first heartbeat after a charge starts (ms)
    pub initial_heartbeat_delay_ms: u64,

    /// Mains-off period tolerated before the cabinet goes to sleep (ms)
    pub sleep_grace_ms: u64,

    /// Bounded wait for the event queue before a restart (ms)
    pub restart_drain_ms: u64,

    /// Bounded wait for the event queue before sleeping (ms)
    pub sleep_drain_ms: u64,

    /// Delay between successive relay energisations (ms)
    pub relay_stagger_ms: u64,

    /// Upper bound for a single tick (ms); overruns are logged
    pub watchdog_ms: u64,

    /// USB-C hub port status polling interval (ms)
    pub hub_poll_ms: u64,

    /// Confirmation delay before hub completion is accepted (ms)
    pub hub_completion_ms: u64,
}

/// Power sensor calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Gain applied to RMS current readings
    pub amps_gain: f32,

    /// Offset subtracted from RMS current readings
    pub amps_offset: f32,

    /// Readings within +/- this band are treated as zero
    pub amps_deadband: f32,

    /// RMS voltage below which the supply is treated as absent
    pub volts_floor: f32,

    /// RMS voltage ceiling (no-load wander clamp)
    pub volts_clamp: f32,

    /// Offset subtracted from the board temperature sensor
    pub temperature_offset_c: f32,
}

/// Persistent store locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Device settings record
    pub settings_path: String,

    /// Resume snapshot record
    pub snapshot_path: String,
}

/// Cabinet hardware description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CabinetConfig {
    /// Number of AC outlet relays
    pub relay_count: usize,

    /// Whether a USB-C hub board is fitted
    pub hub_board: bool,

    /// IANA zone used when daylight saving is automatic
    pub timezone: String,
}

impl TimingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn sensor_poll(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_ms)
    }

    pub fn relay_stagger(&self) -> Duration {
        Duration::from_millis(self.relay_stagger_ms)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "trolley.yaml",
            "/data/trolley.yaml",
            "/etc/trolley/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                let config = Self::from_file(path)?;
                config.validate()?;
                return Ok(config);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.timing.tick_interval_ms == 0 {
            return Err(TrolleyError::validation(
                "timing.tick_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.timing.tick_interval_ms > self.timing.watchdog_ms {
            return Err(TrolleyError::validation(
                "timing.tick_interval_ms",
                "Must not exceed the watchdog bound",
            ));
        }

        if self.timing.sensor_poll_ms == 0 || self.timing.current_sample_ms == 0 {
            return Err(TrolleyError::validation(
                "timing",
                "Polling intervals must be greater than 0",
            ));
        }

        if self.sensors.amps_gain <= 0.0 {
            return Err(TrolleyError::validation(
                "sensors.amps_gain",
                "Must be positive",
            ));
        }

        if self.sensors.volts_clamp <= self.sensors.volts_floor {
            return Err(TrolleyError::validation(
                "sensors.volts_clamp",
                "Must be above volts_floor",
            ));
        }

        if self.storage.settings_path.is_empty() || self.storage.snapshot_path.is_empty() {
            return Err(TrolleyError::validation(
                "storage",
                "Store paths cannot be empty",
            ));
        }

        if self.storage.settings_path == self.storage.snapshot_path {
            return Err(TrolleyError::validation(
                "storage.snapshot_path",
                "Must differ from settings_path",
            ));
        }

        if self.cabinet.relay_count == 0 || self.cabinet.relay_count > crate::types::MAX_RELAYS {
            return Err(TrolleyError::validation(
                "cabinet.relay_count",
                "Must be between 1 and 4",
            ));
        }

        if self.cabinet.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(TrolleyError::validation(
                "cabinet.timezone",
                "Unknown IANA time zone",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timing.tick_interval_ms, 100);
        assert_eq!(config.timing.sleep_grace_ms, 120_000);
        assert_eq!(config.cabinet.relay_count, 4);
        assert!(!config.cabinet.hub_board);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.timing.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.cabinet.relay_count = 5;
        assert!(config.validate().is_err());

        config = Config::default();
        config.storage.snapshot_path = config.storage.settings_path.clone();
        assert!(config.validate().is_err());

        config = Config::default();
        config.cabinet.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.timing.heartbeat_ms, deserialized.timing.heartbeat_ms);
        assert_eq!(config.storage.settings_path, deserialized.storage.settings_path);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("cabinet:\n  hub_board: true\n").unwrap();
        assert!(config.cabinet.hub_board);
        assert_eq!(config.cabinet.relay_count, 4);
        assert_eq!(config.logging.level, "INFO");
    }
}
