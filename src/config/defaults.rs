use super::*;

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/trolley.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            sensor_poll_ms: 10_000,
            current_sample_ms: 20_000,
            heartbeat_ms: 60_000,
            slow_heartbeat_ms: 15 * 60_000,
            initial_heartbeat_delay_ms: 40_000,
            sleep_grace_ms: 120_000,
            restart_drain_ms: 2_000,
            sleep_drain_ms: 5_000,
            relay_stagger_ms: 2_000,
            watchdog_ms: 90_000,
            hub_poll_ms: 20_000,
            hub_completion_ms: 300_000,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            amps_gain: 0.9456,
            amps_offset: 0.0,
            amps_deadband: 0.0,
            volts_floor: 100.0,
            volts_clamp: 250.0,
            temperature_offset_c: 3.0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_path: "/data/trolley_settings.json".to_string(),
            snapshot_path: "/data/trolley_resume.json".to_string(),
        }
    }
}

impl Default for CabinetConfig {
    fn default() -> Self {
        Self {
            relay_count: 4,
            hub_board: false,
            timezone: "Europe/London".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            timing: TimingConfig::default(),
            sensors: SensorConfig::default(),
            storage: StorageConfig::default(),
            cabinet: CabinetConfig::default(),
        }
    }
}
