//! Power and environment sensing
//!
//! The cabinet's meters, temperature sensor, battery monitor and optional
//! USB-C hub are reached through the [`PowerMonitor`] trait. A
//! [`SensorSampler`] polls it on its own cadence, applies the meter
//! calibration and keeps the last good value of any reading that fails.

use crate::config::SensorConfig;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::settings::DeviceSettings;
use crate::types::DstMode;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Volts per count of the battery ADC
const BATTERY_VOLTS_PER_COUNT: f32 = 0.001_241_8;

/// Degrees below the limit the temperature must fall before re-arming
pub const OVERHEAT_HYSTERESIS_C: f32 = 10.0;

/// RMS readings from the power meter
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerReading {
    pub volts: f32,
    pub amps: f32,
}

/// Battery charger status
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub volts: f32,
    pub is_charging: bool,
    pub is_charged: bool,
    pub is_fault: bool,
    pub fault_recoverable: bool,
}

impl BatteryStatus {
    /// Decode the charger's two status pins and the raw ADC count
    ///
    /// STAT1 high with STAT2 low means charging, both high means charged and
    /// STAT1 low is a fault, recoverable when STAT2 is high.
    pub fn from_status_pins(stat1: bool, stat2: bool, adc_counts: u16) -> Self {
        Self {
            volts: f32::from(adc_counts) * BATTERY_VOLTS_PER_COUNT,
            is_charging: stat1 && !stat2,
            is_charged: stat1 && stat2,
            is_fault: !stat1,
            fault_recoverable: stat2,
        }
    }
}

/// LED state of one USB-C port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortLed {
    Off,
    /// Device attached and charged
    Green,
    /// Device attached and charging
    Red,
}

impl PortLed {
    fn from_char(c: char) -> Self {
        match c {
            'R' => PortLed::Red,
            'G' => PortLed::Green,
            _ => PortLed::Off,
        }
    }
}

/// Port status of the USB-C hub board
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HubStatus {
    pub ports: Vec<PortLed>,
}

impl HubStatus {
    /// Build from the per-channel status strings the hub reports, one
    /// character per port (`R`, `G`, anything else is off)
    pub fn from_channel_strings<S: AsRef<str>>(channels: &[S]) -> Self {
        Self {
            ports: channels
                .iter()
                .flat_map(|c| c.as_ref().chars().map(PortLed::from_char).collect::<Vec<_>>())
                .collect(),
        }
    }

    /// No port is still charging
    pub fn all_green_or_off(&self) -> bool {
        !self.ports.iter().any(|p| *p == PortLed::Red)
    }

    /// Ports with a device attached
    pub fn connected_devices(&self) -> usize {
        self.ports.iter().filter(|p| **p != PortLed::Off).count()
    }
}

/// Hardware access to the cabinet's sensors
#[async_trait]
pub trait PowerMonitor: Send + Sync {
    async fn read_power(&self) -> Result<PowerReading>;
    async fn read_temperature(&self) -> Result<f32>;
    async fn read_battery(&self) -> Result<BatteryStatus>;
    async fn is_mains_present(&self) -> Result<bool>;

    /// Hub port status, `None` when no hub board is fitted
    async fn read_hub(&self) -> Result<Option<HubStatus>> {
        Ok(None)
    }
}

/// Wall clock source; `None` until the clock has been set
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> Option<DateTime<Utc>>;
}

/// System time, always valid
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> Option<DateTime<Utc>> {
        Some(Utc::now())
    }
}

/// Cabinet local time for the configured offset and daylight saving mode
///
/// Automatic DST follows the zone's rules; otherwise the fixed offset from
/// the settings applies, plus an hour when DST is forced on.
pub fn local_time(utc: DateTime<Utc>, settings: &DeviceSettings, zone: Tz) -> NaiveDateTime {
    match settings.dst_mode {
        DstMode::Auto => utc.with_timezone(&zone).naive_local(),
        DstMode::On | DstMode::Off => {
            let mut offset_secs = (settings.time_zone_hours * 3600.0).round() as i64;
            if settings.dst_mode == DstMode::On {
                offset_secs += 3600;
            }
            utc.naive_utc() + ChronoDuration::seconds(offset_secs)
        }
    }
}

/// Which readings failed on the last poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorFaults {
    pub power: bool,
    pub temperature: bool,
    pub battery: bool,
    pub mains: bool,
    pub hub: bool,
}

impl SensorFaults {
    pub fn any(&self) -> bool {
        self.power || self.temperature || self.battery || self.mains || self.hub
    }
}

/// Everything the controller sees of the hardware in one tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorFrame {
    pub volts: f32,
    pub amps: f32,
    pub temperature_c: f32,
    pub mains_present: bool,
    pub battery: BatteryStatus,
    pub hub: Option<HubStatus>,
    pub faults: SensorFaults,
}

impl SensorFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mains(mut self, present: bool) -> Self {
        self.mains_present = present;
        self
    }

    pub fn with_power(mut self, volts: f32, amps: f32) -> Self {
        self.volts = volts;
        self.amps = amps;
        self
    }

    pub fn with_temperature(mut self, celsius: f32) -> Self {
        self.temperature_c = celsius;
        self
    }

    pub fn with_hub(mut self, hub: HubStatus) -> Self {
        self.hub = Some(hub);
        self
    }
}

/// Meter calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub amps_gain: f32,
    pub amps_offset: f32,
    pub amps_deadband: f32,
    pub volts_floor: f32,
    pub volts_clamp: f32,
    pub temperature_offset_c: f32,
}

impl Calibration {
    pub fn from_config(config: &SensorConfig) -> Self {
        Self {
            amps_gain: config.amps_gain,
            amps_offset: config.amps_offset,
            amps_deadband: config.amps_deadband,
            volts_floor: config.volts_floor,
            volts_clamp: config.volts_clamp,
            temperature_offset_c: config.temperature_offset_c,
        }
    }

    /// Apply calibration to a raw meter reading
    ///
    /// Current is only meaningful while the relays are energised; otherwise
    /// it reads as zero.
    pub fn apply(&self, raw: PowerReading, relays_energised: bool) -> PowerReading {
        let volts = if raw.volts < self.volts_floor { 0.0 } else { raw.volts };
        let mut amps = raw.amps - self.amps_offset;
        if volts == 0.0 || amps.abs() <= self.amps_deadband {
            amps = 0.0;
        } else {
            amps *= self.amps_gain;
        }
        PowerReading {
            volts: volts.min(self.volts_clamp),
            amps: if relays_energised { amps.max(0.0) } else { 0.0 },
        }
    }
}

/// Polls a [`PowerMonitor`] and keeps the last good value of each reading
pub struct SensorSampler {
    calibration: Calibration,
    last: SensorFrame,
    logger: StructuredLogger,
}

impl SensorSampler {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            calibration: Calibration::from_config(config),
            last: SensorFrame::default(),
            logger: get_logger("sensors"),
        }
    }

    /// Replace the meter gain, e.g. with the factor held in the settings
    pub fn set_gain(&mut self, gain: f32) {
        if gain > 0.0 {
            self.calibration.amps_gain = gain;
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn last(&self) -> &SensorFrame {
        &self.last
    }

    /// Only the mains input; used while asleep
    pub async fn poll_mains(&mut self, monitor: &dyn PowerMonitor) -> bool {
        match monitor.is_mains_present().await {
            Ok(present) => {
                self.last.mains_present = present;
                self.last.faults.mains = false;
            }
            Err(e) => {
                self.logger.warn(&format!("Mains sense failed: {}", e));
                self.last.faults.mains = true;
            }
        }
        self.last.mains_present
    }

    /// Read every sensor once
    pub async fn poll(
        &mut self,
        monitor: &dyn PowerMonitor,
        relays_energised: bool,
    ) -> SensorFrame {
        let mut faults = SensorFaults::default();

        match monitor.read_power().await {
            Ok(raw) => {
                let reading = self.calibration.apply(raw, relays_energised);
                self.last.volts = reading.volts;
                self.last.amps = reading.amps;
            }
            Err(e) => {
                self.logger.warn(&format!("Power meter read failed: {}", e));
                faults.power = true;
                if !relays_energised {
                    self.last.amps = 0.0;
                }
            }
        }

        match monitor.read_temperature().await {
            Ok(t) => self.last.temperature_c = t - self.calibration.temperature_offset_c,
            Err(e) => {
                self.logger.warn(&format!("Temperature read failed: {}", e));
                faults.temperature = true;
            }
        }

        match monitor.read_battery().await {
            Ok(b) => self.last.battery = b,
            Err(e) => {
                self.logger.warn(&format!("Battery read failed: {}", e));
                faults.battery = true;
            }
        }

        match monitor.is_mains_present().await {
            Ok(present) => self.last.mains_present = present,
            Err(e) => {
                self.logger.warn(&format!("Mains sense failed: {}", e));
                faults.mains = true;
            }
        }

        match monitor.read_hub().await {
            Ok(hub) => self.last.hub = hub,
            Err(e) => {
                self.logger.warn(&format!("Hub read failed: {}", e));
                faults.hub = true;
            }
        }

        if faults.any() && !self.last.faults.any() {
            self.logger.error("Sensor fault raised, holding last known values");
        }
        self.last.faults = faults;
        self.last.clone()
    }
}

/// Edge reported by the [`OverheatDetector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverheatEdge {
    None,
    BecameHot,
    Cooled,
}

/// Over-temperature latch with hysteresis
#[derive(Debug, Clone, Copy, Default)]
pub struct OverheatDetector {
    hot: bool,
}

impl OverheatDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_hot(&self) -> bool {
        self.hot
    }

    /// Latches at `max_c` and releases below `max_c - 10`
    pub fn update(&mut self, temperature_c: f32, max_c: u32) -> OverheatEdge {
        let max = max_c as f32;
        if !self.hot && temperature_c >= max {
            self.hot = true;
            OverheatEdge::BecameHot
        } else if self.hot && temperature_c < max - OVERHEAT_HYSTERESIS_C {
            self.hot = false;
            OverheatEdge::Cooled
        } else {
            OverheatEdge::None
        }
    }
}
