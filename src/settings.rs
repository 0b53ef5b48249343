//! Persisted device settings
//!
//! The policy record the controller runs against: timers, smart-charge
//! thresholds, the weekly schedule and resume bookkeeping. It is created with
//! defaults on first boot, changed only through remote parameters and always
//! rewritten as a whole.

use crate::error::{Result, TrolleyError};
use crate::schedule::ScheduleBitmask;
use crate::types::{DstMode, MAX_RELAYS, PowerOnPolicy, ResumeCause, RunState, ScheduleKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Record layout version; bump whenever the structure changes
pub const SETTINGS_MAGIC: u32 = 0x99DE_A128;

/// Longest accepted item name
pub const MAX_NAME_LEN: usize = 7;

/// Most devices a single outlet may carry
pub const MAX_DEVICES_PER_OUTLET: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Default timed-on duration
    pub timer_period_mins: u32,
    /// Offset from UTC in hours
    pub time_zone_hours: f32,
    pub dst_mode: DstMode,
    pub item_name: String,
    pub serial_number: String,
    pub product_code: String,

    pub schedule: ScheduleBitmask,
    pub schedule_kind: ScheduleKind,
    /// Last day on which the schedule applies
    pub schedule_valid_until: NaiveDate,

    /// Per-device current below which rate monitoring starts (A)
    pub min_current_per_device: f32,
    /// Slope magnitude below which charging is done
    pub min_charge_rate: f32,
    pub max_monitoring_mins: u32,
    /// Extra minutes on charge after done
    pub extra_charging_mins: u32,
    pub warmup_mins: u32,
    /// Absolute cap on a smart charge session
    pub max_time_on_mins: u32,
    pub max_temp_c: u32,

    pub spaces_per_outlet: [u8; MAX_RELAYS],
    pub devices_per_outlet: [u8; MAX_RELAYS],

    /// Raw policy code as received; see [`DeviceSettings::power_on_policy`]
    pub power_on_code: u8,
    pub is_auto: bool,
    pub is_smart_monitoring: bool,
    pub hub_board: bool,
    pub power_meter_factor: f32,
    pub local_mode: bool,

    /// Minutes already served by the interrupted session, if one is pending
    pub resume_minutes: Option<u32>,
    pub resume_cause: ResumeCause,
    pub resume_state: RunState,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            timer_period_mins: 180,
            time_zone_hours: 0.0,
            dst_mode: DstMode::Auto,
            item_name: "Trolley".to_string(),
            serial_number: String::new(),
            product_code: String::new(),
            schedule: ScheduleBitmask::default(),
            schedule_kind: ScheduleKind::None,
            schedule_valid_until: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            min_current_per_device: 0.01,
            min_charge_rate: 0.01,
            max_monitoring_mins: 10,
            extra_charging_mins: 1,
            warmup_mins: 2,
            max_time_on_mins: 300,
            max_temp_c: 45,
            spaces_per_outlet: [0; MAX_RELAYS],
            devices_per_outlet: [0; MAX_RELAYS],
            power_on_code: PowerOnPolicy::Continuous.code(),
            is_auto: false,
            is_smart_monitoring: false,
            hub_board: false,
            power_meter_factor: 0.9456,
            local_mode: false,
            resume_minutes: None,
            resume_cause: ResumeCause::None,
            resume_state: RunState::Startup,
        }
    }
}

impl DeviceSettings {
    pub fn power_on_policy(&self) -> PowerOnPolicy {
        PowerOnPolicy::from_code(self.power_on_code)
    }

    /// Devices the engine should expect on charge
    ///
    /// Uses the devices-per-outlet figures, or one device per space when
    /// those have not been entered.
    pub fn device_count(&self) -> u32 {
        let devices: u32 = self.devices_per_outlet.iter().map(|d| u32::from(*d)).sum();
        if devices > 0 {
            devices
        } else {
            self.spaces_per_outlet.iter().map(|s| u32::from(*s)).sum()
        }
    }

    /// Whether a resume is pending
    pub fn has_resume(&self) -> bool {
        self.resume_minutes.is_some()
    }

    /// Forget the interrupted session once it has been picked up again
    pub fn clear_resume(&mut self) {
        self.resume_minutes = None;
        self.resume_state = RunState::Startup;
        self.resume_cause = ResumeCause::None;
    }

    /// Defaults, keeping the cabinet's identity
    pub fn factory_reset(&self) -> Self {
        Self {
            item_name: self.item_name.clone(),
            serial_number: self.serial_number.clone(),
            product_code: self.product_code.clone(),
            hub_board: self.hub_board,
            spaces_per_outlet: self.spaces_per_outlet,
            ..Self::default()
        }
    }

    /// Check every field against its accepted range
    pub fn validate(&self) -> Result<()> {
        fn range<T: PartialOrd + std::fmt::Display>(
            field: &str,
            value: T,
            lo: T,
            hi: T,
        ) -> Result<()> {
            if value < lo || value > hi {
                return Err(TrolleyError::validation(
                    field.to_string(),
                    format!("{} outside {}..={}", value, lo, hi),
                ));
            }
            Ok(())
        }

        range("timer_period_mins", self.timer_period_mins, 5, 600)?;
        range("time_zone_hours", self.time_zone_hours, -12.0, 14.0)?;
        range("min_current_per_device", self.min_current_per_device, 0.001, 0.06)?;
        range("max_monitoring_mins", self.max_monitoring_mins, 0, 60)?;
        range("extra_charging_mins", self.extra_charging_mins, 0, 30)?;
        range("warmup_mins", self.warmup_mins, 1, 10)?;
        range("max_time_on_mins", self.max_time_on_mins, 5, 600)?;
        range("max_temp_c", self.max_temp_c, 1, 99)?;

        if self.min_charge_rate <= 0.0 || self.min_charge_rate > 0.06 {
            return Err(TrolleyError::validation(
                "min_charge_rate",
                "Must be in (0, 0.06]",
            ));
        }

        if self.item_name.is_empty() || self.item_name.chars().count() > MAX_NAME_LEN {
            return Err(TrolleyError::validation(
                "item_name",
                "Must be 1 to 7 characters",
            ));
        }

        if self
            .devices_per_outlet
            .iter()
            .any(|d| *d > MAX_DEVICES_PER_OUTLET)
        {
            return Err(TrolleyError::validation(
                "devices_per_outlet",
                "Each outlet takes at most 10 devices",
            ));
        }

        Ok(())
    }
}
