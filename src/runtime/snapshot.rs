use crate::controller::Controller;
use serde::{Deserialize, Serialize};

/// Status published after every tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: String,
    pub run_state: String,
    pub run_code: u8,
    /// Externally visible state code
    pub view: u8,
    pub power: u8,
    pub charge: u8,
    pub smart_phase: String,
    pub relays_energised: bool,
    pub charge_minutes: u32,
    pub timer_minutes: u32,
    pub volts: f32,
    pub amps: f32,
    pub temperature_c: f32,
    pub mains_present: bool,
    pub overheated: bool,
    pub sensor_fault: bool,
    pub is_auto: bool,
    pub smart_monitoring: bool,
    pub asleep: bool,
    /// Latest charge-rate slope from the engine
    pub charge_slope: f32,
    pub session: serde_json::Value,
    pub tick_duration_ms: u64,
    pub total_ticks: u64,
    pub overrun_count: u64,
}

pub(super) fn build(
    controller: &Controller,
    tick_duration_ms: u64,
    total_ticks: u64,
    overrun_count: u64,
) -> StatusSnapshot {
    let frame = controller.last_frame();
    let settings = controller.settings();
    StatusSnapshot {
        timestamp: chrono::Utc::now().to_rfc3339(),
        run_state: format!("{:?}", controller.run_state()),
        run_code: controller.run_state().code(),
        view: controller.view().code(),
        power: controller.power_state().code(),
        charge: controller.charge_state().code(),
        smart_phase: format!("{:?}", controller.smart_phase()),
        relays_energised: controller.relays_energised(),
        charge_minutes: controller.charge_minutes(),
        timer_minutes: controller.timer_minutes(),
        volts: frame.volts,
        amps: frame.amps,
        temperature_c: frame.temperature_c,
        mains_present: frame.mains_present,
        overheated: controller.is_overheated(),
        sensor_fault: frame.faults.any(),
        is_auto: settings.is_auto,
        smart_monitoring: settings.is_smart_monitoring,
        asleep: controller.is_asleep(),
        charge_slope: controller.engine().last_slope(),
        session: controller.sessions().get_session_stats(),
        tick_duration_ms,
        total_ticks,
        overrun_count,
    }
}
