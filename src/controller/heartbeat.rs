use super::Controller;
use crate::telemetry::{EventKind, TelemetryEvent};
use crate::types::RunState;
use std::time::Duration;

impl Controller {
    /// Send the periodic status record when it falls due
    pub(super) fn check_heartbeat(&mut self) {
        if matches!(self.run_state, RunState::Sleeping | RunState::GoToSleep) || !self.started {
            return;
        }
        let interval = match self.run_state {
            RunState::Standby | RunState::AutoOff => self.timing.slow_heartbeat_ms,
            _ => self.timing.heartbeat_ms,
        };
        let due = self.heartbeat.due(
            self.now,
            Duration::from_millis(interval),
            Duration::from_millis(self.timing.initial_heartbeat_delay_ms),
        );
        if due {
            let event = self.heartbeat_record();
            self.emit(event);
        }
    }

    fn heartbeat_record(&self) -> TelemetryEvent {
        let frame = &self.frame;
        let devices = frame
            .hub
            .as_ref()
            .map(|h| h.connected_devices() as u32)
            .unwrap_or_else(|| self.settings.device_count());

        let mut event = TelemetryEvent::new(EventKind::Heartbeat)
            .run(self.view())
            .power(self.power_state)
            .temperature(frame.temperature_c)
            .auto(self.settings.is_smart_monitoring)
            .charge(self.charge_state)
            .amps(frame.amps)
            .volts(frame.volts);
        if self.relays_on {
            event = event.minutes(self.active_minutes());
        }
        event
            .field("MCD", devices)
            .field("VBT", frame.battery.volts)
            .field("CHG", u8::from(frame.battery.is_charging))
            .field("CHD", u8::from(frame.battery.is_charged))
            .field("BFT", u8::from(frame.battery.is_fault))
            .field("RBF", u8::from(frame.battery.fault_recoverable))
    }
}
