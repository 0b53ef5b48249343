//! Relay switching and the start/end records that go with it

use super::{Controller, RelayCommand};
use crate::session::SessionStatus;
use crate::telemetry::{EventKind, TelemetryEvent};
use crate::types::{ChargeState, PowerState, RunState, ViewState};

/// What the relays are powering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Continuous,
    Timed,
    Auto,
    SmartAc,
    SmartUsbC,
}

impl Activity {
    /// Activity of a steady state, if it powers the outlets
    pub fn of(state: RunState) -> Option<Self> {
        use RunState::*;
        match state {
            AlwaysOn => Some(Activity::Continuous),
            TimedOn => Some(Activity::Timed),
            AutoOn | AutoOff => Some(Activity::Auto),
            ChargedOn | ChargedOnAuto | GoToChargedOn | GoToChargedOnAuto => {
                Some(Activity::SmartAc)
            }
            ChargedOnUsbC | ChargedOnUsbCAuto | GoToChargedOnUsbC | GoToChargedOnUsbCAuto => {
                Some(Activity::SmartUsbC)
            }
            _ => None,
        }
    }

    pub fn is_smart(self) -> bool {
        matches!(self, Activity::SmartAc | Activity::SmartUsbC)
    }

    fn start_kind(self) -> EventKind {
        match self {
            Activity::Continuous => EventKind::ContinuousStart,
            Activity::Timed => EventKind::TimedStart,
            Activity::Auto => EventKind::ScheduleStart,
            Activity::SmartAc | Activity::SmartUsbC => EventKind::SmartStart,
        }
    }

    fn end_kind(self) -> EventKind {
        match self {
            Activity::Continuous => EventKind::ContinuousEnd,
            Activity::Timed => EventKind::TimedEnd,
            Activity::Auto => EventKind::ScheduleEnd,
            Activity::SmartAc | Activity::SmartUsbC => EventKind::SmartEnd,
        }
    }

    /// View reported once the activity has ended
    fn resting_view(self) -> ViewState {
        match self {
            Activity::Auto => ViewState::AutoOff,
            _ => ViewState::Standby,
        }
    }
}

/// Why the relays are switching; decides the record that is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayContext {
    /// Ordinary start or end
    Normal(Activity),
    /// Suspend for mains loss or overheat, and the resume that follows
    Suspend(Activity),
    /// Smart charge hit its maximum on-time
    MaxTime(Activity),
    /// Stopped by a remote command
    Command(Activity),
    /// Closed so a scheduled smart charge can start
    Superseded(Activity),
    /// Auto control lost its clock
    NoValidTime,
    /// Auto control entered with the schedule off
    ScheduleOff,
    /// No record
    Silent,
}

impl RelayContext {
    fn end_text(self) -> &'static str {
        use Activity::*;
        match self {
            RelayContext::Normal(Continuous) | RelayContext::Normal(Auto) => "Normal",
            RelayContext::Normal(Timed) => "Normal Period",
            RelayContext::Normal(SmartAc) | RelayContext::Normal(SmartUsbC) => "Extra time ended",
            RelayContext::Command(SmartAc) | RelayContext::Command(SmartUsbC) => "Normal end",
            RelayContext::Command(_) => "Web Cmd Standby",
            RelayContext::Suspend(_) => "Suspended Mains Off or Overheated",
            RelayContext::MaxTime(_) => "Stopped at Maximum Time Charging",
            RelayContext::Superseded(_) => "Stopped for Auto Smart Charge",
            RelayContext::NoValidTime => "Suspended as no valid time",
            RelayContext::ScheduleOff => "Auto Control with schedule off",
            RelayContext::Silent => "",
        }
    }

    fn session_status(self) -> SessionStatus {
        match self {
            RelayContext::Normal(_) | RelayContext::MaxTime(_) | RelayContext::ScheduleOff => {
                SessionStatus::Completed
            }
            RelayContext::Command(_) | RelayContext::Superseded(_) => SessionStatus::Stopped,
            RelayContext::Suspend(_) | RelayContext::NoValidTime | RelayContext::Silent => {
                SessionStatus::Interrupted
            }
        }
    }
}

impl Controller {
    /// Energise the outlets and announce the start
    pub(crate) fn relays_on(&mut self, context: RelayContext) {
        self.relays_on = true;
        if !self.charge_state.is_active() {
            self.charge_state = ChargeState::Charging;
        }
        self.refresh_power_state();
        let mask = self.relay_mask();
        self.out.relays.push(RelayCommand::Energise(mask));

        let minutes = self.active_minutes();
        let resumed = matches!(context, RelayContext::Suspend(_)) && self.sessions.resume(minutes);
        if !resumed {
            if self.sessions.current_session.is_some() {
                let _ = self
                    .sessions
                    .end_session(SessionStatus::Stopped, "Replaced by new session");
            }
            if let Err(e) = self.sessions.start_session(self.run_state, minutes) {
                self.logger.warn(&format!("Session not started: {}", e));
            }
        }
        self.logger
            .set_session_id(self.sessions.current_id().map(str::to_string));

        let (activity, text) = match context {
            RelayContext::Suspend(Activity::SmartAc) => {
                (Activity::SmartAc, "Resume Warm-up Smart AC")
            }
            RelayContext::Suspend(a) => (a, "Resume After Suspend"),
            RelayContext::Normal(Activity::SmartAc) => {
                (Activity::SmartAc, "Normal Warm-up Smart AC")
            }
            RelayContext::Normal(Activity::SmartUsbC) => {
                (Activity::SmartUsbC, "Normal Start USB-C")
            }
            RelayContext::Normal(a) => (a, "Normal Start"),
            _ => return,
        };
        self.logger
            .info(&format!("Relays on for {:?}: {}", activity, text));

        let mut event = TelemetryEvent::new(activity.start_kind())
            .run(self.view())
            .power(self.power_state)
            .amps(self.frame.amps)
            .volts(self.frame.volts)
            .temperature(self.frame.temperature_c)
            .charge(self.charge_state)
            .context(text);
        if matches!(context, RelayContext::Suspend(_)) {
            event = event.minutes(minutes);
        }
        self.emit(event);
    }

    /// Open every outlet at once and announce why
    pub(crate) fn relays_off(&mut self, context: RelayContext) {
        let charge_at_end = self.charge_state;
        let minutes = self.active_minutes();
        self.relays_on = false;
        self.out.relays.push(RelayCommand::OpenAll);
        self.charge_state = ChargeState::NotCharging;
        self.refresh_power_state();

        if matches!(context, RelayContext::Suspend(_)) {
            self.sessions.suspend();
        } else if self.sessions.current_session.is_some() {
            let _ = self
                .sessions
                .end_session(context.session_status(), context.end_text());
            self.logger.set_session_id(None);
        }

        let event = match context {
            RelayContext::Silent => return,
            RelayContext::Suspend(a) => TelemetryEvent::new(a.end_kind())
                .run(self.view())
                .power(self.power_state)
                .minutes(minutes)
                .temperature(self.frame.temperature_c)
                .charge(charge_at_end),
            RelayContext::MaxTime(a) => TelemetryEvent::new(a.end_kind())
                .run(ViewState::Standby)
                .power(PowerState::MainsOn)
                .minutes(self.settings.max_time_on_mins)
                .temperature(self.frame.temperature_c)
                .charge(charge_at_end),
            RelayContext::Superseded(a) => TelemetryEvent::new(a.end_kind())
                .run(ViewState::Standby)
                .power(PowerState::MainsOn)
                .minutes(minutes),
            RelayContext::Normal(a) | RelayContext::Command(a) => {
                let charge = if a.is_smart() {
                    ChargeState::Ended
                } else {
                    ChargeState::NotCharging
                };
                TelemetryEvent::new(a.end_kind())
                    .run(a.resting_view())
                    .power(PowerState::MainsOn)
                    .minutes(minutes)
                    .temperature(self.frame.temperature_c)
                    .charge(charge)
            }
            RelayContext::NoValidTime => TelemetryEvent::new(EventKind::ScheduleExpired)
                .run(ViewState::Standby)
                .power(self.power_state),
            RelayContext::ScheduleOff => TelemetryEvent::new(EventKind::ScheduleEnd)
                .run(ViewState::AutoOff)
                .power(self.power_state)
                .temperature(self.frame.temperature_c),
        };
        self.logger
            .info(&format!("Relays off: {} ({:?})", context.end_text(), event.kind));
        let event = event
            .amps(0.0)
            .volts(self.frame.volts)
            .context(context.end_text());
        self.emit(event);
    }
}
