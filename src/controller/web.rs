//! Web-command transitional states
//!
//! Each one sends its acknowledgement, closes whatever the previous steady
//! state was doing and falls through to the state the command asked for.

use super::relays::{Activity, RelayContext};
use super::{Controller, ExitSignal};
use crate::telemetry::{EventKind, TelemetryEvent};
use crate::types::{ResumeCause, RunState, SmartPhase, ViewState};

impl Controller {
    pub(super) fn web_command(&mut self) {
        use RunState::*;
        let prev = self.prev_state;
        match self.run_state {
            WebStandby => {
                self.leave_auto();
                self.close_previous(prev);
                self.acknowledge(EventKind::WebStandby, ViewState::Standby, "Web Cmd Standby");
                self.set_state(GoToStandby);
            }
            WebTimedOn => {
                self.start_by_command(prev, EventKind::WebTimedOn, ViewState::TimedOn, GoToTimedOn);
            }
            WebAlwaysOn => {
                self.start_by_command(prev, EventKind::WebAlwaysOn, ViewState::On, GoToAlwaysOn);
            }
            WebChargedOn => {
                self.start_by_command(
                    prev,
                    EventKind::WebSmartCharge,
                    ViewState::ChargedOn,
                    GoToChargedOn,
                );
            }
            WebChargedOnUsbC => {
                self.start_by_command(
                    prev,
                    EventKind::WebSmartCharge,
                    ViewState::ChargedOnUsbC,
                    GoToChargedOnUsbC,
                );
            }
            WebAuto => {
                self.settings.is_auto = true;
                self.persist_settings();
                self.acknowledge(EventKind::WebAuto, ViewState::AutoOff, "Web Cmd Auto");
                self.close_previous(prev);
                self.auto_announce_off = true;
                self.set_state(GoToAuto);
            }
            WebSmartAuto => {
                let event = TelemetryEvent::new(EventKind::WebSmartAutoOn)
                    .run(prev.view())
                    .power(self.power_state)
                    .auto(true)
                    .context("Enable");
                self.emit(event);
                self.settings.is_smart_monitoring = true;
                self.persist_settings();
                self.period.mark_schedule_changed();
                self.set_state(prev);
            }
            WebSmartExit => {
                self.close_previous(prev);
                let event = TelemetryEvent::new(EventKind::WebSmartAutoStop)
                    .run(ViewState::Standby)
                    .power(self.power_state)
                    .auto(false)
                    .context("Disable");
                self.emit(event);
                self.settings.is_smart_monitoring = false;
                self.persist_settings();
                let next = match prev {
                    TimedOn | AlwaysOn | ChargedOn | ChargedOnAuto | ChargedOnUsbC
                    | ChargedOnUsbCAuto => GoToStandby,
                    other => other,
                };
                self.set_state(next);
            }
            WebRestart => {
                self.settings.is_auto = false;
                self.settings.is_smart_monitoring = false;
                self.settings.resume_cause = ResumeCause::WebCommand;
                self.persist_settings();
                self.acknowledge(EventKind::WebRestart, ViewState::Standby, "Web Restart");
                self.set_state(Restart);
            }
            WebFactoryReset => {
                self.logger.warn("Factory reset requested");
                self.settings = self.settings.factory_reset();
                self.settings.resume_cause = ResumeCause::HardReset;
                self.persist_settings();
                self.refresh_engine();
                self.acknowledge(EventKind::WebRestart, ViewState::Standby, "Web Factory Reset");
                self.set_state(Restart);
            }
            WebHibernate => {
                self.settings.resume_cause = ResumeCause::Hibernate;
                self.persist_settings();
                self.snapshot = self.current_snapshot(ResumeCause::Hibernate, prev);
                self.persist_snapshot();
                let event = TelemetryEvent::new(EventKind::WebRestart)
                    .connected(false)
                    .run(ViewState::Sleeping)
                    .power(self.power_state)
                    .context("Web Hibernate");
                self.emit(event);
                self.out.exit = Some(ExitSignal::Hibernate);
                self.set_state(Sleeping);
                self.sleep_requested = true;
                self.exit_signalled = true;
            }
            _ => {}
        }
    }

    fn start_by_command(
        &mut self,
        prev: RunState,
        kind: EventKind,
        view: ViewState,
        next: RunState,
    ) {
        self.leave_auto();
        let text = match kind {
            EventKind::WebTimedOn => "Web Cmd Timed On",
            EventKind::WebAlwaysOn => "Web Cmd Always On",
            _ => "Web Cmd Smart Charge",
        };
        self.acknowledge(kind, view, text);
        self.close_previous(prev);
        self.heartbeat.suppress(self.now);
        self.set_state(next);
    }

    /// A manual start takes the cabinet out of auto control
    fn leave_auto(&mut self) {
        if self.settings.is_auto {
            self.settings.is_auto = false;
            self.persist_settings();
        }
    }

    fn acknowledge(&mut self, kind: EventKind, view: ViewState, text: &str) {
        self.logger.info(&format!("Command acknowledged: {}", text));
        let event = TelemetryEvent::new(kind)
            .run(view)
            .power(self.power_state)
            .temperature(self.frame.temperature_c)
            .context(text);
        self.emit(event);
    }

    /// Gracefully end the steady state a command interrupted
    pub(super) fn close_previous(&mut self, prev: RunState) {
        use RunState::*;
        let activity = match prev {
            AutoOn | AutoOff => Activity::Auto,
            TimedOn => Activity::Timed,
            AlwaysOn => Activity::Continuous,
            GoToChargedOn | ChargedOn | ChargedOnAuto => Activity::SmartAc,
            GoToChargedOnUsbC | ChargedOnUsbC | ChargedOnUsbCAuto => Activity::SmartUsbC,
            _ => return,
        };
        self.minute_timer.stop();
        self.smart_phase = SmartPhase::Idle;
        if self.settings.has_resume() {
            self.clean_up_resume();
        }
        if self.relays_on {
            self.relays_off(RelayContext::Command(activity));
        }
    }
}
