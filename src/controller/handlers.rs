//! Handlers for the startup, standby, timed, continuous, auto and sleep
//! states, plus the shared suspend path

use super::relays::{Activity, RelayContext};
use super::transitions::is_resumable;
use super::{Controller, ExitSignal, TickOutput};
use crate::persistence::ResumeSnapshot;
use crate::schedule;
use crate::telemetry::{EventKind, TelemetryEvent};
use crate::types::{ChargeState, PowerOnPolicy, ResumeCause, RunState, SmartPhase, ViewState};
use std::time::Duration;

impl Controller {
    pub(super) fn startup(&mut self) {
        self.started = true;
        if self.frame.hub.is_some() || self.snapshot.hub_present {
            self.settings.hub_board = true;
        }

        let event = TelemetryEvent::new(EventKind::Startup)
            .run(ViewState::Standby)
            .power(self.power_state)
            .policy(self.settings.power_on_code)
            .temperature(self.frame.temperature_c)
            .context(format!("{} v{}", self.settings.item_name, self.version))
            .field("RR", self.settings.resume_cause.code())
            .field("RS", self.snapshot.cause.code())
            .field("T", self.settings.timer_period_mins)
            .field("MX", self.settings.max_time_on_mins)
            .field("MT", self.settings.max_temp_c)
            .field("ST", self.settings.schedule_kind.tag())
            .field("TZ", f64::from(self.settings.time_zone_hours))
            .field("DST", self.settings.dst_mode.code())
            .field("HUB", u8::from(self.settings.hub_board))
            .field("FW", self.version.clone());
        self.emit(event);

        if !self.snapshot.is_cleared() {
            self.logger.info(&format!(
                "Boot after {:?}, previous state {}",
                self.snapshot.cause, self.snapshot.previous_run_state
            ));
            self.snapshot = ResumeSnapshot::cleared();
            self.persist_snapshot();
        }
        self.persist_settings();

        let next = self.power_on_state();
        self.logger.info(&format!(
            "Power-on policy {:?} selects {}",
            self.settings.power_on_policy(),
            next
        ));
        self.set_state(next);
    }

    /// Entering state chosen by the power-on policy
    pub(crate) fn power_on_state(&self) -> RunState {
        use RunState::*;
        match self.settings.power_on_policy() {
            PowerOnPolicy::Last => match self.settings.resume_state {
                Standby => GoToStandby,
                TimedOn => GoToTimedOn,
                AlwaysOn => GoToAlwaysOn,
                AutoOff | AutoOn => GoToAuto,
                ChargedOn | ChargedOnAuto => GoToChargedOn,
                ChargedOnUsbC | ChargedOnUsbCAuto => GoToChargedOnUsbC,
                _ => GoToStandby,
            },
            PowerOnPolicy::Standby => GoToStandby,
            PowerOnPolicy::TimedOn => GoToTimedOn,
            PowerOnPolicy::Continuous => GoToAlwaysOn,
            PowerOnPolicy::SmartAc => GoToChargedOn,
            PowerOnPolicy::SmartUsb => GoToChargedOnUsbC,
        }
    }

    pub(super) fn go_to_standby(&mut self) {
        if !self.frame.mains_present {
            self.set_state(RunState::GoToSleep);
            return;
        }
        if self.resuming_from_power_loss() {
            self.emit_mains_restored();
        }
        self.minute_timer.stop();
        if self.relays_on {
            self.relays_off(RelayContext::Silent);
        }
        self.charge_state = ChargeState::NotCharging;
        self.smart_phase = SmartPhase::Idle;
        self.refresh_power_state();
        self.settings.resume_minutes = None;
        self.settings.resume_cause = ResumeCause::None;
        self.persist_settings();
        self.prev_state = RunState::Standby;
        self.set_state(RunState::Standby);
    }

    /// Mains went away with nothing running
    pub(crate) fn standby_mains_lost(&mut self) {
        self.emit_mains_off();
        self.settings.resume_state = RunState::Standby;
        self.settings.resume_cause = ResumeCause::MainsOff;
        self.settings.resume_minutes = None;
        self.persist_settings();
        self.prev_state = RunState::Standby;
        self.set_state(RunState::GoToSleep);
    }

    /// Open relays and record what is needed to pick the session up again
    pub(crate) fn suspend(&mut self, cause: ResumeCause) {
        let Some(activity) = Activity::of(self.run_state) else {
            return;
        };
        let minutes = self.active_minutes();
        self.minute_timer.stop();
        if cause == ResumeCause::MainsOff {
            self.emit_mains_off();
        }
        if cause == ResumeCause::Overheat && activity == Activity::Auto {
            self.settings.is_auto = false;
        }

        self.settings.resume_cause = cause;
        self.settings.resume_minutes = Some(minutes);
        self.settings.resume_state = self.run_state;
        self.persist_settings();
        self.logger.info(&format!(
            "Suspended {} at minute {} ({:?})",
            self.run_state, minutes, cause
        ));

        if self.relays_on {
            self.relays_off(RelayContext::Suspend(activity));
        }
    }

    pub(super) fn go_to_timed_on(&mut self) {
        if !self.frame.mains_present {
            self.set_state(RunState::GoToStandby);
            return;
        }
        self.minute_timer.stop();
        self.timer_minutes = self.settings.resume_minutes.unwrap_or(0);
        self.timer_period = self.settings.timer_period_mins;
        self.heartbeat.delay_initial(self.now);
        self.set_state(RunState::TimedOn);
    }

    pub(super) fn timed_on(&mut self) {
        if self.minute_timer.is_active() && self.timer_minutes >= self.timer_period {
            self.minute_timer.stop();
            self.settings.resume_minutes = None;
            self.settings.resume_cause = ResumeCause::None;
            self.persist_settings();
            self.relays_off(RelayContext::Normal(Activity::Timed));
            self.set_state(RunState::GoToStandby);
            return;
        }

        if !self.minute_timer.is_active() && self.mains_ok() {
            let mut context = RelayContext::Normal(Activity::Timed);
            if let Some(minutes) = self.settings.resume_minutes {
                if self.resuming_from_power_loss() {
                    self.emit_mains_restored();
                }
                self.timer_minutes = minutes;
                context = RelayContext::Suspend(Activity::Timed);
                self.clean_up_resume();
            }
            self.minute_timer.start(self.now);
            self.heartbeat.suppress(self.now);
            self.relays_on(context);
        }
    }

    pub(super) fn go_to_always_on(&mut self) {
        // Continuous power waits here for mains
        if !self.frame.mains_present {
            return;
        }
        self.minute_timer.stop();
        self.charge_minutes = self.settings.resume_minutes.unwrap_or(0);
        self.heartbeat.delay_initial(self.now);
        self.set_state(RunState::AlwaysOn);
    }

    pub(super) fn always_on(&mut self) {
        self.prev_state = RunState::AlwaysOn;
        if self.minute_timer.is_active() || !self.mains_ok() {
            return;
        }

        let mut context = RelayContext::Normal(Activity::Continuous);
        match self.settings.resume_minutes {
            Some(minutes) => {
                if self.resuming_from_power_loss() {
                    self.emit_mains_restored();
                }
                self.charge_minutes = minutes;
                context = RelayContext::Suspend(Activity::Continuous);
                self.clean_up_resume();
            }
            None => self.charge_minutes = 0,
        }
        self.minute_timer.start(self.now);
        self.heartbeat.suppress(self.now);
        self.relays_on(context);
    }

    /// AutoOn and AutoOff: follow the on/off schedule
    pub(super) fn auto(&mut self) {
        let Some(now) = self.clock else {
            if !self.auto_time_invalid_reported {
                self.auto_time_invalid_reported = true;
                self.logger.warn("Auto control suspended, clock invalid");
                self.minute_timer.stop();
                self.relays_off(RelayContext::NoValidTime);
                let event = TelemetryEvent::new(EventKind::ScheduleEnd)
                    .run(ViewState::Standby)
                    .power(self.power_state)
                    .context("Suspended Time Invalid");
                self.emit(event);
            }
            return;
        };
        self.auto_time_invalid_reported = false;

        let decision = schedule::evaluate(
            Some(&now),
            &self.settings.schedule,
            self.settings.schedule_valid_until,
        );
        if decision.expired {
            self.minute_timer.stop();
            self.relays_off(RelayContext::Silent);
            let event = TelemetryEvent::new(EventKind::ScheduleExpired)
                .run(ViewState::Standby)
                .power(self.power_state)
                .context("Schedule Expired go to standby");
            self.emit(event);
            self.set_state(RunState::GoToStandby);
            return;
        }

        if decision.is_on {
            self.auto_announce_off = false;
            if self.mains_ok() && !self.relays_on {
                let mut context = RelayContext::Normal(Activity::Auto);
                match self.settings.resume_minutes {
                    Some(minutes) => {
                        if self.resuming_from_power_loss() {
                            self.emit_mains_restored();
                        }
                        self.charge_minutes = minutes;
                        context = RelayContext::Suspend(Activity::Auto);
                        self.clean_up_resume();
                    }
                    None => self.charge_minutes = 0,
                }
                self.set_state(RunState::AutoOn);
                self.minute_timer.start(self.now);
                self.heartbeat.suppress(self.now);
                self.relays_on(context);
                self.heartbeat.delay_initial(self.now);
            }
            return;
        }

        if self.relays_on {
            self.minute_timer.stop();
            self.relays_off(RelayContext::Normal(Activity::Auto));
            self.set_state(RunState::AutoOff);
        } else if self.mains_ok() {
            if self.settings.has_resume() {
                if self.resuming_from_power_loss() {
                    self.emit_mains_restored();
                }
                self.clean_up_resume();
            }
            self.charge_minutes = 0;
            self.set_state(RunState::AutoOff);
        }

        if self.auto_announce_off {
            self.auto_announce_off = false;
            self.relays_off(RelayContext::ScheduleOff);
        }
    }

    pub(super) fn go_to_sleep(&mut self) {
        if self.relays_on {
            self.relays_off(RelayContext::Silent);
        }
        self.minute_timer.stop();
        self.charge_state = ChargeState::NotCharging;
        self.refresh_power_state();
        let event = TelemetryEvent::new(EventKind::Sleep)
            .run(ViewState::Sleeping)
            .power(self.power_state)
            .temperature(self.frame.temperature_c)
            .context("Go to Sleep");
        self.emit(event);
        self.set_state(RunState::Sleeping);
    }

    pub(super) fn sleeping(&mut self) {
        if self.sleep_requested {
            return;
        }

        if self.frame.mains_present {
            // Mains came back before the sleep took hold
            self.heartbeat.force();
            self.resume_after_sleep();
            return;
        }

        let event = TelemetryEvent::new(EventKind::VariableChanged)
            .connected(false)
            .run(ViewState::Sleeping)
            .temperature(self.frame.temperature_c)
            .policy(self.settings.power_on_code)
            .context("Sleep until AC power restored");
        self.emit(event);

        self.settings.resume_cause = ResumeCause::MainsOff;
        self.persist_settings();
        self.snapshot = self.current_snapshot(ResumeCause::MainsOff, self.prev_state);
        self.persist_snapshot();
        self.logger.info(&format!(
            "Sleeping until mains returns, resume state {}",
            self.settings.resume_state
        ));
        self.sleep_requested = true;
        self.out.sleep = true;
    }

    /// Wake path, called by the runtime after the low-power wait
    ///
    /// `snapshot` is the resume record re-read from the store.
    pub fn on_wake(
        &mut self,
        snapshot: ResumeSnapshot,
        mains_present: bool,
        at: Duration,
    ) -> TickOutput {
        self.now = at;
        self.sleep_requested = false;
        self.snapshot = snapshot;
        self.frame.mains_present = mains_present;
        self.refresh_power_state();
        self.logger.info(&format!(
            "Woken, mains {}, snapshot cause {:?}",
            if mains_present { "present" } else { "absent" },
            self.snapshot.cause
        ));

        if mains_present {
            self.mains_off_since = None;
            self.heartbeat.force();
            self.resume_after_sleep();
        } else {
            self.settings.resume_cause = ResumeCause::DeepPowerDown;
            self.persist_settings();
            self.snapshot = self.current_snapshot(ResumeCause::DeepPowerDown, self.prev_state);
            self.persist_snapshot();
            self.sleep_requested = true;
            self.out.sleep = true;
        }
        self.take_output()
    }

    fn resume_after_sleep(&mut self) {
        let target = self.settings.resume_state;
        if self.settings.has_resume() {
            if is_resumable(target) {
                self.set_state(target);
            } else {
                self.report_diagnostic(&format!(
                    "Illegal resume state {}, falling back to standby",
                    target
                ));
                self.set_state(RunState::GoToStandby);
            }
        } else {
            self.set_state(RunState::GoToStandby);
        }
    }

    /// Abandon the current tick and restart, keeping enough state to
    /// resume what was running
    ///
    /// Used by the runtime when a tick overruns the watchdog bound.
    pub fn forced_reset(&mut self, cause: ResumeCause) -> TickOutput {
        if self.exit_signalled {
            return self.take_output();
        }
        let state = self.run_state;
        if is_resumable(state) {
            self.settings.resume_state = state;
            if self.relays_on {
                self.settings.resume_minutes = if state.is_smart_charge() {
                    Some(0)
                } else {
                    Some(self.active_minutes())
                };
            }
        }
        self.settings.resume_cause = cause;
        self.persist_settings();
        self.snapshot = self.current_snapshot(cause, state);
        self.persist_snapshot();
        self.report_diagnostic(&format!("Forced reset in {} ({:?})", state, cause));
        self.exit_signalled = true;
        self.out.exit = Some(ExitSignal::Restart);
        self.take_output()
    }

    pub(super) fn restart(&mut self) {
        if self.exit_signalled {
            return;
        }
        self.snapshot = if self.settings.resume_cause == ResumeCause::HardReset {
            ResumeSnapshot::cleared()
        } else {
            self.current_snapshot(self.settings.resume_cause, self.prev_state)
        };
        self.persist_snapshot();
        self.logger.info("Restart requested, resume record finalised");
        self.exit_signalled = true;
        self.out.exit = Some(ExitSignal::Restart);
    }
}
