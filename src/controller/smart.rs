//! Smart charge: AC and USB-C sessions that end when the devices are full,
//! and the background smart-start schedule that launches them

use super::Controller;
use super::relays::{Activity, RelayContext};
use crate::schedule::{self, SlotIndex};
use crate::sensors::HubStatus;
use crate::telemetry::{EventKind, TelemetryEvent};
use crate::types::{ChargeState, ResumeCause, RunState, SmartPhase};
use std::time::Duration;

impl Controller {
    /// Entering states for both smart charge flavours
    pub(super) fn go_to_smart(&mut self, usbc: bool, auto: bool) {
        if !self.frame.mains_present {
            if auto {
                let back = self.prev_state;
                self.set_state(back);
            } else {
                self.set_state(RunState::GoToStandby);
            }
            return;
        }
        if self.overheat.is_hot() {
            // Held here with relays open until the cabinet re-arms
            return;
        }

        if auto {
            self.close_for_auto_smart();
        }
        let activity = if usbc {
            Activity::SmartUsbC
        } else {
            Activity::SmartAc
        };
        let next = match (usbc, auto) {
            (false, false) => RunState::ChargedOn,
            (false, true) => RunState::ChargedOnAuto,
            (true, false) => RunState::ChargedOnUsbC,
            (true, true) => RunState::ChargedOnUsbCAuto,
        };
        self.set_state(next);
        self.start_smart_cycle(activity);
        if auto {
            self.prev_state = next;
        }
    }

    /// Close whatever ran before a scheduled smart start
    fn close_for_auto_smart(&mut self) {
        let activity = match self.prev_state {
            RunState::AlwaysOn => Activity::Continuous,
            RunState::TimedOn => Activity::Timed,
            RunState::ChargedOn => Activity::SmartAc,
            RunState::ChargedOnUsbC => Activity::SmartUsbC,
            _ => return,
        };
        self.minute_timer.stop();
        if self.settings.has_resume() {
            self.settings.clear_resume();
            self.persist_settings();
        }
        self.relays_off(RelayContext::Superseded(activity));
    }

    fn start_smart_cycle(&mut self, activity: Activity) {
        self.charge_minutes = 0;
        self.charge_state = ChargeState::NotCharging;
        self.engine.reset();
        self.smart_phase = if self.hub_mode() {
            SmartPhase::Charge
        } else {
            SmartPhase::WarmUp
        };
        self.last_current_sample = self.now;
        self.hub_check_at = self.now;
        self.heartbeat.suppress(self.now);
        self.relays_on(RelayContext::Normal(activity));
        self.heartbeat.delay_initial(self.now);
        self.minute_timer.start(self.now);
    }

    /// USB-C completion comes from the hub when one is fitted
    fn hub_mode(&self) -> bool {
        self.run_state.is_usbc() && self.settings.hub_board
    }

    pub(super) fn smart_charge(&mut self) {
        let Some(activity) = Activity::of(self.run_state) else {
            return;
        };

        if self.relays_on && self.charge_minutes >= self.settings.max_time_on_mins {
            self.logger.warn(&format!(
                "Maximum on-time of {} min reached",
                self.settings.max_time_on_mins
            ));
            self.minute_timer.stop();
            self.charge_state = ChargeState::Ended;
            self.relays_off(RelayContext::MaxTime(activity));
            self.finish_smart_cycle();
            return;
        }

        if !self.relays_on {
            if !self.mains_ok() {
                return;
            }
            if self.settings.has_resume() {
                // A smart session restarts its whole cycle after an interruption
                if self.resuming_from_power_loss() {
                    self.emit_mains_restored();
                }
                let restart = match self.run_state {
                    RunState::ChargedOnAuto => RunState::GoToChargedOnAuto,
                    RunState::ChargedOnUsbC => RunState::GoToChargedOnUsbC,
                    RunState::ChargedOnUsbCAuto => RunState::GoToChargedOnUsbCAuto,
                    _ => RunState::GoToChargedOn,
                };
                self.clean_up_resume();
                self.set_state(restart);
            } else {
                self.set_state(RunState::GoToStandby);
            }
            return;
        }

        if !self.mains_ok() {
            return;
        }

        match self.smart_phase {
            SmartPhase::WarmUp => {
                if self.charge_minutes >= self.settings.warmup_mins {
                    self.smart_phase = SmartPhase::Charge;
                    self.charge_state = ChargeState::FullRateCharging;
                    self.last_current_sample = self.now;
                    let text = match activity {
                        Activity::SmartUsbC => "Full rate Charging USB-C",
                        _ => "Full rate Charging Smart AC",
                    };
                    self.announce_progress(text);
                }
            }
            SmartPhase::Charge => {
                if self.hub_mode() {
                    self.check_hub();
                } else {
                    self.sample_engine();
                }
            }
            SmartPhase::Idle => {}
        }

        if self.charge_state == ChargeState::Ended {
            self.minute_timer.stop();
            self.relays_off(RelayContext::Normal(activity));
            self.finish_smart_cycle();
        }
    }

    fn finish_smart_cycle(&mut self) {
        if let Some(now) = self.clock.filter(|_| self.settings.is_smart_monitoring) {
            self.period.mark_ended(SlotIndex::at(&now));
        }
        self.smart_phase = SmartPhase::Idle;
        self.set_state(RunState::GoToStandby);
    }

    fn sample_engine(&mut self) {
        let interval = Duration::from_millis(self.timing.current_sample_ms);
        if self.elapsed_since(self.last_current_sample) < interval {
            return;
        }
        self.last_current_sample = self.now;

        let prior = self.charge_state;
        let next = self.engine.sample(
            self.frame.amps,
            self.charge_minutes,
            self.settings.device_count(),
            prior,
        );
        self.charge_state = next;
        if next != prior {
            match next {
                ChargeState::RateMonitoring => self.announce_progress("Rate monitoring started"),
                ChargeState::Done => self.announce_progress("Rate Monitoring Done"),
                _ => {}
            }
        }
    }

    fn check_hub(&mut self) {
        let all_green = self
            .frame
            .hub
            .as_ref()
            .is_some_and(HubStatus::all_green_or_off);
        let poll = Duration::from_millis(self.timing.hub_poll_ms);
        let confirm = Duration::from_millis(self.timing.hub_completion_ms);

        match self.charge_state {
            ChargeState::Ended => {}
            ChargeState::Done => {
                if self.elapsed_since(self.hub_check_at) >= confirm {
                    self.hub_check_at = self.now;
                    // A red port defers the end to the next re-check; Done stays
                    if all_green {
                        self.charge_state = ChargeState::Ended;
                    } else {
                        self.announce_progress("Hub port charging again");
                    }
                }
            }
            _ => {
                if self.elapsed_since(self.hub_check_at) >= poll {
                    self.hub_check_at = self.now;
                    if self.charge_minutes > 0 && all_green {
                        self.charge_state = ChargeState::Done;
                        self.announce_progress("Hub ports green or off");
                    }
                }
            }
        }
    }

    fn announce_progress(&mut self, text: &str) {
        let mcd = self
            .frame
            .hub
            .as_ref()
            .map(|h| h.connected_devices() as u32)
            .unwrap_or_else(|| self.settings.device_count());
        let event = TelemetryEvent::new(EventKind::VariableChanged)
            .run(self.view())
            .power(self.power_state)
            .amps(self.frame.amps)
            .volts(self.frame.volts)
            .minutes(self.charge_minutes)
            .charge(self.charge_state)
            .context(text)
            .field("MCD", mcd);
        self.emit(event);
    }

    /// Smart sessions stop outright on overheat
    pub(crate) fn smart_overheated(&mut self) {
        let Some(activity) = Activity::of(self.run_state) else {
            return;
        };
        self.minute_timer.stop();
        self.settings.is_auto = false;
        self.settings.resume_cause = ResumeCause::Overheat;
        self.persist_settings();
        if self.relays_on {
            self.relays_off(RelayContext::Suspend(activity));
        }
        self.smart_phase = SmartPhase::Idle;
    }

    /// Launch a smart charge when the smart-start schedule says so
    pub(super) fn check_scheduled_smart_start(&mut self) {
        if !self.settings.is_smart_monitoring
            || !matches!(
                self.run_state,
                RunState::Standby | RunState::TimedOn | RunState::AlwaysOn | RunState::ChargedOn
            )
        {
            return;
        }

        let Some(now) = self.clock else {
            if !self.smart_time_invalid_reported {
                self.smart_time_invalid_reported = true;
                self.logger.warn("Smart start paused, clock invalid");
                let event = TelemetryEvent::new(EventKind::ScheduleExpired)
                    .run(self.view())
                    .power(self.power_state)
                    .context("Time invalid");
                self.emit(event);
            }
            return;
        };
        self.smart_time_invalid_reported = false;

        let decision = schedule::evaluate(
            Some(&now),
            &self.settings.schedule,
            self.settings.schedule_valid_until,
        );
        if decision.expired {
            self.logger.info("Smart-start schedule expired, monitoring off");
            let event = TelemetryEvent::new(EventKind::ScheduleExpired)
                .run(self.view())
                .power(self.power_state)
                .auto(false)
                .context("Smart AC or USBC Schedule Expired");
            self.emit(event);
            self.settings.is_smart_monitoring = false;
            self.persist_settings();
            return;
        }

        let Some(slot) = decision.slot else {
            return;
        };
        let fresh_period = !self.period.same_period(slot);
        if decision.is_on && fresh_period && !self.period.ended_this_period() {
            self.logger.info(&format!(
                "Scheduled smart start from {}",
                self.run_state
            ));
            self.prev_state = self.run_state;
            let next = if self.settings.hub_board {
                RunState::GoToChargedOnUsbCAuto
            } else {
                RunState::GoToChargedOnAuto
            };
            self.set_state(next);
        }
    }
}
