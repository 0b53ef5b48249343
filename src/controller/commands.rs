//! Remote admin and parameter commands
//!
//! Both surfaces take the three-letter opcode followed by its argument and
//! answer with a signed code: positive accepts, negative refuses.

use super::Controller;
use super::Reaction;
use super::transitions::Stimulus;
use crate::schedule::{self, ScheduleBitmask};
use crate::settings::{MAX_DEVICES_PER_OUTLET, MAX_NAME_LEN};
use crate::types::{DstMode, MAX_RELAYS, RunState, ScheduleKind, ViewState};
use std::str::FromStr;

/// Reply to an opcode neither surface knows
pub const UNKNOWN_COMMAND: i32 = -99;

/// Reply to a parameter that cannot change in the current run state
pub const BUSY: i32 = -100;

/// Admin operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminOp {
    Standby,
    Restart,
    FactoryReset,
    Auto,
    TimedOn,
    Continuous,
    SmartAc,
    SmartUsbC,
    AutoExit,
    Hibernate,
}

impl AdminOp {
    pub const ALL: [AdminOp; 10] = [
        AdminOp::Standby,
        AdminOp::Restart,
        AdminOp::FactoryReset,
        AdminOp::Auto,
        AdminOp::TimedOn,
        AdminOp::Continuous,
        AdminOp::SmartAc,
        AdminOp::SmartUsbC,
        AdminOp::AutoExit,
        AdminOp::Hibernate,
    ];

    /// Look an opcode up by its first three characters
    pub fn parse(command: &str) -> Option<Self> {
        let op = command.get(..3)?;
        let found = match op {
            "stb" => AdminOp::Standby,
            "rst" => AdminOp::Restart,
            "hst" => AdminOp::FactoryReset,
            "auo" => AdminOp::Auto,
            "tmc" => AdminOp::TimedOn,
            "cnc" => AdminOp::Continuous,
            "ouc" => AdminOp::SmartAc,
            "usb" => AdminOp::SmartUsbC,
            "aux" => AdminOp::AutoExit,
            "hib" => AdminOp::Hibernate,
            _ => return None,
        };
        Some(found)
    }

    pub fn opcode(self) -> &'static str {
        match self {
            AdminOp::Standby => "stb",
            AdminOp::Restart => "rst",
            AdminOp::FactoryReset => "hst",
            AdminOp::Auto => "auo",
            AdminOp::TimedOn => "tmc",
            AdminOp::Continuous => "cnc",
            AdminOp::SmartAc => "ouc",
            AdminOp::SmartUsbC => "usb",
            AdminOp::AutoExit => "aux",
            AdminOp::Hibernate => "hib",
        }
    }

    /// Positive acknowledgement; the refusal is its negation
    pub fn ack(self) -> i32 {
        match self {
            AdminOp::Standby => 1,
            AdminOp::Restart => 3,
            AdminOp::FactoryReset => 88,
            AdminOp::Auto => 4,
            AdminOp::TimedOn => 5,
            AdminOp::Continuous => 6,
            AdminOp::SmartAc => 7,
            AdminOp::SmartUsbC => 27,
            AdminOp::AutoExit => 9,
            AdminOp::Hibernate => 10,
        }
    }
}

fn number<T: FromStr>(arg: &str) -> Option<T> {
    arg.trim().parse().ok()
}

fn in_range<T: PartialOrd + FromStr>(arg: &str, lo: T, hi: T) -> Option<T> {
    number(arg).filter(|v: &T| *v >= lo && *v <= hi)
}

impl Controller {
    /// Run an admin command, checked against the current view state
    pub fn handle_admin(&mut self, command: &str) -> i32 {
        let Some(op) = AdminOp::parse(command) else {
            self.logger
                .warn(&format!("Unknown admin command {:?}", command));
            return UNKNOWN_COMMAND;
        };

        match self.reaction(Stimulus::Command(op)) {
            Reaction::Transition(target) => {
                if op == AdminOp::AutoExit {
                    self.settings.is_auto = false;
                    self.settings.is_smart_monitoring = false;
                    self.persist_settings();
                }
                self.logger.info(&format!(
                    "Admin {} accepted in {}, next {}",
                    op.opcode(),
                    self.run_state,
                    target
                ));
                self.prev_state = self.run_state;
                self.set_state(target);
                op.ack()
            }
            _ => {
                self.logger.info(&format!(
                    "Admin {} refused in {}",
                    op.opcode(),
                    self.run_state
                ));
                -op.ack()
            }
        }
    }

    /// Change one device setting
    pub fn handle_param(&mut self, command: &str) -> i32 {
        let (Some(op), Some(arg)) = (command.get(..3), command.get(3..)) else {
            return UNKNOWN_COMMAND;
        };

        let reply = match op {
            "dst" => match number::<i64>(arg).and_then(DstMode::from_code) {
                Some(mode) => {
                    self.settings.dst_mode = mode;
                    23
                }
                None => -23,
            },
            "tzo" => match in_range(arg, -12.0_f32, 14.0) {
                Some(hours) => {
                    self.settings.time_zone_hours = hours;
                    3
                }
                None => -3,
            },
            "nam" => {
                let name = arg.trim();
                if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
                    -17
                } else {
                    self.settings.item_name = name.to_string();
                    17
                }
            }
            "tip" => match in_range(arg, 5_u32, 600) {
                None => -1,
                Some(_) if self.run_state == RunState::TimedOn => BUSY,
                Some(minutes) => {
                    self.settings.timer_period_mins = minutes;
                    1
                }
            },
            "sch" => match schedule::parse_valid_until(arg.trim()) {
                Ok(date) => {
                    self.settings.schedule_valid_until = date;
                    4
                }
                Err(_) => -4,
            },
            "sda" => self.load_on_off_schedule(arg.trim()),
            "oda" => self.load_smart_schedule(arg.trim()),
            "mxo" => match in_range(arg, 5_u32, 600) {
                None => -28,
                Some(_) if self.run_state.is_smart_charge() => BUSY,
                Some(minutes) => {
                    self.settings.max_time_on_mins = minutes;
                    28
                }
            },
            "mxt" => match in_range(arg, 1_u32, 99) {
                Some(c) => {
                    self.settings.max_temp_c = c;
                    30
                }
                None => -30,
            },
            "mnc" => match in_range(arg, 0.001_f32, 0.06) {
                Some(amps) => {
                    self.settings.min_current_per_device = amps;
                    34
                }
                None => -34,
            },
            "mmt" => match in_range(arg, 0_u32, 60) {
                Some(minutes) => {
                    self.settings.max_monitoring_mins = minutes;
                    35
                }
                None => -35,
            },
            "mnr" => match number::<f32>(arg).filter(|r| *r > 0.0 && *r <= 0.06) {
                Some(rate) => {
                    self.settings.min_charge_rate = rate;
                    36
                }
                None => -36,
            },
            "ext" => match in_range(arg, 0_u32, 30) {
                Some(minutes) => {
                    self.settings.extra_charging_mins = minutes;
                    41
                }
                None => -41,
            },
            "wum" => match in_range(arg, 1_u32, 10) {
                Some(minutes) => {
                    self.settings.warmup_mins = minutes;
                    60
                }
                None => -60,
            },
            "dpo" => match parse_devices(arg) {
                Some(devices) => {
                    self.settings.devices_per_outlet = devices;
                    61
                }
                None => -61,
            },
            "pos" => match in_range(arg, 0_u8, u8::MAX) {
                Some(code) => {
                    self.settings.power_on_code = code;
                    69
                }
                None => -69,
            },
            "loc" => {
                self.settings.local_mode = true;
                70
            }
            _ => UNKNOWN_COMMAND,
        };

        if reply > 0 {
            self.logger
                .info(&format!("Parameter {} set ({})", op, reply));
            self.persist_settings();
            self.refresh_engine();
        } else {
            self.logger
                .warn(&format!("Parameter {} refused ({})", op, reply));
        }
        reply
    }

    fn load_on_off_schedule(&mut self, packed: &str) -> i32 {
        if self.settings.is_smart_monitoring {
            return -4;
        }
        let Ok(bitmask) = ScheduleBitmask::unpack(packed) else {
            return -4;
        };
        self.settings.schedule_kind = if bitmask.is_none() {
            ScheduleKind::None
        } else {
            ScheduleKind::OnOff
        };
        self.settings.schedule = bitmask;
        4
    }

    fn load_smart_schedule(&mut self, packed: &str) -> i32 {
        if matches!(self.view(), ViewState::AutoOn | ViewState::AutoOff) {
            return -6;
        }
        let Ok(bitmask) = ScheduleBitmask::unpack(packed) else {
            return -6;
        };
        if bitmask.is_none() {
            self.settings.schedule_kind = ScheduleKind::None;
            if self.settings.is_smart_monitoring {
                self.settings.is_smart_monitoring = false;
                self.prev_state = self.run_state;
                self.set_state(RunState::WebSmartExit);
            }
        } else {
            self.settings.schedule_kind = ScheduleKind::SmartStart;
            self.period.mark_schedule_changed();
        }
        self.settings.schedule = bitmask;
        6
    }
}

/// Four comma separated device counts; out of range counts become zero
fn parse_devices(arg: &str) -> Option<[u8; MAX_RELAYS]> {
    let tokens: Vec<&str> = arg.trim().split(',').collect();
    if tokens.len() != MAX_RELAYS || tokens.iter().any(|t| t.trim().is_empty()) {
        return None;
    }
    let mut devices = [0; MAX_RELAYS];
    for (slot, token) in devices.iter_mut().zip(tokens) {
        let count = number::<i64>(token)?;
        *slot = u8::try_from(count)
            .ok()
            .filter(|c| *c <= MAX_DEVICES_PER_OUTLET)
            .unwrap_or(0);
    }
    Some(devices)
}
