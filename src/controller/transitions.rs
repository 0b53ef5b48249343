//! Run-state transition table
//!
//! Maps each run state and stimulus to the controller's reaction. The tick
//! consults it for mains loss, overheat and minute ticks; the admin command
//! surface consults it for every command.

use crate::controller::commands::AdminOp;
use crate::types::{RunState, ScheduleKind, ViewState};

/// Something that happened to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stimulus {
    MainsLost,
    Overheated,
    MinuteElapsed,
    Command(AdminOp),
}

impl Stimulus {
    /// One of each kind, for coverage checks
    pub fn representatives() -> Vec<Stimulus> {
        let mut all = vec![
            Stimulus::MainsLost,
            Stimulus::Overheated,
            Stimulus::MinuteElapsed,
        ];
        all.extend(AdminOp::ALL.iter().map(|op| Stimulus::Command(*op)));
        all
    }
}

/// What the controller does about a stimulus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Open relays and record resume data
    Suspend,
    /// Record a standby resume and go to sleep
    Sleep,
    /// Move to another run state
    Transition(RunState),
    /// Add the elapsed minutes to the session
    Count,
    /// Leave it to the state's own handler on this tick
    Defer,
    /// Nothing to do in this state
    Ignore,
    /// Command not permitted here
    Reject,
}

/// Inputs that gate admin commands besides the run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandContext {
    pub schedule_kind: ScheduleKind,
    /// Clock valid, schedule loaded and not expired
    pub schedule_usable: bool,
    pub monitoring: bool,
}

pub fn react(state: RunState, stimulus: Stimulus, ctx: &CommandContext) -> Reaction {
    use RunState::*;
    match stimulus {
        Stimulus::MainsLost => match state {
            TimedOn | AlwaysOn | AutoOn | AutoOff | ChargedOn | ChargedOnAuto | ChargedOnUsbC
            | ChargedOnUsbCAuto => Reaction::Suspend,
            Standby | GoToStandby => Reaction::Sleep,
            GoToTimedOn | GoToChargedOn | GoToChargedOnUsbC => Reaction::Transition(GoToStandby),
            GoToAlwaysOn | GoToAuto | GoToChargedOnAuto | GoToChargedOnUsbCAuto => Reaction::Defer,
            s if s.is_web_transitional() => Reaction::Defer,
            _ => Reaction::Ignore,
        },
        Stimulus::Overheated => match state {
            TimedOn | AlwaysOn | AutoOn | AutoOff => Reaction::Suspend,
            ChargedOn | ChargedOnAuto | ChargedOnUsbC | ChargedOnUsbCAuto => {
                Reaction::Transition(GoToStandby)
            }
            _ => Reaction::Ignore,
        },
        Stimulus::MinuteElapsed => match state {
            TimedOn | AlwaysOn | AutoOn | ChargedOn | ChargedOnAuto | ChargedOnUsbC
            | ChargedOnUsbCAuto => Reaction::Count,
            _ => Reaction::Ignore,
        },
        Stimulus::Command(op) => match admin_target(state, op, ctx) {
            Some(target) => Reaction::Transition(target),
            None => Reaction::Reject,
        },
    }
}

/// Web state an admin command leads to, if permitted in `state`
pub fn admin_target(state: RunState, op: AdminOp, ctx: &CommandContext) -> Option<RunState> {
    let view = state.view();
    let in_standby = view == ViewState::Standby;
    match op {
        AdminOp::Standby => (!in_standby).then_some(RunState::WebStandby),
        AdminOp::Restart => in_standby.then_some(RunState::WebRestart),
        AdminOp::FactoryReset => in_standby.then_some(RunState::WebFactoryReset),
        AdminOp::TimedOn => in_standby.then_some(RunState::WebTimedOn),
        AdminOp::Continuous => in_standby.then_some(RunState::WebAlwaysOn),
        AdminOp::SmartAc => in_standby.then_some(RunState::WebChargedOn),
        AdminOp::SmartUsbC => in_standby.then_some(RunState::WebChargedOnUsbC),
        AdminOp::Hibernate => in_standby.then_some(RunState::WebHibernate),
        AdminOp::Auto => {
            if !ctx.schedule_usable {
                return None;
            }
            match ctx.schedule_kind {
                ScheduleKind::OnOff => in_standby.then_some(RunState::WebAuto),
                ScheduleKind::SmartStart => (view != ViewState::Sleeping
                    && view != ViewState::ChargedOnAuto
                    && !ctx.monitoring)
                    .then_some(RunState::WebSmartAuto),
                ScheduleKind::None => None,
            }
        }
        AdminOp::AutoExit => match ctx.schedule_kind {
            ScheduleKind::OnOff => matches!(view, ViewState::AutoOn | ViewState::AutoOff)
                .then_some(RunState::WebStandby),
            ScheduleKind::SmartStart => ctx.monitoring.then_some(RunState::WebSmartExit),
            ScheduleKind::None => None,
        },
    }
}

/// Steady states a wake may return to
pub fn is_resumable(state: RunState) -> bool {
    use RunState::*;
    matches!(
        state,
        Standby
            | TimedOn
            | AlwaysOn
            | AutoOn
            | AutoOff
            | ChargedOn
            | ChargedOnAuto
            | ChargedOnUsbC
            | ChargedOnUsbCAuto
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(kind: ScheduleKind, usable: bool, monitoring: bool) -> CommandContext {
        CommandContext {
            schedule_kind: kind,
            schedule_usable: usable,
            monitoring,
        }
    }

    #[test]
    fn test_standby_command_is_rejected_in_standby() {
        let c = CommandContext::default();
        assert_eq!(
            react(RunState::Standby, Stimulus::Command(AdminOp::Standby), &c),
            Reaction::Reject
        );
        assert_eq!(
            react(RunState::AlwaysOn, Stimulus::Command(AdminOp::Standby), &c),
            Reaction::Transition(RunState::WebStandby)
        );
    }

    #[test]
    fn test_auto_needs_usable_schedule() {
        let c = ctx(ScheduleKind::OnOff, false, false);
        assert_eq!(admin_target(RunState::Standby, AdminOp::Auto, &c), None);
        let c = ctx(ScheduleKind::OnOff, true, false);
        assert_eq!(admin_target(RunState::Standby, AdminOp::Auto, &c), Some(RunState::WebAuto));
        let c = ctx(ScheduleKind::SmartStart, true, false);
        assert_eq!(
            admin_target(RunState::AlwaysOn, AdminOp::Auto, &c),
            Some(RunState::WebSmartAuto)
        );
        let c = ctx(ScheduleKind::SmartStart, true, true);
        assert_eq!(admin_target(RunState::Standby, AdminOp::Auto, &c), None);
        assert_eq!(
            admin_target(RunState::Standby, AdminOp::AutoExit, &c),
            Some(RunState::WebSmartExit)
        );
    }

    #[test]
    fn test_every_state_has_a_reaction_to_every_stimulus() {
        let contexts = [
            CommandContext::default(),
            ctx(ScheduleKind::OnOff, true, false),
            ctx(ScheduleKind::SmartStart, true, false),
            ctx(ScheduleKind::SmartStart, true, true),
        ];
        for state in RunState::ALL {
            for c in &contexts {
                for stimulus in Stimulus::representatives() {
                    let reaction = react(state, stimulus, c);
                    match stimulus {
                        Stimulus::Command(op) => match reaction {
                            Reaction::Transition(target) => {
                                assert!(target.is_web_transitional(), "{} {:?}", state, op);
                            }
                            Reaction::Reject => {}
                            other => panic!("{} {:?} gave {:?}", state, op, other),
                        },
                        Stimulus::MinuteElapsed => assert!(
                            matches!(reaction, Reaction::Count | Reaction::Ignore),
                            "{} minute gave {:?}",
                            state,
                            reaction
                        ),
                        Stimulus::MainsLost | Stimulus::Overheated => {
                            assert!(!matches!(reaction, Reaction::Count | Reaction::Reject));
                            if is_resumable(state) && state != RunState::Standby {
                                assert!(
                                    matches!(reaction, Reaction::Suspend | Reaction::Transition(_)),
                                    "{} {:?} gave {:?}",
                                    state,
                                    stimulus,
                                    reaction
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_minutes_only_count_while_active() {
        let c = CommandContext::default();
        assert_eq!(react(RunState::AlwaysOn, Stimulus::MinuteElapsed, &c), Reaction::Count);
        assert_eq!(react(RunState::AutoOff, Stimulus::MinuteElapsed, &c), Reaction::Ignore);
        assert_eq!(react(RunState::Standby, Stimulus::MinuteElapsed, &c), Reaction::Ignore);
    }
}
