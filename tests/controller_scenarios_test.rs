use std::time::Duration;
use trolley::config::Config;
use trolley::controller::{
    Controller, ExitSignal, PersistRequest, RelayCommand, TickInput, TickOutput,
};
use trolley::persistence::ResumeSnapshot;
use trolley::sensors::SensorFrame;
use trolley::settings::DeviceSettings;
use trolley::telemetry::{EventKind, TelemetryEvent};
use trolley::types::{ChargeState, PowerOnPolicy, ResumeCause, RunState};

/// Steps a controller one second at a time against a hand-set sensor frame
struct Bench {
    ctl: Controller,
    at: Duration,
    frame: SensorFrame,
    events: Vec<TelemetryEvent>,
    relays: Vec<RelayCommand>,
    persisted: Vec<PersistRequest>,
}

impl Bench {
    fn new(settings: DeviceSettings) -> Self {
        Self {
            ctl: Controller::new(&Config::default(), settings, ResumeSnapshot::cleared()),
            at: Duration::ZERO,
            frame: SensorFrame::new()
                .with_mains(true)
                .with_power(230.0, 1.0)
                .with_temperature(25.0),
            events: Vec::new(),
            relays: Vec::new(),
            persisted: Vec::new(),
        }
    }

    fn with_policy(policy: PowerOnPolicy) -> Self {
        let settings = DeviceSettings {
            power_on_code: policy.code(),
            ..DeviceSettings::default()
        };
        Self::new(settings)
    }

    fn collect(&mut self, out: &TickOutput) {
        self.events.extend(out.events.iter().cloned());
        self.relays.extend(out.relays.iter().copied());
        self.persisted.extend(out.persist.iter().cloned());
    }

    fn step(&mut self) -> TickOutput {
        self.at += Duration::from_secs(1);
        let out = self.ctl.tick(TickInput {
            at: self.at,
            clock: None,
            frame: self.frame.clone(),
        });
        self.collect(&out);
        out
    }

    fn run_secs(&mut self, secs: u64) {
        for _ in 0..secs {
            self.step();
        }
    }

    /// Step until the run state settles on `state`
    fn settle(&mut self, state: RunState) {
        for _ in 0..10 {
            if self.ctl.run_state() == state {
                return;
            }
            self.step();
        }
        assert_eq!(self.ctl.run_state(), state);
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }

    fn last(&self, kind: EventKind) -> Option<&TelemetryEvent> {
        self.events.iter().rev().find(|e| e.kind == kind)
    }
}

#[test]
fn continuous_start_on_boot() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Continuous);
    bench.step();
    assert_eq!(bench.kinds()[0], EventKind::Startup);
    assert_eq!(bench.ctl.run_state(), RunState::GoToAlwaysOn);

    bench.settle(RunState::AlwaysOn);
    bench.step();
    assert!(bench.ctl.relays_energised());
    assert!(bench.relays.contains(&RelayCommand::Energise([true; 4])));
    let start = bench.last(EventKind::ContinuousStart).unwrap();
    assert_eq!(start.context.as_deref(), Some("Normal Start"));
    assert_eq!(start.run, Some(6));
}

#[test]
fn mains_blip_resumes_continuous_session_at_same_minute() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Continuous);
    bench.settle(RunState::AlwaysOn);
    bench.step();
    assert!(bench.ctl.relays_energised());

    bench.run_secs(12 * 60);
    assert_eq!(bench.ctl.charge_minutes(), 12);

    bench.frame.mains_present = false;
    let out = bench.step();
    assert_eq!(
        out.event_kinds(),
        vec![EventKind::MainsOff, EventKind::ContinuousEnd]
    );
    assert_eq!(out.relays, vec![RelayCommand::OpenAll]);
    assert_eq!(bench.ctl.settings().resume_minutes, Some(12));
    assert_eq!(bench.ctl.settings().resume_cause, ResumeCause::MainsOff);
    assert!(matches!(out.persist.first(), Some(PersistRequest::Settings(_))));

    // Back within the sleep grace period
    bench.run_secs(30);
    assert_eq!(bench.ctl.run_state(), RunState::AlwaysOn);
    bench.frame.mains_present = true;
    let out = bench.step();
    assert_eq!(
        out.event_kinds(),
        vec![EventKind::MainsRestored, EventKind::ContinuousStart]
    );
    let resumed = &out.events[1];
    assert_eq!(resumed.minutes, Some(12));
    assert_eq!(resumed.context.as_deref(), Some("Resume After Suspend"));
    assert_eq!(bench.ctl.charge_minutes(), 12);
    assert!(!bench.ctl.settings().has_resume());

    // The same session carried on across the suspend
    let session = bench.ctl.sessions().current_session.as_ref().unwrap();
    assert_eq!(session.resumes, 1);
}

#[test]
fn long_mains_loss_sleeps_and_wakes_into_resume() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Continuous);
    bench.settle(RunState::AlwaysOn);
    bench.step();
    bench.run_secs(5 * 60);

    bench.frame.mains_present = false;
    bench.run_secs(119);
    assert_eq!(bench.ctl.run_state(), RunState::AlwaysOn);
    bench.step();
    assert_eq!(bench.ctl.run_state(), RunState::Sleeping);
    assert!(bench.kinds().contains(&EventKind::Sleep));
    assert_eq!(bench.ctl.settings().resume_state, RunState::AlwaysOn);

    let out = bench.step();
    assert!(out.sleep);
    assert!(bench.ctl.is_asleep());
    let snapshot = out
        .persist
        .iter()
        .find_map(|p| match p {
            PersistRequest::Snapshot(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(snapshot.cause, ResumeCause::MainsOff);
    assert_eq!(snapshot.previous_run_state, RunState::AlwaysOn);

    // Asleep: further ticks do nothing
    assert!(bench.step().is_empty());

    bench.frame.mains_present = true;
    let woke = bench.ctl.on_wake(snapshot, true, bench.at);
    assert!(!woke.sleep);
    assert_eq!(bench.ctl.run_state(), RunState::AlwaysOn);

    let out = bench.step();
    assert_eq!(
        out.event_kinds(),
        vec![EventKind::MainsRestored, EventKind::ContinuousStart]
    );
    assert_eq!(out.events[1].minutes, Some(5));

    // The consumed resume record is cleared and written back
    assert!(bench.ctl.snapshot().is_cleared());
    assert!(out.persist.iter().any(|p| matches!(
        p,
        PersistRequest::Snapshot(s) if s.is_cleared()
    )));
}

#[test]
fn wake_without_mains_goes_back_to_sleep() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Standby);
    bench.settle(RunState::Standby);
    bench.frame.mains_present = false;
    bench.step();
    assert_eq!(bench.ctl.run_state(), RunState::Sleeping);
    let out = bench.step();
    assert!(out.sleep);

    let out = bench.ctl.on_wake(ResumeSnapshot::cleared(), false, bench.at);
    assert!(out.sleep);
    assert_eq!(bench.ctl.settings().resume_cause, ResumeCause::DeepPowerDown);
    assert_eq!(bench.ctl.snapshot().cause, ResumeCause::DeepPowerDown);
}

#[test]
fn standby_mains_loss_sleeps_immediately() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Standby);
    bench.settle(RunState::Standby);
    bench.frame.mains_present = false;
    let out = bench.step();
    assert_eq!(out.event_kinds(), vec![EventKind::MainsOff, EventKind::Sleep]);
    assert_eq!(bench.ctl.settings().resume_state, RunState::Standby);
    assert!(!bench.ctl.settings().has_resume());
}

#[test]
fn overheat_suspends_and_cooling_resumes() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Continuous);
    bench.settle(RunState::AlwaysOn);
    bench.step();
    bench.run_secs(3 * 60);

    bench.frame.temperature_c = 46.0;
    let out = bench.step();
    assert_eq!(
        out.event_kinds(),
        vec![EventKind::Overheated, EventKind::ContinuousEnd]
    );
    assert!(bench.ctl.is_overheated());
    assert_eq!(bench.ctl.settings().resume_cause, ResumeCause::Overheat);

    // Still inside the hysteresis band
    bench.frame.temperature_c = 40.0;
    bench.run_secs(10);
    assert!(!bench.ctl.relays_energised());

    bench.frame.temperature_c = 34.0;
    let out = bench.step();
    assert_eq!(out.event_kinds(), vec![EventKind::ContinuousStart]);
    assert_eq!(out.events[0].minutes, Some(3));
}

#[test]
fn timed_session_runs_for_its_period() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Standby);
    bench.settle(RunState::Standby);
    assert_eq!(bench.ctl.handle_param("tip5"), 1);
    assert_eq!(bench.ctl.handle_admin("tmc"), 5);
    assert_eq!(bench.ctl.run_state(), RunState::WebTimedOn);

    bench.step();
    assert_eq!(bench.last(EventKind::WebTimedOn).unwrap().run, Some(3));
    bench.settle(RunState::TimedOn);
    bench.step();
    assert!(bench.ctl.relays_energised());
    assert_eq!(bench.ctl.handle_param("tip10"), -100);

    bench.run_secs(5 * 60);
    let end = bench.last(EventKind::TimedEnd).unwrap();
    assert_eq!(end.context.as_deref(), Some("Normal Period"));
    assert_eq!(end.minutes, Some(5));
    bench.settle(RunState::Standby);
    assert!(!bench.ctl.relays_energised());
}

#[test]
fn standby_command_in_standby_is_refused() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Standby);
    bench.settle(RunState::Standby);
    let before = bench.events.len();
    assert_eq!(bench.ctl.handle_admin("stb"), -1);
    assert_eq!(bench.ctl.run_state(), RunState::Standby);
    assert!(bench.ctl.take_output().is_empty());
    bench.step();
    assert!(
        bench.events[before..]
            .iter()
            .all(|e| e.kind != EventKind::WebStandby)
    );
}

#[test]
fn standby_command_closes_continuous_session() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Continuous);
    bench.settle(RunState::AlwaysOn);
    bench.step();
    bench.run_secs(120);

    assert_eq!(bench.ctl.handle_admin("stb"), 1);
    let out = bench.step();
    assert_eq!(
        out.event_kinds(),
        vec![EventKind::ContinuousEnd, EventKind::WebStandby]
    );
    assert_eq!(out.events[0].context.as_deref(), Some("Web Cmd Standby"));
    bench.settle(RunState::Standby);
    let last = bench.ctl.sessions().last_session.as_ref().unwrap();
    assert_eq!(last.minutes, 2);
}

#[test]
fn restart_finalises_resume_record() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Standby);
    bench.settle(RunState::Standby);
    assert_eq!(bench.ctl.handle_admin("rst"), 3);
    bench.step();
    assert_eq!(bench.last(EventKind::WebRestart).unwrap().context.as_deref(), Some("Web Restart"));
    let out = bench.step();
    assert_eq!(out.exit, Some(ExitSignal::Restart));
    assert_eq!(bench.ctl.snapshot().cause, ResumeCause::WebCommand);
    assert_eq!(bench.ctl.snapshot().previous_run_state, RunState::Standby);

    // Only once
    assert_eq!(bench.step().exit, None);
}

#[test]
fn factory_reset_clears_snapshot_and_keeps_identity() {
    let mut settings = DeviceSettings {
        power_on_code: PowerOnPolicy::Standby.code(),
        item_name: "Cart12".to_string(),
        ..DeviceSettings::default()
    };
    settings.max_temp_c = 60;
    let mut bench = Bench::new(settings);
    bench.settle(RunState::Standby);

    assert_eq!(bench.ctl.handle_admin("hst"), 88);
    bench.step();
    let out = bench.step();
    assert_eq!(out.exit, Some(ExitSignal::Restart));
    assert!(bench.ctl.snapshot().is_cleared());
    assert_eq!(bench.ctl.settings().item_name, "Cart12");
    assert_eq!(bench.ctl.settings().max_temp_c, 45);
    assert_eq!(bench.ctl.settings().resume_cause, ResumeCause::HardReset);
}

#[test]
fn hibernate_records_snapshot_and_exits() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Standby);
    bench.settle(RunState::Standby);
    assert_eq!(bench.ctl.handle_admin("hib"), 10);
    let out = bench.step();
    assert_eq!(out.exit, Some(ExitSignal::Hibernate));
    assert_eq!(bench.ctl.snapshot().cause, ResumeCause::Hibernate);
    let ack = bench.last(EventKind::WebRestart).unwrap();
    assert_eq!(ack.context.as_deref(), Some("Web Hibernate"));
    assert_eq!(ack.connected, Some(0));
    assert_eq!(ack.run, Some(7));
    assert!(bench.step().exit.is_none());
}

#[test]
fn startup_consumes_boot_snapshot() {
    let snapshot = ResumeSnapshot {
        cause: ResumeCause::WebCommand,
        previous_run_state: RunState::Standby,
        ..ResumeSnapshot::cleared()
    };
    let mut ctl = Controller::new(&Config::default(), DeviceSettings::default(), snapshot);
    let out = ctl.tick(TickInput {
        at: Duration::from_secs(1),
        clock: None,
        frame: SensorFrame::new().with_mains(true),
    });
    let dest = &out.events[0];
    assert_eq!(dest.kind, EventKind::Startup);
    assert_eq!(dest.extra.get("RS"), Some(&serde_json::json!(10)));
    assert!(ctl.snapshot().is_cleared());
    assert!(out
        .persist
        .iter()
        .any(|p| matches!(p, PersistRequest::Snapshot(s) if s.is_cleared())));
}

#[test]
fn startup_keeps_hub_board_from_boot_snapshot() {
    let snapshot = ResumeSnapshot {
        cause: ResumeCause::MainsOff,
        previous_run_state: RunState::ChargedOnUsbC,
        hub_present: true,
        ..ResumeSnapshot::cleared()
    };
    let settings = DeviceSettings {
        power_on_code: PowerOnPolicy::Standby.code(),
        ..DeviceSettings::default()
    };
    assert!(!settings.hub_board);
    let mut ctl = Controller::new(&Config::default(), settings, snapshot);
    let out = ctl.tick(TickInput {
        at: Duration::from_secs(1),
        clock: None,
        frame: SensorFrame::new().with_mains(true),
    });

    assert!(ctl.settings().hub_board);
    assert_eq!(out.events[0].extra.get("HUB"), Some(&serde_json::json!(1)));
    assert!(ctl.snapshot().is_cleared());
    assert!(out.persist.iter().any(
        |p| matches!(p, PersistRequest::Settings(s) if s.hub_board)
    ));
}

#[test]
fn forced_reset_mid_session_resumes_at_same_minute() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Last);
    bench.settle(RunState::Standby);
    assert_eq!(bench.ctl.handle_param("tip30"), 1);
    assert_eq!(bench.ctl.handle_admin("tmc"), 5);
    bench.settle(RunState::TimedOn);
    bench.step();
    assert!(bench.ctl.relays_energised());
    bench.run_secs(7 * 60);
    assert_eq!(bench.ctl.timer_minutes(), 7);

    let out = bench.ctl.forced_reset(ResumeCause::Watchdog);
    assert_eq!(out.exit, Some(ExitSignal::Restart));
    let diagnostic = out
        .events
        .iter()
        .find(|e| e.kind == EventKind::Diagnostic)
        .unwrap();
    assert!(diagnostic.context.as_deref().unwrap().starts_with("Forced reset"));

    let saved = out
        .persist
        .iter()
        .find_map(|p| match p {
            PersistRequest::Settings(s) => Some(s.as_ref().clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(saved.resume_cause, ResumeCause::Watchdog);
    assert_eq!(saved.resume_state, RunState::TimedOn);
    assert_eq!(saved.resume_minutes, Some(7));
    let snapshot = out
        .persist
        .iter()
        .find_map(|p| match p {
            PersistRequest::Snapshot(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(snapshot.cause, ResumeCause::Watchdog);
    assert_eq!(snapshot.previous_run_state, RunState::TimedOn);
    assert_eq!(snapshot.relay_mask, [true; 4]);

    // Only one exit per process
    assert_eq!(bench.ctl.forced_reset(ResumeCause::Watchdog).exit, None);

    let mut rebooted = Bench::new(saved.clone());
    rebooted.ctl = Controller::new(&Config::default(), saved, snapshot);
    let out = rebooted.step();
    assert_eq!(out.events[0].extra.get("RS"), Some(&serde_json::json!(2)));
    rebooted.settle(RunState::TimedOn);
    assert_eq!(rebooted.ctl.timer_minutes(), 7);
    rebooted.step();
    assert!(rebooted.ctl.relays_energised());
    let start = rebooted.last(EventKind::TimedStart).unwrap();
    assert_eq!(start.minutes, Some(7));
    assert_eq!(start.context.as_deref(), Some("Resume After Suspend"));
}

#[test]
fn forced_reset_outside_a_session_keeps_resume_target() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Standby);
    bench.settle(RunState::Standby);
    let out = bench.ctl.forced_reset(ResumeCause::OutOfMemory);
    assert_eq!(out.exit, Some(ExitSignal::Restart));
    assert_eq!(bench.ctl.settings().resume_cause, ResumeCause::OutOfMemory);
    assert_eq!(bench.ctl.settings().resume_state, RunState::Standby);
    assert_eq!(bench.ctl.settings().resume_minutes, None);
    assert_eq!(bench.ctl.snapshot().cause, ResumeCause::OutOfMemory);
    assert_eq!(bench.ctl.snapshot().relay_mask, [false; 4]);
}

#[test]
fn last_state_policy_resumes_timed_session() {
    let settings = DeviceSettings {
        power_on_code: PowerOnPolicy::Last.code(),
        resume_state: RunState::TimedOn,
        resume_minutes: Some(20),
        resume_cause: ResumeCause::MainsOff,
        ..DeviceSettings::default()
    };
    let mut bench = Bench::new(settings);
    bench.step();
    assert_eq!(bench.ctl.run_state(), RunState::GoToTimedOn);
    bench.settle(RunState::TimedOn);
    assert_eq!(bench.ctl.timer_minutes(), 20);
    bench.step();
    let start = bench.last(EventKind::TimedStart).unwrap();
    assert_eq!(start.minutes, Some(20));
    assert!(bench.kinds().contains(&EventKind::MainsRestored));
}

#[test]
fn heartbeat_follows_initial_delay_then_interval() {
    let mut bench = Bench::with_policy(PowerOnPolicy::Continuous);
    bench.settle(RunState::AlwaysOn);
    bench.step();
    let count = |b: &Bench| b.kinds().iter().filter(|k| **k == EventKind::Heartbeat).count();
    let before = count(&bench);
    bench.run_secs(45);
    assert_eq!(count(&bench) - before, 1);
    let hb = bench.last(EventKind::Heartbeat).unwrap();
    assert_eq!(hb.run, Some(6));
    assert_eq!(hb.charge, Some(ChargeState::Charging.code()));
    assert!(hb.extra.contains_key("VBT"));
    bench.run_secs(60);
    assert_eq!(count(&bench) - before, 2);
}
