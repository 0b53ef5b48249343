use chrono::{NaiveDate, NaiveDateTime};
use std::time::Duration;
use trolley::config::Config;
use trolley::controller::{Controller, TickInput};
use trolley::persistence::ResumeSnapshot;
use trolley::schedule::{ScheduleBitmask, SlotIndex};
use trolley::sensors::{HubStatus, SensorFrame};
use trolley::settings::DeviceSettings;
use trolley::telemetry::{EventKind, TelemetryEvent};
use trolley::types::{ChargeState, PowerOnPolicy, RunState, SmartPhase};

struct Bench {
    ctl: Controller,
    at: Duration,
    clock: Option<NaiveDateTime>,
    frame: SensorFrame,
    events: Vec<TelemetryEvent>,
}

impl Bench {
    fn new(settings: DeviceSettings, frame: SensorFrame) -> Self {
        Self {
            ctl: Controller::new(&Config::default(), settings, ResumeSnapshot::cleared()),
            at: Duration::ZERO,
            clock: None,
            frame,
            events: Vec::new(),
        }
    }

    fn standby_with(settings: DeviceSettings, frame: SensorFrame) -> Self {
        let settings = DeviceSettings {
            power_on_code: PowerOnPolicy::Standby.code(),
            ..settings
        };
        let mut bench = Self::new(settings, frame);
        bench.run_secs(2);
        assert_eq!(bench.ctl.run_state(), RunState::Standby);
        bench
    }

    fn standby(settings: DeviceSettings) -> Self {
        Self::standby_with(settings, bench_frame())
    }

    fn four_devices() -> Self {
        Self::standby(DeviceSettings {
            devices_per_outlet: [2, 2, 0, 0],
            ..DeviceSettings::default()
        })
    }

    /// Set the wall clock and let the controller see it
    fn at_clock(&mut self, now: NaiveDateTime) {
        self.clock = Some(now);
        self.step();
    }

    fn run_secs(&mut self, secs: u64) {
        for _ in 0..secs {
            self.step();
        }
    }

    fn step(&mut self) {
        self.at += Duration::from_secs(1);
        let out = self.ctl.tick(TickInput {
            at: self.at,
            clock: self.clock,
            frame: self.frame.clone(),
        });
        self.events.extend(out.events);
    }

    /// Step until an event of `kind` shows up, at most `limit` seconds
    fn run_until(&mut self, kind: EventKind, limit: u64) -> TelemetryEvent {
        let seen = self.events.len();
        for _ in 0..limit {
            self.step();
            if let Some(e) = self.events[seen..].iter().find(|e| e.kind == kind) {
                return e.clone();
            }
        }
        panic!("no {:?} within {} s", kind, limit);
    }

    fn progress(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::VariableChanged)
            .filter_map(|e| e.context.clone())
            .collect()
    }

    fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

fn bench_frame() -> SensorFrame {
    SensorFrame::new()
        .with_mains(true)
        .with_power(230.0, 1.0)
        .with_temperature(25.0)
}

fn noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2030, 3, 6)
        .unwrap()
        .and_hms_opt(12, 10, 0)
        .unwrap()
}

#[test]
fn smart_ac_runs_warmup_monitoring_and_extra_time() {
    let mut bench = Bench::four_devices();
    assert_eq!(bench.ctl.handle_admin("ouc"), 7);

    let start = bench.run_until(EventKind::SmartStart, 5);
    assert_eq!(start.context.as_deref(), Some("Normal Warm-up Smart AC"));
    assert_eq!(bench.ctl.run_state(), RunState::ChargedOn);
    assert_eq!(bench.ctl.smart_phase(), SmartPhase::WarmUp);
    let ack = bench
        .events
        .iter()
        .find(|e| e.kind == EventKind::WebSmartCharge)
        .unwrap();
    assert_eq!(ack.context.as_deref(), Some("Web Cmd Smart Charge"));

    // Two minutes of warm-up at full current
    bench.run_until(EventKind::VariableChanged, 125);
    assert_eq!(bench.ctl.charge_state(), ChargeState::FullRateCharging);
    assert_eq!(bench.ctl.smart_phase(), SmartPhase::Charge);

    // Draw falls under 4 x 0.01 A and stays flat
    bench.frame.amps = 0.02;
    let end = bench.run_until(EventKind::SmartEnd, 600);
    assert_eq!(end.context.as_deref(), Some("Extra time ended"));
    assert_eq!(end.charge, Some(ChargeState::Ended.code()));
    assert_eq!(
        bench.progress(),
        vec![
            "Full rate Charging Smart AC",
            "Rate monitoring started",
            "Rate Monitoring Done",
        ]
    );

    bench.step();
    assert_eq!(bench.ctl.run_state(), RunState::Standby);
    assert!(!bench.ctl.relays_energised());
    assert_eq!(bench.ctl.smart_phase(), SmartPhase::Idle);
}

#[test]
fn smart_ac_stops_at_maximum_on_time() {
    let mut bench = Bench::four_devices();
    assert_eq!(bench.ctl.handle_param("mxo5"), 28);
    assert_eq!(bench.ctl.handle_admin("ouc"), 7);
    bench.run_until(EventKind::SmartStart, 5);
    assert_eq!(bench.ctl.handle_param("mxo10"), -100);

    let end = bench.run_until(EventKind::SmartEnd, 400);
    assert_eq!(end.context.as_deref(), Some("Stopped at Maximum Time Charging"));
    assert_eq!(end.minutes, Some(5));
    bench.step();
    assert_eq!(bench.ctl.run_state(), RunState::Standby);
}

#[test]
fn smart_charge_restarts_after_mains_blip() {
    let mut bench = Bench::four_devices();
    bench.ctl.handle_admin("ouc");
    bench.run_until(EventKind::SmartStart, 5);
    bench.run_until(EventKind::VariableChanged, 125);

    bench.frame.mains_present = false;
    let suspended = bench.run_until(EventKind::SmartEnd, 2);
    assert_eq!(
        suspended.context.as_deref(),
        Some("Suspended Mains Off or Overheated")
    );
    assert!(bench.ctl.settings().has_resume());

    bench.run_secs(20);
    bench.frame.mains_present = true;
    let restarted = bench.run_until(EventKind::SmartStart, 5);
    assert_eq!(restarted.context.as_deref(), Some("Normal Warm-up Smart AC"));
    assert_eq!(bench.count(EventKind::MainsRestored), 1);
    assert_eq!(bench.ctl.charge_minutes(), 0);
    assert_eq!(bench.ctl.smart_phase(), SmartPhase::WarmUp);
    assert!(!bench.ctl.settings().has_resume());
}

#[test]
fn smart_charge_overheat_stops_session() {
    let mut bench = Bench::four_devices();
    bench.ctl.handle_admin("ouc");
    bench.run_until(EventKind::SmartStart, 5);

    bench.frame.temperature_c = 50.0;
    let end = bench.run_until(EventKind::SmartEnd, 2);
    assert_eq!(end.context.as_deref(), Some("Suspended Mains Off or Overheated"));
    assert_eq!(bench.count(EventKind::Overheated), 1);
    bench.step();
    assert_eq!(bench.ctl.run_state(), RunState::Standby);
    assert!(!bench.ctl.relays_energised());

    // Cooling down does not restart a smart session
    bench.frame.temperature_c = 25.0;
    bench.run_secs(30);
    assert_eq!(bench.count(EventKind::SmartStart), 1);
}

#[test]
fn smart_charge_waits_for_overheated_cabinet_to_cool() {
    let mut bench = Bench::four_devices();
    bench.frame.temperature_c = 50.0;
    bench.run_secs(2);
    assert!(bench.ctl.is_overheated());

    assert_eq!(bench.ctl.handle_admin("ouc"), 7);
    bench.run_secs(30);
    assert_eq!(bench.ctl.run_state(), RunState::GoToChargedOn);
    assert!(!bench.ctl.relays_energised());
    assert_eq!(bench.count(EventKind::SmartStart), 0);

    // Still inside the hysteresis band
    bench.frame.temperature_c = 40.0;
    bench.run_secs(5);
    assert!(!bench.ctl.relays_energised());

    bench.frame.temperature_c = 34.0;
    bench.run_until(EventKind::SmartStart, 5);
    assert_eq!(bench.ctl.run_state(), RunState::ChargedOn);
    assert!(bench.ctl.relays_energised());
}

#[test]
fn usbc_with_hub_completes_from_port_leds() {
    // The hub is detected at startup
    let frame = bench_frame().with_hub(HubStatus::from_channel_strings(&["RRG", "O"]));
    let mut bench = Bench::standby_with(DeviceSettings::default(), frame);
    assert!(bench.ctl.settings().hub_board);

    assert_eq!(bench.ctl.handle_admin("usb"), 27);
    let start = bench.run_until(EventKind::SmartStart, 5);
    assert_eq!(start.context.as_deref(), Some("Normal Start USB-C"));
    assert_eq!(bench.ctl.run_state(), RunState::ChargedOnUsbC);
    // No warm-up with a hub
    assert_eq!(bench.ctl.smart_phase(), SmartPhase::Charge);

    bench.run_secs(90);
    bench.frame.hub = Some(HubStatus::from_channel_strings(&["GGG", "O"]));
    bench.run_until(EventKind::VariableChanged, 30);
    assert_eq!(bench.ctl.charge_state(), ChargeState::Done);

    // A port going red at the re-check postpones the end but keeps Done
    bench.frame.hub = Some(HubStatus::from_channel_strings(&["GRG", "O"]));
    let again = bench.run_until(EventKind::VariableChanged, 310);
    assert_eq!(again.context.as_deref(), Some("Hub port charging again"));
    assert_eq!(bench.ctl.charge_state(), ChargeState::Done);
    assert!(bench.ctl.relays_energised());

    bench.frame.hub = Some(HubStatus::from_channel_strings(&["GGG", "O"]));
    let end = bench.run_until(EventKind::SmartEnd, 310);
    assert_eq!(end.context.as_deref(), Some("Extra time ended"));
    assert_eq!(
        bench.progress(),
        vec!["Hub ports green or off", "Hub port charging again"]
    );
}

fn smart_schedule_at(now: &NaiveDateTime) -> String {
    let mut bitmask = ScheduleBitmask::default();
    bitmask.set(SlotIndex::at(now), true);
    bitmask.pack()
}

#[test]
fn smart_start_schedule_launches_once_per_period() {
    let mut bench = Bench::four_devices();
    bench.at_clock(noon());
    assert_eq!(bench.ctl.handle_param("sch31/12/2099"), 4);
    let packed = smart_schedule_at(&noon());
    assert_eq!(bench.ctl.handle_param(&format!("oda{}", packed)), 6);
    assert_eq!(bench.ctl.handle_param("mxo5"), 28);
    assert_eq!(bench.ctl.handle_admin("auo"), 4);

    bench.step();
    let enabled = bench
        .events
        .iter()
        .find(|e| e.kind == EventKind::WebSmartAutoOn)
        .unwrap();
    assert_eq!(enabled.auto, Some(1));
    assert!(bench.ctl.settings().is_smart_monitoring);

    let start = bench.run_until(EventKind::SmartStart, 3);
    assert_eq!(start.context.as_deref(), Some("Normal Warm-up Smart AC"));
    assert_eq!(bench.ctl.run_state(), RunState::ChargedOnAuto);

    bench.run_until(EventKind::SmartEnd, 400);
    bench.run_secs(60);
    assert_eq!(bench.ctl.run_state(), RunState::Standby);
    assert_eq!(bench.count(EventKind::SmartStart), 1);
    // Monitoring carries on for the next scheduled period
    assert!(bench.ctl.settings().is_smart_monitoring);
}

#[test]
fn smart_charge_ending_in_next_period_does_not_relaunch() {
    let mut bench = Bench::four_devices();
    bench.at_clock(noon());
    let day = noon().date();
    let mut bitmask = ScheduleBitmask::default();
    for (hour, minute) in [(12, 0), (12, 30), (13, 0)] {
        let slot = SlotIndex::at(&day.and_hms_opt(hour, minute, 0).unwrap());
        bitmask.set(slot, true);
    }
    assert_eq!(bench.ctl.handle_param("sch31/12/2099"), 4);
    assert_eq!(bench.ctl.handle_param(&format!("oda{}", bitmask.pack())), 6);
    assert_eq!(bench.ctl.handle_param("mxo5"), 28);
    assert_eq!(bench.ctl.handle_admin("auo"), 4);
    bench.run_until(EventKind::SmartStart, 3);

    // The charge runs over into the next half hour and ends there
    bench.run_secs(60);
    bench.clock = day.and_hms_opt(12, 40, 0);
    bench.run_until(EventKind::SmartEnd, 400);
    bench.run_secs(120);
    assert_eq!(bench.ctl.run_state(), RunState::Standby);
    assert_eq!(bench.count(EventKind::SmartStart), 1);

    // The following period starts afresh
    bench.clock = day.and_hms_opt(13, 5, 0);
    bench.run_until(EventKind::SmartStart, 3);
    assert_eq!(bench.count(EventKind::SmartStart), 2);
}

#[test]
fn smart_start_supersedes_continuous_session() {
    let settings = DeviceSettings {
        devices_per_outlet: [2, 2, 0, 0],
        ..DeviceSettings::default()
    };
    let mut bench = Bench::new(settings, bench_frame());
    bench.clock = Some(noon());
    bench.run_until(EventKind::ContinuousStart, 5);

    bench.ctl.handle_param("sch31/12/2099");
    bench.ctl.handle_param(&format!("oda{}", smart_schedule_at(&noon())));
    assert_eq!(bench.ctl.handle_admin("auo"), 4);

    let end = bench.run_until(EventKind::ContinuousEnd, 3);
    assert_eq!(end.context.as_deref(), Some("Stopped for Auto Smart Charge"));
    // Started in the same tick
    assert_eq!(bench.count(EventKind::SmartStart), 1);
    assert_eq!(bench.ctl.run_state(), RunState::ChargedOnAuto);
}

#[test]
fn smart_start_schedule_expiry_turns_monitoring_off() {
    let mut bench = Bench::four_devices();
    bench.at_clock(noon());
    bench.ctl.handle_param("sch06/03/2030");
    // Slot set an hour later, so nothing starts today
    let later = noon() + chrono::Duration::hours(1);
    bench.ctl.handle_param(&format!("oda{}", smart_schedule_at(&later)));
    assert_eq!(bench.ctl.handle_admin("auo"), 4);
    bench.run_secs(5);
    assert!(bench.ctl.settings().is_smart_monitoring);
    assert_eq!(bench.count(EventKind::SmartStart), 0);

    bench.clock = Some(noon() + chrono::Duration::days(1));
    let expired = bench.run_until(EventKind::ScheduleExpired, 2);
    assert_eq!(
        expired.context.as_deref(),
        Some("Smart AC or USBC Schedule Expired")
    );
    assert!(!bench.ctl.settings().is_smart_monitoring);
}

#[test]
fn smart_start_reports_invalid_clock_once() {
    let mut bench = Bench::four_devices();
    bench.at_clock(noon());
    bench.ctl.handle_param("sch31/12/2099");
    let later = noon() + chrono::Duration::hours(2);
    bench.ctl.handle_param(&format!("oda{}", smart_schedule_at(&later)));
    bench.ctl.handle_admin("auo");
    bench.step();

    bench.clock = None;
    bench.run_secs(10);
    let invalid: Vec<_> = bench
        .events
        .iter()
        .filter(|e| e.context.as_deref() == Some("Time invalid"))
        .collect();
    assert_eq!(invalid.len(), 1);
}

#[test]
fn clearing_smart_schedule_exits_monitoring() {
    let mut bench = Bench::four_devices();
    bench.at_clock(noon());
    bench.ctl.handle_param("sch31/12/2099");
    let later = noon() + chrono::Duration::hours(2);
    bench.ctl.handle_param(&format!("oda{}", smart_schedule_at(&later)));
    bench.ctl.handle_admin("auo");
    bench.step();
    assert!(bench.ctl.settings().is_smart_monitoring);

    let empty = ScheduleBitmask::default().pack();
    assert_eq!(bench.ctl.handle_param(&format!("oda{}", empty)), 6);
    assert!(!bench.ctl.settings().is_smart_monitoring);
    let stop = bench.run_until(EventKind::WebSmartAutoStop, 2);
    assert_eq!(stop.context.as_deref(), Some("Disable"));
    bench.step();
    assert_eq!(bench.ctl.run_state(), RunState::Standby);
}
