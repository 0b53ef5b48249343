//! Run-state controller
//!
//! Owns the top-level operating mode, the charge progress and the device
//! settings. The runtime calls [`Controller::tick`] once per period with the
//! latest sensor frame; the controller answers with the relay changes,
//! persistence writes and telemetry records that tick produced. The
//! controller itself performs no I/O.

use crate::config::{Config, TimingConfig};
use crate::engine::{ChargeEngine, EngineSettings};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::persistence::ResumeSnapshot;
use crate::schedule::{self, PeriodTracker};
use crate::sensors::{OverheatDetector, OverheatEdge, SensorFrame};
use crate::session::ChargeSessionTracker;
use crate::settings::DeviceSettings;
use crate::telemetry::{EventKind, TelemetryEvent};
use crate::types::{
    ChargeState, MAX_RELAYS, PowerState, ResumeCause, RunState, SmartPhase, ViewState,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod commands;
mod handlers;
mod heartbeat;
mod relays;
mod smart;
mod timers;
pub mod transitions;
mod web;

pub use commands::AdminOp;
pub use relays::{Activity, RelayContext};
pub use transitions::{CommandContext, Reaction, Stimulus};

use timers::{HeartbeatScheduler, MinuteTimer};

/// Relay change requested by a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    /// Close the marked relays, one after another
    Energise([bool; MAX_RELAYS]),
    /// Open every relay at once
    OpenAll,
}

/// Record the runtime must write before acting on anything else
#[derive(Debug, Clone, PartialEq)]
pub enum PersistRequest {
    Settings(Box<DeviceSettings>),
    Snapshot(ResumeSnapshot),
}

/// Why the controller wants the process to end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitSignal {
    Restart,
    Hibernate,
}

/// Input to one tick
#[derive(Debug, Clone)]
pub struct TickInput {
    /// Monotonic time since boot
    pub at: Duration,
    /// Cabinet local time, `None` while the clock is invalid
    pub clock: Option<NaiveDateTime>,
    pub frame: SensorFrame,
}

/// Everything a tick (or a command) asks the runtime to do, in order
#[derive(Debug, Clone, Default)]
pub struct TickOutput {
    pub persist: Vec<PersistRequest>,
    pub relays: Vec<RelayCommand>,
    pub events: Vec<TelemetryEvent>,
    pub exit: Option<ExitSignal>,
    /// Enter the low-power wait for mains
    pub sleep: bool,
}

impl TickOutput {
    pub fn is_empty(&self) -> bool {
        self.persist.is_empty()
            && self.relays.is_empty()
            && self.events.is_empty()
            && self.exit.is_none()
            && !self.sleep
    }

    pub fn event_kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }
}

/// The cabinet's state machine and everything it owns
pub struct Controller {
    settings: DeviceSettings,
    snapshot: ResumeSnapshot,
    timing: TimingConfig,
    relay_count: usize,
    version: String,

    run_state: RunState,
    prev_state: RunState,
    charge_state: ChargeState,
    power_state: PowerState,
    smart_phase: SmartPhase,
    relays_on: bool,
    started: bool,

    engine: ChargeEngine,
    sessions: ChargeSessionTracker,
    overheat: OverheatDetector,
    period: PeriodTracker,
    minute_timer: MinuteTimer,
    heartbeat: HeartbeatScheduler,

    /// Minutes on charge in the current session
    charge_minutes: u32,
    /// Minutes served by a timed-on session
    timer_minutes: u32,
    /// Length of the running timed-on session
    timer_period: u32,

    mains_off_since: Option<Duration>,
    last_current_sample: Duration,
    hub_check_at: Duration,
    auto_announce_off: bool,
    auto_time_invalid_reported: bool,
    smart_time_invalid_reported: bool,
    sleep_requested: bool,
    exit_signalled: bool,

    now: Duration,
    clock: Option<NaiveDateTime>,
    frame: SensorFrame,
    out: TickOutput,
    logger: StructuredLogger,
}

impl Controller {
    pub fn new(config: &Config, settings: DeviceSettings, snapshot: ResumeSnapshot) -> Self {
        let mut settings = settings;
        if config.cabinet.hub_board {
            settings.hub_board = true;
        }
        let engine = ChargeEngine::new(EngineSettings::from_device(
            &settings,
            config.timing.current_sample_ms as f32 / 60_000.0,
        ));
        let logger = get_logger_with_context(
            LogContext::new("controller").with_field("item", settings.item_name.clone()),
        );

        Self {
            snapshot,
            timing: config.timing.clone(),
            relay_count: config.cabinet.relay_count.min(MAX_RELAYS),
            version: env!("CARGO_PKG_VERSION").to_string(),
            run_state: RunState::Startup,
            prev_state: RunState::Startup,
            charge_state: ChargeState::NotCharging,
            power_state: PowerState::MainsOff,
            smart_phase: SmartPhase::Idle,
            relays_on: false,
            started: false,
            engine,
            sessions: ChargeSessionTracker::default(),
            overheat: OverheatDetector::new(),
            period: PeriodTracker::new(),
            minute_timer: MinuteTimer::default(),
            heartbeat: HeartbeatScheduler::default(),
            charge_minutes: 0,
            timer_minutes: 0,
            timer_period: settings.timer_period_mins,
            mains_off_since: None,
            last_current_sample: Duration::ZERO,
            hub_check_at: Duration::ZERO,
            auto_announce_off: false,
            auto_time_invalid_reported: false,
            smart_time_invalid_reported: false,
            sleep_requested: false,
            exit_signalled: false,
            now: Duration::ZERO,
            clock: None,
            frame: SensorFrame::default(),
            out: TickOutput::default(),
            settings,
            logger,
        }
    }

    /// Version reported in the startup record
    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = version.into();
        self
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn prev_state(&self) -> RunState {
        self.prev_state
    }

    pub fn view(&self) -> ViewState {
        self.run_state.view()
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn charge_state(&self) -> ChargeState {
        self.charge_state
    }

    pub fn smart_phase(&self) -> SmartPhase {
        self.smart_phase
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> &ResumeSnapshot {
        &self.snapshot
    }

    pub fn charge_minutes(&self) -> u32 {
        self.charge_minutes
    }

    pub fn timer_minutes(&self) -> u32 {
        self.timer_minutes
    }

    pub fn relays_energised(&self) -> bool {
        self.relays_on
    }

    pub fn is_overheated(&self) -> bool {
        self.overheat.is_hot()
    }

    pub fn sessions(&self) -> &ChargeSessionTracker {
        &self.sessions
    }

    pub fn engine(&self) -> &ChargeEngine {
        &self.engine
    }

    pub fn last_frame(&self) -> &SensorFrame {
        &self.frame
    }

    /// Whether a sleep was requested and has not been woken from yet
    pub fn is_asleep(&self) -> bool {
        self.sleep_requested
    }

    /// Advance the state machine by one tick
    pub fn tick(&mut self, input: TickInput) -> TickOutput {
        self.now = input.at;
        self.clock = input.clock;
        self.frame = input.frame;
        self.refresh_power_state();

        self.count_minutes();
        self.check_overheat();
        self.check_mains();
        self.check_sleep_grace();
        self.check_scheduled_smart_start();
        self.run_state_handler();
        self.track_session();
        self.check_heartbeat();

        self.take_output()
    }

    /// Hand over what commands or diagnostics queued since the last tick
    pub fn take_output(&mut self) -> TickOutput {
        std::mem::take(&mut self.out)
    }

    /// Raise a diagnostic record
    pub fn report_diagnostic(&mut self, message: &str) {
        self.logger.error(message);
        let event = TelemetryEvent::new(EventKind::Diagnostic)
            .run(self.view())
            .power(self.power_state)
            .context(message);
        self.emit(event);
    }

    fn run_state_handler(&mut self) {
        use RunState::*;
        match self.run_state {
            Startup => {
                if self.started {
                    self.report_diagnostic("Illegal run state Startup, falling back to standby");
                    self.set_state(GoToStandby);
                } else {
                    self.startup();
                }
            }
            Standby => {}
            GoToStandby => self.go_to_standby(),
            GoToTimedOn => self.go_to_timed_on(),
            TimedOn => self.timed_on(),
            GoToAlwaysOn => self.go_to_always_on(),
            AlwaysOn => self.always_on(),
            GoToAuto => self.set_state(AutoOff),
            AutoOn | AutoOff => self.auto(),
            GoToChargedOn => self.go_to_smart(false, false),
            GoToChargedOnAuto => self.go_to_smart(false, true),
            GoToChargedOnUsbC => self.go_to_smart(true, false),
            GoToChargedOnUsbCAuto => self.go_to_smart(true, true),
            ChargedOn | ChargedOnAuto | ChargedOnUsbC | ChargedOnUsbCAuto => self.smart_charge(),
            GoToSleep => self.go_to_sleep(),
            Sleeping => self.sleeping(),
            Restart => self.restart(),
            WebSmartExit | WebRestart | WebFactoryReset | WebStandby | WebHibernate | WebAuto
            | WebChargedOn | WebAlwaysOn | WebTimedOn | WebSmartAuto | WebChargedOnUsbC => {
                self.web_command()
            }
        }
    }

    fn reaction(&self, stimulus: Stimulus) -> Reaction {
        transitions::react(self.run_state, stimulus, &self.command_context())
    }

    pub(crate) fn command_context(&self) -> CommandContext {
        let usable = match self.clock {
            Some(now) => {
                !schedule::has_expired(Some(&now), self.settings.schedule_valid_until)
                    && !self.settings.schedule.is_none()
            }
            None => false,
        };
        CommandContext {
            schedule_kind: self.settings.schedule_kind,
            schedule_usable: usable,
            monitoring: self.settings.is_smart_monitoring,
        }
    }

    fn count_minutes(&mut self) {
        let elapsed = self.minute_timer.poll(self.now);
        if elapsed == 0 || self.reaction(Stimulus::MinuteElapsed) != Reaction::Count {
            return;
        }
        if self.run_state == RunState::TimedOn {
            self.timer_minutes += elapsed;
        } else {
            self.charge_minutes += elapsed;
        }
    }

    fn check_overheat(&mut self) {
        match self
            .overheat
            .update(self.frame.temperature_c, self.settings.max_temp_c)
        {
            OverheatEdge::BecameHot => {
                self.logger.warn(&format!(
                    "Overheated at {:.1} C (limit {} C) in {}",
                    self.frame.temperature_c, self.settings.max_temp_c, self.run_state
                ));
                let event = TelemetryEvent::new(EventKind::Overheated)
                    .run(self.view())
                    .power(self.power_state)
                    .temperature(self.frame.temperature_c);
                self.emit(event);
                match self.reaction(Stimulus::Overheated) {
                    Reaction::Suspend => self.suspend(ResumeCause::Overheat),
                    Reaction::Transition(next) => {
                        self.smart_overheated();
                        self.set_state(next);
                    }
                    _ => {}
                }
            }
            OverheatEdge::Cooled => {
                self.logger.info(&format!(
                    "Temperature back to {:.1} C, re-armed",
                    self.frame.temperature_c
                ));
            }
            OverheatEdge::None => {}
        }
    }

    fn check_mains(&mut self) {
        if self.frame.mains_present {
            self.mains_off_since = None;
            return;
        }
        if self.mains_off_since.is_some() {
            return;
        }
        self.mains_off_since = Some(self.now);

        let reaction = self.reaction(Stimulus::MainsLost);
        self.logger
            .info(&format!("Mains lost in {}: {:?}", self.run_state, reaction));
        match reaction {
            Reaction::Suspend => self.suspend(ResumeCause::MainsOff),
            Reaction::Sleep => self.standby_mains_lost(),
            Reaction::Transition(next) => self.set_state(next),
            Reaction::Count | Reaction::Defer | Reaction::Ignore | Reaction::Reject => {}
        }
    }

    /// Sleep once mains has stayed off past the grace period
    fn check_sleep_grace(&mut self) {
        let Some(since) = self.mains_off_since else {
            return;
        };
        let grace = Duration::from_millis(self.timing.sleep_grace_ms);
        if self.now.saturating_sub(since) < grace
            || self.reaction(Stimulus::MainsLost) != Reaction::Suspend
        {
            return;
        }

        self.settings.resume_state = self.run_state;
        if self.run_state.is_smart_charge() {
            self.settings.resume_minutes = Some(0);
        } else if !self.settings.has_resume() {
            self.settings.resume_minutes = Some(self.active_minutes());
        }
        self.settings.resume_cause = ResumeCause::MainsOff;
        self.persist_settings();
        self.prev_state = self.run_state;
        self.set_state(RunState::GoToSleep);
    }

    fn track_session(&mut self) {
        if self.relays_on {
            let minutes = self.active_minutes();
            self.sessions.update(self.frame.amps, minutes);
        }
    }

    /// Minutes served by whatever is running now
    pub(crate) fn active_minutes(&self) -> u32 {
        if self.run_state == RunState::TimedOn {
            self.timer_minutes
        } else {
            self.charge_minutes
        }
    }

    pub(crate) fn set_state(&mut self, next: RunState) {
        if next != self.run_state {
            self.logger
                .info(&format!("Run state {} -> {}", self.run_state, next));
            self.run_state = next;
        }
    }

    pub(crate) fn refresh_power_state(&mut self) {
        self.power_state = PowerState::derive(self.frame.mains_present, self.charge_state);
    }

    /// Mains returned after a power loss rather than an overheat
    pub(crate) fn resuming_from_power_loss(&self) -> bool {
        matches!(
            self.settings.resume_cause,
            ResumeCause::MainsOff | ResumeCause::DeepPowerDown
        )
    }

    pub(crate) fn mains_ok(&self) -> bool {
        self.frame.mains_present && !self.overheat.is_hot()
    }

    pub(crate) fn elapsed_since(&self, at: Duration) -> Duration {
        self.now.saturating_sub(at)
    }

    pub(crate) fn emit(&mut self, mut event: TelemetryEvent) {
        if event.date.is_none() {
            event.date = self
                .clock
                .map(|c| c.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
        self.logger.debug(&format!("Event {}", event.kind));
        self.out.events.push(event);
    }

    pub(crate) fn emit_mains_off(&mut self) {
        let event = TelemetryEvent::new(EventKind::MainsOff)
            .connected(true)
            .power(PowerState::MainsOff);
        self.emit(event);
    }

    pub(crate) fn emit_mains_restored(&mut self) {
        let event = TelemetryEvent::new(EventKind::MainsRestored)
            .connected(true)
            .power(PowerState::MainsOn);
        self.emit(event);
    }

    /// Queue a settings write, replacing any queued earlier this tick
    pub(crate) fn persist_settings(&mut self) {
        self.out
            .persist
            .retain(|p| !matches!(p, PersistRequest::Settings(_)));
        self.out
            .persist
            .push(PersistRequest::Settings(Box::new(self.settings.clone())));
    }

    pub(crate) fn persist_snapshot(&mut self) {
        self.out
            .persist
            .retain(|p| !matches!(p, PersistRequest::Snapshot(_)));
        self.out
            .persist
            .push(PersistRequest::Snapshot(self.snapshot.clone()));
    }

    /// Forget a pending resume once it has been picked up
    pub(crate) fn clean_up_resume(&mut self) {
        self.settings.clear_resume();
        self.persist_settings();
        if !self.snapshot.is_cleared() {
            self.snapshot = ResumeSnapshot::cleared();
            self.persist_snapshot();
        }
    }

    pub(crate) fn refresh_engine(&mut self) {
        self.engine.update_settings(EngineSettings::from_device(
            &self.settings,
            self.timing.current_sample_ms as f32 / 60_000.0,
        ));
    }

    pub(crate) fn relay_mask(&self) -> [bool; MAX_RELAYS] {
        let mut mask = [false; MAX_RELAYS];
        for relay in mask.iter_mut().take(self.relay_count) {
            *relay = self.relays_on;
        }
        mask
    }

    /// Resume record describing the cabinet right now
    pub(crate) fn current_snapshot(
        &self,
        cause: ResumeCause,
        previous: RunState,
    ) -> ResumeSnapshot {
        ResumeSnapshot {
            cause,
            previous_run_state: previous,
            power_on_code: self.settings.power_on_code,
            relay_mask: self.relay_mask(),
            hub_present: self.settings.hub_board,
        }
    }
}
