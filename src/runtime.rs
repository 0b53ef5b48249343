//! Async runtime around the controller
//!
//! Owns the controller and the hardware, storage and telemetry
//! collaborators. Each tick it reads the sensors, steps the controller and
//! carries out the returned output in order: persistence first, then the
//! relays, then telemetry. Commands arrive over an mpsc channel and are
//! answered through a oneshot.

use crate::config::Config;
use crate::controller::{
    Controller, ExitSignal, PersistRequest, RelayCommand, TickInput, TickOutput,
};
use crate::error::{Result, TrolleyError};
use crate::logging::{StructuredLogger, get_logger};
use crate::persistence::{PersistentStore, load_settings_or_default, load_snapshot_or_cleared};
use crate::sensors::{Clock, PowerMonitor, SensorSampler, local_time};
use crate::telemetry::EventSink;
use crate::types::ResumeCause;
use async_trait::async_trait;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};

mod snapshot;

pub use snapshot::StatusSnapshot;

/// Reply sent to commands that arrive while the cabinet sleeps
const ASLEEP: i32 = -100;

/// Outlet relay hardware
#[async_trait]
pub trait RelayDriver: Send + Sync {
    /// Close one relay
    async fn energise(&self, relay: usize) -> Result<()>;
    /// Open every relay at once
    async fn open_all(&self) -> Result<()>;
}

/// Requests accepted by the runtime
#[derive(Debug)]
pub enum RuntimeCommand {
    Admin {
        command: String,
        reply: oneshot::Sender<i32>,
    },
    Param {
        command: String,
        reply: oneshot::Sender<i32>,
    },
    Shutdown,
}

/// Why [`Runtime::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeExit {
    /// Restart the process
    Restart,
    /// Power down until woken externally
    Hibernate,
    /// Stopped on request
    Shutdown,
}

impl From<ExitSignal> for RuntimeExit {
    fn from(signal: ExitSignal) -> Self {
        match signal {
            ExitSignal::Restart => RuntimeExit::Restart,
            ExitSignal::Hibernate => RuntimeExit::Hibernate,
        }
    }
}

/// Hardware the runtime drives
pub struct Hardware {
    pub monitor: Arc<dyn PowerMonitor>,
    pub relays: Arc<dyn RelayDriver>,
    pub clock: Arc<dyn Clock>,
}

/// Cloneable sender side of the command channel
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    commands_tx: mpsc::UnboundedSender<RuntimeCommand>,
}

impl RuntimeHandle {
    pub async fn admin(&self, command: &str) -> Result<i32> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::Admin {
            command: command.to_string(),
            reply,
        })?;
        rx.await
            .map_err(|_| TrolleyError::generic("runtime dropped the admin reply"))
    }

    pub async fn param(&self, command: &str) -> Result<i32> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::Param {
            command: command.to_string(),
            reply,
        })?;
        rx.await
            .map_err(|_| TrolleyError::generic("runtime dropped the param reply"))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(RuntimeCommand::Shutdown)
    }

    fn send(&self, command: RuntimeCommand) -> Result<()> {
        self.commands_tx
            .send(command)
            .map_err(|_| TrolleyError::generic("runtime is not running"))
    }
}

pub struct Runtime {
    config: Config,
    controller: Controller,
    hardware: Hardware,
    store: Arc<dyn PersistentStore>,
    sink: Arc<dyn EventSink>,
    sampler: SensorSampler,
    zone: Tz,

    commands_rx: mpsc::UnboundedReceiver<RuntimeCommand>,
    commands_tx: mpsc::UnboundedSender<RuntimeCommand>,
    status_snapshot_tx: watch::Sender<Arc<StatusSnapshot>>,
    status_snapshot_rx: watch::Receiver<Arc<StatusSnapshot>>,

    booted_at: Instant,
    last_sensor_poll: Option<Instant>,
    last_tick_ms: u64,
    total_ticks: u64,
    overrun_count: u64,
    logger: StructuredLogger,
}

impl Runtime {
    /// Load the persisted records and build the controller
    ///
    /// Unusable records are replaced with defaults and reported as
    /// diagnostics on the first tick.
    pub fn new(
        config: Config,
        hardware: Hardware,
        store: Arc<dyn PersistentStore>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let logger = get_logger("runtime");
        let zone: Tz = config
            .cabinet
            .timezone
            .parse()
            .map_err(|_| {
                TrolleyError::config(format!("Unknown time zone {}", config.cabinet.timezone))
            })?;

        let (settings, settings_err) = load_settings_or_default(store.as_ref());
        let (snapshot, snapshot_err) = load_snapshot_or_cleared(store.as_ref());

        let mut sampler = SensorSampler::new(&config.sensors);
        sampler.set_gain(settings.power_meter_factor);

        let mut controller =
            Controller::new(&config, settings, snapshot).with_version(env!("APP_VERSION"));
        if let Some(e) = settings_err {
            logger.warn(&format!("Settings record unusable, using defaults: {}", e));
            controller.report_diagnostic(&format!("Settings reset to defaults: {}", e));
        }
        if let Some(e) = snapshot_err {
            logger.warn(&format!("Resume record unusable, treated as cleared: {}", e));
            controller.report_diagnostic(&format!("Resume snapshot cleared: {}", e));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let initial = Arc::new(snapshot::build(&controller, 0, 0, 0));
        let (status_snapshot_tx, status_snapshot_rx) = watch::channel(initial);

        Ok(Self {
            config,
            controller,
            hardware,
            store,
            sink,
            sampler,
            zone,
            commands_rx,
            commands_tx,
            status_snapshot_tx,
            status_snapshot_rx,
            booted_at: Instant::now(),
            last_sensor_poll: None,
            last_tick_ms: 0,
            total_ticks: 0,
            overrun_count: 0,
            logger,
        })
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            commands_tx: self.commands_tx.clone(),
        }
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.status_snapshot_rx.clone()
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Run until the controller asks for a restart or hibernate, or a
    /// shutdown command arrives
    pub async fn run(&mut self) -> Result<RuntimeExit> {
        self.logger.info(&format!(
            "Starting run loop, tick {} ms, sensors every {} ms",
            self.config.timing.tick_interval_ms, self.config.timing.sensor_poll_ms
        ));
        let mut ticker = interval(self.config.timing.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(exit) = self.tick_once().await {
                        self.logger.info(&format!("Run loop ending: {:?}", exit));
                        return Ok(exit);
                    }
                }
                Some(cmd) = self.commands_rx.recv() => {
                    if let Some(exit) = self.handle_command(cmd).await {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    /// One sensor read, controller step and output execution
    ///
    /// A sensor read or controller step that runs past the watchdog bound
    /// forces a restart with the resume records written first.
    pub async fn tick_once(&mut self) -> Option<RuntimeExit> {
        let started = Instant::now();
        let bound = Duration::from_millis(self.config.timing.watchdog_ms);

        let poll_due = self
            .last_sensor_poll
            .is_none_or(|at| at.elapsed() >= self.config.timing.sensor_poll());
        let monitor = self.hardware.monitor.as_ref();
        let relays_energised = self.controller.relays_energised();
        let read = if poll_due {
            self.last_sensor_poll = Some(started);
            tokio::time::timeout(bound, self.sampler.poll(monitor, relays_energised)).await
        } else {
            tokio::time::timeout(bound, self.sampler.poll_mains(monitor))
                .await
                .map(|_| self.sampler.last().clone())
        };
        let Ok(frame) = read else {
            return self.watchdog_reset(started).await;
        };

        let clock = self
            .hardware
            .clock
            .now_utc()
            .map(|utc| local_time(utc, self.controller.settings(), self.zone));
        let input = TickInput {
            at: self.booted_at.elapsed(),
            clock,
            frame,
        };
        let output = self.controller.tick(input);
        if started.elapsed() > bound {
            return self.watchdog_reset(started).await;
        }
        let exit = self.execute(output).await;

        self.total_ticks = self.total_ticks.saturating_add(1);
        self.last_tick_ms = started.elapsed().as_millis() as u64;
        self.publish_snapshot();
        exit
    }

    /// Write the resume records and restart after a watchdog overrun
    async fn watchdog_reset(&mut self, started: Instant) -> Option<RuntimeExit> {
        self.last_tick_ms = started.elapsed().as_millis() as u64;
        self.total_ticks = self.total_ticks.saturating_add(1);
        self.overrun_count = self.overrun_count.saturating_add(1);
        self.logger.error(&format!(
            "Tick stalled for {} ms, over the {} ms watchdog bound",
            self.last_tick_ms, self.config.timing.watchdog_ms
        ));
        let output = self.controller.forced_reset(ResumeCause::Watchdog);
        let exit = self.execute(output).await;
        self.publish_snapshot();
        exit.or(Some(RuntimeExit::Restart))
    }

    async fn handle_command(&mut self, cmd: RuntimeCommand) -> Option<RuntimeExit> {
        match cmd {
            RuntimeCommand::Admin { command, reply } => {
                let code = self.controller.handle_admin(&command);
                let output = self.controller.take_output();
                let exit = self.execute(output).await;
                let _ = reply.send(code);
                exit
            }
            RuntimeCommand::Param { command, reply } => {
                let code = self.controller.handle_param(&command);
                if code > 0 {
                    self.sampler
                        .set_gain(self.controller.settings().power_meter_factor);
                }
                let output = self.controller.take_output();
                let exit = self.execute(output).await;
                let _ = reply.send(code);
                exit
            }
            RuntimeCommand::Shutdown => {
                self.logger.info("Shutdown requested");
                self.drain(self.config.timing.restart_drain_ms).await;
                Some(RuntimeExit::Shutdown)
            }
        }
    }

    /// Carry out one output; a sleep request is served here until mains
    /// returns
    async fn execute(&mut self, mut output: TickOutput) -> Option<RuntimeExit> {
        loop {
            self.persist(&output.persist);
            let failures = self.controller.take_output();
            output.events.extend(failures.events);

            self.switch_relays(&output.relays).await;
            let failures = self.controller.take_output();
            output.events.extend(failures.events);

            for event in output.events.drain(..) {
                if let Err(e) = self.sink.publish(event).await {
                    self.logger.warn(&format!("Telemetry publish failed: {}", e));
                }
            }

            if let Some(signal) = output.exit {
                self.drain(self.config.timing.restart_drain_ms).await;
                return Some(signal.into());
            }
            if !output.sleep {
                return None;
            }

            if let Some(exit) = self.wait_for_mains().await {
                return Some(exit);
            }
            let (snapshot, err) = load_snapshot_or_cleared(self.store.as_ref());
            if let Some(e) = err {
                self.controller
                    .report_diagnostic(&format!("Resume snapshot unreadable on wake: {}", e));
            }
            let at = self.booted_at.elapsed();
            output = self.controller.on_wake(snapshot, true, at);
            self.last_sensor_poll = None;
        }
    }

    fn persist(&mut self, requests: &[PersistRequest]) {
        for request in requests {
            let result = match request {
                PersistRequest::Settings(settings) => self.store.save_settings(settings),
                PersistRequest::Snapshot(snapshot) => self.store.save_snapshot(snapshot),
            };
            if let Err(e) = result {
                self.logger.error(&format!("Persistence write failed: {}", e));
                self.controller
                    .report_diagnostic(&format!("Persistence write failed: {}", e));
            }
        }
    }

    async fn switch_relays(&mut self, commands: &[RelayCommand]) {
        for command in commands {
            match command {
                RelayCommand::Energise(mask) => {
                    let mut first = true;
                    for (relay, on) in mask.iter().enumerate() {
                        if !*on {
                            continue;
                        }
                        // Stagger inrush across the outlets
                        if !first {
                            tokio::time::sleep(self.config.timing.relay_stagger()).await;
                        }
                        first = false;
                        if let Err(e) = self.hardware.relays.energise(relay).await {
                            self.logger
                                .error(&format!("Relay {} failed to close: {}", relay, e));
                            self.controller
                                .report_diagnostic(&format!("Relay {} fault: {}", relay, e));
                        }
                    }
                }
                RelayCommand::OpenAll => {
                    if let Err(e) = self.hardware.relays.open_all().await {
                        self.logger.error(&format!("Relays failed to open: {}", e));
                        self.controller
                            .report_diagnostic(&format!("Relay fault: {}", e));
                    }
                }
            }
        }
    }

    async fn drain(&self, timeout_ms: u64) -> bool {
        let timeout = Duration::from_millis(timeout_ms);
        let drained = tokio::time::timeout(timeout, self.sink.drain(timeout))
            .await
            .unwrap_or(false);
        if !drained {
            self.logger
                .warn(&format!("Telemetry not drained within {} ms", timeout_ms));
        }
        drained
    }

    /// Low-power wait: only the mains sensor is polled until it returns
    async fn wait_for_mains(&mut self) -> Option<RuntimeExit> {
        self.drain(self.config.timing.sleep_drain_ms).await;
        self.logger.info("Asleep, waiting for mains");
        self.publish_snapshot();

        let mut poll = interval(self.config.timing.sensor_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if self.sampler.poll_mains(self.hardware.monitor.as_ref()).await {
                        self.logger.info("Mains returned, waking");
                        return None;
                    }
                }
                Some(cmd) = self.commands_rx.recv() => {
                    match cmd {
                        RuntimeCommand::Admin { reply, .. }
                        | RuntimeCommand::Param { reply, .. } => {
                            let _ = reply.send(ASLEEP);
                        }
                        RuntimeCommand::Shutdown => return Some(RuntimeExit::Shutdown),
                    }
                }
            }
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = snapshot::build(
            &self.controller,
            self.last_tick_ms,
            self.total_ticks,
            self.overrun_count,
        );
        self.status_snapshot_tx.send_replace(Arc::new(snapshot));
    }
}
