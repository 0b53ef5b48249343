//! Telemetry records and the sinks that carry them off the cabinet
//!
//! Events use the short field keys the back office expects (`R`, `Z`, `LA` ...)
//! and are handed to an [`EventSink`] by the runtime after each tick.

use crate::error::{Result, TrolleyError};
use crate::logging::{StructuredLogger, get_logger};
use crate::types::{ChargeState, PowerState, ViewState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Continuous on started
    #[serde(rename = "CTOS")]
    ContinuousStart,
    #[serde(rename = "CTOE")]
    ContinuousEnd,
    #[serde(rename = "CTTS")]
    TimedStart,
    #[serde(rename = "CTTE")]
    TimedEnd,
    /// Smart charge started (AC or USB-C)
    #[serde(rename = "CTUS")]
    SmartStart,
    #[serde(rename = "CTUE")]
    SmartEnd,
    #[serde(rename = "CTSS")]
    ScheduleStart,
    #[serde(rename = "CTSE")]
    ScheduleEnd,
    #[serde(rename = "CTSX")]
    ScheduleExpired,
    #[serde(rename = "CTOV")]
    Overheated,
    #[serde(rename = "CTMX")]
    MainsOff,
    #[serde(rename = "CTMR")]
    MainsRestored,
    #[serde(rename = "CTSL")]
    Sleep,
    #[serde(rename = "WCOT")]
    WebTimedOn,
    #[serde(rename = "WCAU")]
    WebAuto,
    #[serde(rename = "WCOU")]
    WebSmartCharge,
    #[serde(rename = "WCAO")]
    WebSmartAutoOn,
    #[serde(rename = "WCAS")]
    WebSmartAutoStop,
    #[serde(rename = "WCON")]
    WebAlwaysOn,
    #[serde(rename = "WCST")]
    WebStandby,
    #[serde(rename = "WCRE")]
    WebRestart,
    #[serde(rename = "DEST")]
    Startup,
    #[serde(rename = "DEUP")]
    VariableChanged,
    #[serde(rename = "DRUP")]
    Heartbeat,
    #[serde(rename = "DIAG")]
    Diagnostic,
}

impl EventKind {
    /// Four-letter wire code
    pub fn code(self) -> &'static str {
        use EventKind::*;
        match self {
            ContinuousStart => "CTOS",
            ContinuousEnd => "CTOE",
            TimedStart => "CTTS",
            TimedEnd => "CTTE",
            SmartStart => "CTUS",
            SmartEnd => "CTUE",
            ScheduleStart => "CTSS",
            ScheduleEnd => "CTSE",
            ScheduleExpired => "CTSX",
            Overheated => "CTOV",
            MainsOff => "CTMX",
            MainsRestored => "CTMR",
            Sleep => "CTSL",
            WebTimedOn => "WCOT",
            WebAuto => "WCAU",
            WebSmartCharge => "WCOU",
            WebSmartAutoOn => "WCAO",
            WebSmartAutoStop => "WCAS",
            WebAlwaysOn => "WCON",
            WebStandby => "WCST",
            WebRestart => "WCRE",
            Startup => "DEST",
            VariableChanged => "DEUP",
            Heartbeat => "DRUP",
            Diagnostic => "DIAG",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: EventKind,
    /// Local timestamp, absent while the clock is invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// View state code
    #[serde(rename = "R", skip_serializing_if = "Option::is_none")]
    pub run: Option<u8>,
    /// Power state code
    #[serde(rename = "Z", skip_serializing_if = "Option::is_none")]
    pub power: Option<u8>,
    /// Connected to mains
    #[serde(rename = "C", skip_serializing_if = "Option::is_none")]
    pub connected: Option<u8>,
    #[serde(rename = "LA", skip_serializing_if = "Option::is_none")]
    pub amps: Option<f32>,
    #[serde(rename = "LV", skip_serializing_if = "Option::is_none")]
    pub volts: Option<f32>,
    /// Minutes on charge
    #[serde(rename = "K", skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u32>,
    #[serde(rename = "TMP", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Charge state code
    #[serde(rename = "KL", skip_serializing_if = "Option::is_none")]
    pub charge: Option<u8>,
    /// Free text context
    #[serde(rename = "CX", skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Smart monitoring flag
    #[serde(rename = "AO", skip_serializing_if = "Option::is_none")]
    pub auto: Option<u8>,
    /// Power-on policy code
    #[serde(rename = "POS", skip_serializing_if = "Option::is_none")]
    pub policy: Option<u8>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TelemetryEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            date: None,
            run: None,
            power: None,
            connected: None,
            amps: None,
            volts: None,
            minutes: None,
            temperature: None,
            charge: None,
            context: None,
            auto: None,
            policy: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn date(mut self, date: Option<String>) -> Self {
        self.date = date;
        self
    }

    pub fn run(mut self, view: ViewState) -> Self {
        self.run = Some(view.code());
        self
    }

    pub fn power(mut self, power: PowerState) -> Self {
        self.power = Some(power.code());
        self
    }

    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = Some(u8::from(connected));
        self
    }

    pub fn amps(mut self, amps: f32) -> Self {
        self.amps = Some(amps);
        self
    }

    pub fn volts(mut self, volts: f32) -> Self {
        self.volts = Some(volts);
        self
    }

    pub fn minutes(mut self, minutes: u32) -> Self {
        self.minutes = Some(minutes);
        self
    }

    pub fn temperature(mut self, celsius: f32) -> Self {
        self.temperature = Some(celsius);
        self
    }

    pub fn charge(mut self, charge: ChargeState) -> Self {
        self.charge = Some(charge.code());
        self
    }

    pub fn context<S: Into<String>>(mut self, text: S) -> Self {
        self.context = Some(text.into());
        self
    }

    pub fn auto(mut self, monitoring: bool) -> Self {
        self.auto = Some(u8::from(monitoring));
        self
    }

    pub fn policy(mut self, code: u8) -> Self {
        self.policy = Some(code);
        self
    }

    pub fn field<V: Into<serde_json::Value>>(mut self, key: &str, value: V) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Destination for telemetry records
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: TelemetryEvent) -> Result<()>;

    /// Wait up to `timeout` for queued records to leave; `true` when empty
    async fn drain(&self, timeout: Duration) -> bool;
}

/// Keeps every record in memory; used by tests and the simulator
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: TelemetryEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| TrolleyError::generic("event sink lock poisoned"))?
            .push(event);
        Ok(())
    }

    async fn drain(&self, _timeout: Duration) -> bool {
        true
    }
}

/// Writes each record as a JSON line to the log
pub struct TracingSink {
    logger: StructuredLogger,
}

impl TracingSink {
    pub fn new() -> Self {
        Self {
            logger: get_logger("telemetry"),
        }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for TracingSink {
    async fn publish(&self, event: TelemetryEvent) -> Result<()> {
        let line = event.to_json()?;
        self.logger.info(&format!("{} {}", event.kind, line));
        Ok(())
    }

    async fn drain(&self, _timeout: Duration) -> bool {
        true
    }
}
