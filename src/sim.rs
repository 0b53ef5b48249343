//! Deterministic simulated cabinet
//!
//! Stands in for the meters, relays and clock on a bench or in tests. All
//! handles share one state, so a test can keep a clone and change mains,
//! current or temperature while the runtime owns another.

use crate::error::{Result, TrolleyError};
use crate::runtime::{Hardware, RelayDriver};
use crate::sensors::{BatteryStatus, Clock, HubStatus, PowerMonitor, PowerReading};
use crate::types::MAX_RELAYS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct SimState {
    mains_present: bool,
    volts: f32,
    amps: f32,
    temperature_c: f32,
    battery: BatteryStatus,
    hub: Option<HubStatus>,
    clock: Option<DateTime<Utc>>,
    relays: [bool; MAX_RELAYS],
    relay_log: Vec<String>,
    fail_power: bool,
    fail_relays: bool,
    power_stall: Option<Duration>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            mains_present: true,
            volts: 230.0,
            amps: 0.0,
            temperature_c: 25.0,
            battery: BatteryStatus::from_status_pins(true, true, 3300),
            hub: None,
            clock: None,
            relays: [false; MAX_RELAYS],
            relay_log: Vec::new(),
            fail_power: false,
            fail_relays: false,
            power_stall: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedCabinet {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCabinet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| TrolleyError::generic("simulator state poisoned"))
    }

    fn update(&self, f: impl FnOnce(&mut SimState)) {
        if let Ok(mut state) = self.lock() {
            f(&mut state);
        }
    }

    fn read<R>(&self, f: impl FnOnce(&SimState) -> R) -> Option<R> {
        self.lock().ok().map(|s| f(&s))
    }

    pub fn set_mains(&self, present: bool) {
        self.update(|s| s.mains_present = present);
    }

    /// Raw meter current, before calibration
    pub fn set_amps(&self, amps: f32) {
        self.update(|s| s.amps = amps);
    }

    pub fn set_volts(&self, volts: f32) {
        self.update(|s| s.volts = volts);
    }

    pub fn set_temperature(&self, celsius: f32) {
        self.update(|s| s.temperature_c = celsius);
    }

    pub fn set_hub(&self, hub: Option<HubStatus>) {
        self.update(|s| s.hub = hub);
    }

    pub fn set_clock(&self, now: Option<DateTime<Utc>>) {
        self.update(|s| s.clock = now);
    }

    pub fn fail_power_reads(&self, fail: bool) {
        self.update(|s| s.fail_power = fail);
    }

    /// Make every meter read hang for `stall` before answering
    pub fn stall_power_reads(&self, stall: Option<Duration>) {
        self.update(|s| s.power_stall = stall);
    }

    pub fn fail_relays(&self, fail: bool) {
        self.update(|s| s.fail_relays = fail);
    }

    pub fn relays(&self) -> [bool; MAX_RELAYS] {
        self.read(|s| s.relays).unwrap_or_default()
    }

    /// Every relay operation so far, e.g. `"close 2"` or `"open all"`
    pub fn relay_log(&self) -> Vec<String> {
        self.read(|s| s.relay_log.clone()).unwrap_or_default()
    }

    /// Hardware bundle for the runtime backed by this simulator
    pub fn hardware(&self) -> Hardware {
        Hardware {
            monitor: Arc::new(self.clone()),
            relays: Arc::new(self.clone()),
            clock: Arc::new(self.clone()),
        }
    }
}

#[async_trait]
impl PowerMonitor for SimulatedCabinet {
    async fn read_power(&self) -> Result<PowerReading> {
        let stall = self.lock()?.power_stall;
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        let state = self.lock()?;
        if state.fail_power {
            return Err(TrolleyError::sensor("simulated meter fault"));
        }
        let energised = state.relays.iter().any(|r| *r);
        Ok(PowerReading {
            volts: if state.mains_present { state.volts } else { 0.0 },
            amps: if state.mains_present && energised {
                state.amps
            } else {
                0.0
            },
        })
    }

    async fn read_temperature(&self) -> Result<f32> {
        Ok(self.lock()?.temperature_c)
    }

    async fn read_battery(&self) -> Result<BatteryStatus> {
        Ok(self.lock()?.battery)
    }

    async fn is_mains_present(&self) -> Result<bool> {
        Ok(self.lock()?.mains_present)
    }

    async fn read_hub(&self) -> Result<Option<HubStatus>> {
        Ok(self.lock()?.hub.clone())
    }
}

#[async_trait]
impl RelayDriver for SimulatedCabinet {
    async fn energise(&self, relay: usize) -> Result<()> {
        let mut state = self.lock()?;
        if state.fail_relays {
            return Err(TrolleyError::relay(format!("relay {} stuck open", relay)));
        }
        let Some(slot) = state.relays.get_mut(relay) else {
            return Err(TrolleyError::relay(format!("no relay {}", relay)));
        };
        *slot = true;
        state.relay_log.push(format!("close {}", relay));
        Ok(())
    }

    async fn open_all(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.fail_relays {
            return Err(TrolleyError::relay("relays stuck closed"));
        }
        state.relays = [false; MAX_RELAYS];
        state.relay_log.push("open all".to_string());
        Ok(())
    }
}

impl Clock for SimulatedCabinet {
    fn now_utc(&self) -> Option<DateTime<Utc>> {
        self.read(|s| s.clock).flatten()
    }
}
