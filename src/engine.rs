//! Charge-completion detection
//!
//! Decides from the cabinet's total current draw when the connected devices
//! have finished charging. After a warm-up the engine watches for the current
//! to fall below a per-device threshold, then fits a least-squares slope over a
//! short rolling window until the draw flattens out.

use crate::logging::{StructuredLogger, get_logger};
use crate::settings::DeviceSettings;
use crate::types::ChargeState;

/// Samples kept by the rolling window
pub const WINDOW_CAPACITY: usize = 10;

/// Samples needed before a slope is trusted
pub const MIN_REGRESSION_SAMPLES: usize = 6;

/// Slope reported when there are too few samples to fit
const INSUFFICIENT_DATA_SLOPE: f32 = 1.0;

/// Thresholds the engine works against, taken from the device settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub warmup_mins: u32,
    pub min_current_per_device: f32,
    pub min_charge_rate: f32,
    pub max_monitoring_mins: u32,
    pub extra_charging_mins: u32,
    /// Minutes between successive window samples, so slopes come out in A/min
    pub sample_spacing: f32,
}

impl EngineSettings {
    pub fn from_device(settings: &DeviceSettings, sample_interval_mins: f32) -> Self {
        Self {
            warmup_mins: settings.warmup_mins,
            min_current_per_device: settings.min_current_per_device,
            min_charge_rate: settings.min_charge_rate,
            max_monitoring_mins: settings.max_monitoring_mins,
            extra_charging_mins: settings.extra_charging_mins,
            sample_spacing: sample_interval_mins,
        }
    }
}

/// Circular buffer of `(time, amps)` points
#[derive(Debug, Clone)]
pub struct CurrentSampleWindow {
    xs: [f32; WINDOW_CAPACITY],
    ys: [f32; WINDOW_CAPACITY],
    len: usize,
    next: usize,
    last_x: Option<f32>,
    spacing: f32,
}

impl CurrentSampleWindow {
    pub fn new(spacing: f32) -> Self {
        Self {
            xs: [0.0; WINDOW_CAPACITY],
            ys: [0.0; WINDOW_CAPACITY],
            len: 0,
            next: 0,
            last_x: None,
            spacing,
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.next = 0;
        self.last_x = None;
    }

    /// Append a reading; the first point sits at x = 1 and each later one a
    /// fixed spacing after its predecessor.
    pub fn push(&mut self, amps: f32) {
        let x = match self.last_x {
            Some(prev) => prev + self.spacing,
            None => 1.0,
        };
        self.xs[self.next] = x;
        self.ys[self.next] = amps;
        self.last_x = Some(x);
        self.next = (self.next + 1) % WINDOW_CAPACITY;
        self.len = (self.len + 1).min(WINDOW_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Magnitude of the fitted slope over the stored points
    pub fn slope(&self) -> f32 {
        linear_regression(&self.xs[..self.len], &self.ys[..self.len])
    }
}

/// Least-squares slope magnitude of `ys` against `xs`
///
/// Fewer than six points yields 1.0 so that a sparse window can never look
/// flat. A zero denominator yields 0.0.
pub fn linear_regression(xs: &[f32], ys: &[f32]) -> f32 {
    let n = xs.len().min(ys.len());
    if n < MIN_REGRESSION_SAMPLES {
        return INSUFFICIENT_DATA_SLOPE;
    }

    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for (x, y) in xs.iter().zip(ys).take(n) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }

    let nf = n as f64;
    let denominator = nf * sxx - sx * sx;
    if denominator == 0.0 {
        return 0.0;
    }
    ((nf * sxy - sx * sy) / denominator).abs() as f32
}

/// Charge-progress state machine fed by periodic current samples
#[derive(Debug, Clone)]
pub struct ChargeEngine {
    settings: EngineSettings,
    window: CurrentSampleWindow,
    /// Minute at which monitoring (or the done grace period) began
    mark_minutes: u32,
    last_slope: f32,
    logger: StructuredLogger,
}

impl ChargeEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            window: CurrentSampleWindow::new(settings.sample_spacing),
            settings,
            mark_minutes: 0,
            last_slope: INSUFFICIENT_DATA_SLOPE,
            logger: get_logger("engine"),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Apply new thresholds; takes effect from the next sample
    pub fn update_settings(&mut self, settings: EngineSettings) {
        self.window.spacing = settings.sample_spacing;
        self.settings = settings;
    }

    /// Forget all progress; called when relays close for a fresh session
    pub fn reset(&mut self) {
        self.window.reset();
        self.mark_minutes = 0;
        self.last_slope = INSUFFICIENT_DATA_SLOPE;
    }

    pub fn window(&self) -> &CurrentSampleWindow {
        &self.window
    }

    pub fn last_slope(&self) -> f32 {
        self.last_slope
    }

    /// Whether warm-up is still running at `elapsed_minutes`
    pub fn in_warmup(&self, elapsed_minutes: u32) -> bool {
        elapsed_minutes < self.settings.warmup_mins
    }

    /// Feed one current reading and return the new charge state
    pub fn sample(
        &mut self,
        amps: f32,
        elapsed_minutes: u32,
        device_count: u32,
        prior: ChargeState,
    ) -> ChargeState {
        let next = self.next_state(amps, elapsed_minutes, device_count, prior);

        self.logger.debug(&format!(
            "sample amps={:.3} minutes={} devices={} slope={:.4} {:?} -> {:?}",
            amps, elapsed_minutes, device_count, self.last_slope, prior, next
        ));
        if next != prior {
            self.logger.info(&format!(
                "Charge state {:?} -> {:?} at minute {} ({:.3} A)",
                prior, next, elapsed_minutes, amps
            ));
        }
        next
    }

    fn next_state(
        &mut self,
        amps: f32,
        elapsed_minutes: u32,
        device_count: u32,
        prior: ChargeState,
    ) -> ChargeState {
        match prior {
            ChargeState::Ended => ChargeState::Ended,
            ChargeState::Done => {
                if elapsed_minutes.saturating_sub(self.mark_minutes)
                    >= self.settings.extra_charging_mins
                {
                    ChargeState::Ended
                } else {
                    ChargeState::Done
                }
            }
            ChargeState::RateMonitoring => {
                self.window.push(amps);
                self.last_slope = self.window.slope();
                let monitored = elapsed_minutes.saturating_sub(self.mark_minutes);
                if self.last_slope < self.settings.min_charge_rate
                    || monitored >= self.settings.max_monitoring_mins
                {
                    self.mark_minutes = elapsed_minutes;
                    ChargeState::Done
                } else {
                    ChargeState::RateMonitoring
                }
            }
            ChargeState::NotCharging | ChargeState::Charging | ChargeState::FullRateCharging => {
                if self.in_warmup(elapsed_minutes) {
                    return ChargeState::FullRateCharging;
                }
                let threshold = device_count as f32 * self.settings.min_current_per_device;
                if device_count > 0 && amps < threshold {
                    self.window.reset();
                    self.window.push(amps);
                    self.last_slope = self.window.slope();
                    self.mark_minutes = elapsed_minutes;
                    ChargeState::RateMonitoring
                } else {
                    ChargeState::FullRateCharging
                }
            }
        }
    }
}
