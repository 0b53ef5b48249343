//! # Trolley - run-state controller for multi-outlet charging cabinets
//!
//! Firmware core for a cabinet that powers banks of laptops or tablets
//! through up to four relay-switched outlets. It decides when the outlets are
//! energised (continuous, timed, on a weekly schedule, or until the devices
//! report full), survives mains loss and overheating by suspending and
//! resuming sessions, and reports everything as short telemetry records.
//!
//! ## Architecture
//!
//! - `controller`: run-state machine, remote commands and telemetry decisions
//! - `engine`: charge-completion detection from the outlet current slope
//! - `schedule`: weekly half-hour schedule bitmask and its evaluation
//! - `persistence`: settings and resume snapshot records with checksums
//! - `sensors`: power, temperature, battery and hub readings
//! - `runtime`: tokio loop driving the controller against real hardware
//! - `sim`: simulated cabinet for benches and tests
//! - `config`, `logging`, `error`: ambient configuration, tracing and errors

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod runtime;
pub mod schedule;
pub mod sensors;
pub mod session;
pub mod settings;
pub mod sim;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use controller::Controller;
pub use error::{Result, TrolleyError};
pub use runtime::{Runtime, RuntimeExit};
