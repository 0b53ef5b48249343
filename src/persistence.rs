//! Persistence layer for device settings and the resume snapshot
//!
//! Both records are stored as pretty JSON envelopes carrying a layout magic
//! number and a byte-sum checksum over the payload. Writes land in a sibling
//! temporary file that is synced and renamed over the target, so a record is
//! durable by the time a save returns.

use crate::error::{Result, TrolleyError};
use crate::logging::{StructuredLogger, get_logger};
use crate::settings::{DeviceSettings, SETTINGS_MAGIC};
use crate::types::{MAX_RELAYS, PowerOnPolicy, ResumeCause, RunState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Layout version of the resume snapshot record
pub const SNAPSHOT_MAGIC: u32 = 0x7E5C_0001;

/// Written immediately before any suspend or reset path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeSnapshot {
    pub cause: ResumeCause,
    pub previous_run_state: RunState,
    pub power_on_code: u8,
    pub relay_mask: [bool; MAX_RELAYS],
    pub hub_present: bool,
}

impl Default for ResumeSnapshot {
    fn default() -> Self {
        Self {
            cause: ResumeCause::None,
            previous_run_state: RunState::Startup,
            power_on_code: PowerOnPolicy::Continuous.code(),
            relay_mask: [false; MAX_RELAYS],
            hub_present: false,
        }
    }
}

impl ResumeSnapshot {
    /// Zeroed record, nothing to resume
    pub fn cleared() -> Self {
        Self::default()
    }

    pub fn is_cleared(&self) -> bool {
        self.cause == ResumeCause::None
    }
}

/// Get/put contract of the non-volatile store
pub trait PersistentStore: Send + Sync {
    /// Missing record yields defaults; a corrupt one yields an error
    fn load_settings(&self) -> Result<DeviceSettings>;
    fn save_settings(&self, settings: &DeviceSettings) -> Result<()>;
    fn load_snapshot(&self) -> Result<ResumeSnapshot>;
    fn save_snapshot(&self, snapshot: &ResumeSnapshot) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    magic: u32,
    checksum: u32,
    payload: serde_json::Value,
}

/// Byte sum of the compact JSON form
fn checksum_of(value: &serde_json::Value) -> Result<u32> {
    let text = serde_json::to_string(value)?;
    Ok(text
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(b))))
}

fn seal<T: Serialize>(magic: u32, payload: &T) -> Result<String> {
    let payload = serde_json::to_value(payload)?;
    let checksum = checksum_of(&payload)?;
    let envelope = Envelope {
        magic,
        checksum,
        payload,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

fn open<T: DeserializeOwned>(magic: u32, contents: &str) -> Result<T> {
    let envelope: Envelope = serde_json::from_str(contents)?;
    if envelope.magic != magic {
        return Err(TrolleyError::version(envelope.magic, magic));
    }
    let actual = checksum_of(&envelope.payload)?;
    if actual != envelope.checksum {
        return Err(TrolleyError::checksum(envelope.checksum, actual));
    }
    Ok(serde_json::from_value(envelope.payload)?)
}

fn write_durably(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// File-backed store
pub struct PersistenceManager {
    settings_path: PathBuf,
    snapshot_path: PathBuf,
    logger: StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(settings_path: P, snapshot_path: Q) -> Self {
        Self {
            settings_path: settings_path.as_ref().to_path_buf(),
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
            logger: get_logger("persistence"),
        }
    }

    pub fn from_config(storage: &crate::config::StorageConfig) -> Self {
        Self::new(&storage.settings_path, &storage.snapshot_path)
    }

    fn load_record<T: DeserializeOwned + Default>(
        &self,
        path: &Path,
        magic: u32,
        what: &str,
    ) -> Result<T> {
        if !path.exists() {
            self.logger
                .info(&format!("No persistent {} file found, using defaults", what));
            return Ok(T::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let record = open(magic, &contents)?;
        self.logger.info(&format!("Loaded persistent {} from disk", what));
        Ok(record)
    }

    fn save_record<T: Serialize>(
        &self,
        path: &Path,
        magic: u32,
        record: &T,
        what: &str,
    ) -> Result<()> {
        let contents = seal(magic, record)?;
        write_durably(path, &contents)?;
        self.logger.debug(&format!("Saved persistent {} to disk", what));
        Ok(())
    }
}

impl PersistentStore for PersistenceManager {
    fn load_settings(&self) -> Result<DeviceSettings> {
        self.load_record(&self.settings_path, SETTINGS_MAGIC, "settings")
    }

    fn save_settings(&self, settings: &DeviceSettings) -> Result<()> {
        self.save_record(&self.settings_path, SETTINGS_MAGIC, settings, "settings")
    }

    fn load_snapshot(&self) -> Result<ResumeSnapshot> {
        self.load_record(&self.snapshot_path, SNAPSHOT_MAGIC, "resume snapshot")
    }

    fn save_snapshot(&self, snapshot: &ResumeSnapshot) -> Result<()> {
        self.save_record(&self.snapshot_path, SNAPSHOT_MAGIC, snapshot, "resume snapshot")
    }
}

#[derive(Debug, Clone, Copy)]
enum Record {
    Settings,
    Snapshot,
}

#[derive(Debug, Default)]
struct MemoryRecords {
    settings: Option<String>,
    snapshot: Option<String>,
    fail_writes: bool,
    writes: usize,
}

/// In-memory store holding the same sealed envelopes as the file store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryRecords>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryRecords) -> R) -> Result<R> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| TrolleyError::io("memory store lock poisoned"))?;
        Ok(f(&mut guard))
    }

    /// Make every subsequent save fail
    pub fn set_fail_writes(&self, fail: bool) -> Result<()> {
        self.with(|r| r.fail_writes = fail)
    }

    /// Number of successful saves so far
    pub fn write_count(&self) -> usize {
        self.with(|r| r.writes).unwrap_or(0)
    }

    /// Overwrite the raw settings envelope, e.g. to simulate corruption
    pub fn put_raw_settings(&self, contents: &str) -> Result<()> {
        self.with(|r| r.settings = Some(contents.to_string()))
    }

    pub fn raw_settings(&self) -> Option<String> {
        self.with(|r| r.settings.clone()).ok().flatten()
    }

    fn store(&self, record: Record, contents: String) -> Result<()> {
        self.with(|r| {
            if r.fail_writes {
                return Err(TrolleyError::io("simulated write failure"));
            }
            match record {
                Record::Settings => r.settings = Some(contents),
                Record::Snapshot => r.snapshot = Some(contents),
            }
            r.writes += 1;
            Ok(())
        })?
    }
}

impl PersistentStore for MemoryStore {
    fn load_settings(&self) -> Result<DeviceSettings> {
        match self.with(|r| r.settings.clone())? {
            Some(contents) => open(SETTINGS_MAGIC, &contents),
            None => Ok(DeviceSettings::default()),
        }
    }

    fn save_settings(&self, settings: &DeviceSettings) -> Result<()> {
        let contents = seal(SETTINGS_MAGIC, settings)?;
        self.store(Record::Settings, contents)
    }

    fn load_snapshot(&self) -> Result<ResumeSnapshot> {
        match self.with(|r| r.snapshot.clone())? {
            Some(contents) => open(SNAPSHOT_MAGIC, &contents),
            None => Ok(ResumeSnapshot::default()),
        }
    }

    fn save_snapshot(&self, snapshot: &ResumeSnapshot) -> Result<()> {
        let contents = seal(SNAPSHOT_MAGIC, snapshot)?;
        self.store(Record::Snapshot, contents)
    }
}

/// Load settings, substituting defaults for an unusable record
///
/// Returns the error that forced the substitution so the caller can report
/// it as a diagnostic.
pub fn load_settings_or_default(
    store: &dyn PersistentStore,
) -> (DeviceSettings, Option<TrolleyError>) {
    match store.load_settings() {
        Ok(settings) => match settings.validate() {
            Ok(()) => (settings, None),
            Err(e) => (DeviceSettings::default(), Some(e)),
        },
        Err(e) => (DeviceSettings::default(), Some(e)),
    }
}

/// Load the resume snapshot, treating an unusable record as cleared
pub fn load_snapshot_or_cleared(
    store: &dyn PersistentStore,
) -> (ResumeSnapshot, Option<TrolleyError>) {
    match store.load_snapshot() {
        Ok(snapshot) => (snapshot, None),
        Err(e) => (ResumeSnapshot::cleared(), Some(e)),
    }
}
