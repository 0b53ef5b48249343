//! Charge session tracking
//!
//! A session spans one relay-on period from its first start to the relay-off
//! that ends it; suspends for mains loss or overheat keep the same session
//! open so the resumed minutes are attributed to it.

use crate::error::{Result, TrolleyError};
use crate::logging::get_logger;
use crate::types::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One charge session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeSession {
    /// Unique session ID
    pub id: String,

    /// Mode the session ran in
    pub mode: RunState,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,

    /// Minutes on charge, carried across suspends
    pub minutes: u32,

    pub peak_amps: f32,

    /// Times the session was suspended and picked up again
    pub resumes: u32,

    /// Relay-off context that closed the session
    pub end_reason: Option<String>,

    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,

    /// Relays open on a suspend, waiting for resume
    Suspended,

    /// Ran to its natural end
    Completed,

    /// Stopped by a command or a new session
    Stopped,

    /// Cut short by power or clock loss
    Interrupted,
}

/// Tracks the active session and a bounded history
pub struct ChargeSessionTracker {
    pub current_session: Option<ChargeSession>,
    pub last_session: Option<ChargeSession>,
    session_history: Vec<ChargeSession>,
    max_history_size: usize,
    logger: crate::logging::StructuredLogger,
}

impl ChargeSessionTracker {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            current_session: None,
            last_session: None,
            session_history: Vec::with_capacity(max_history_size),
            max_history_size,
            logger: get_logger("session"),
        }
    }

    /// Open a session; fails if one is already open
    pub fn start_session(&mut self, mode: RunState, start_minutes: u32) -> Result<String> {
        if self.current_session.is_some() {
            return Err(TrolleyError::generic("Session already active"));
        }

        let session = ChargeSession {
            id: uuid::Uuid::new_v4().to_string(),
            mode,
            start_time: Utc::now(),
            end_time: None,
            minutes: start_minutes,
            peak_amps: 0.0,
            resumes: 0,
            end_reason: None,
            status: SessionStatus::Active,
        };

        self.logger.info(&format!(
            "Started charge session {} in {}",
            session.id, mode
        ));
        let id = session.id.clone();
        self.current_session = Some(session);
        Ok(id)
    }

    pub fn update(&mut self, amps: f32, minutes: u32) {
        if let Some(ref mut session) = self.current_session {
            session.minutes = minutes;
            if amps > session.peak_amps {
                session.peak_amps = amps;
            }
        }
    }

    pub fn suspend(&mut self) {
        if let Some(ref mut session) = self.current_session {
            session.status = SessionStatus::Suspended;
            self.logger
                .info(&format!("Suspended session {} at minute {}", session.id, session.minutes));
        }
    }

    /// Pick a suspended session up again; returns `false` if none is open
    pub fn resume(&mut self, minutes: u32) -> bool {
        match self.current_session {
            Some(ref mut session) => {
                session.status = SessionStatus::Active;
                session.resumes += 1;
                session.minutes = minutes;
                self.logger
                    .info(&format!("Resumed session {} at minute {}", session.id, minutes));
                true
            }
            None => false,
        }
    }

    /// Close the open session
    pub fn end_session(&mut self, status: SessionStatus, reason: &str) -> Result<()> {
        let Some(mut session) = self.current_session.take() else {
            return Err(TrolleyError::generic("No active session to end"));
        };

        session.end_time = Some(Utc::now());
        session.status = status;
        session.end_reason = Some(reason.to_string());

        self.logger.info(&format!(
            "Ended charge session {} after {} min ({:?}: {})",
            session.id, session.minutes, status, reason
        ));

        self.last_session = Some(session.clone());
        self.session_history.push(session);
        if self.session_history.len() > self.max_history_size {
            self.session_history.remove(0);
        }
        Ok(())
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_session.as_ref().map(|s| s.id.as_str())
    }

    pub fn history(&self) -> &[ChargeSession] {
        &self.session_history
    }

    pub fn get_session_stats(&self) -> serde_json::Value {
        let mut stats = serde_json::Map::new();

        if let Some(ref session) = self.current_session {
            stats.insert("session_active".to_string(), true.into());
            stats.insert("session_id".to_string(), session.id.clone().into());
            stats.insert("session_minutes".to_string(), session.minutes.into());
            stats.insert("peak_amps".to_string(), f64::from(session.peak_amps).into());
            stats.insert(
                "suspended".to_string(),
                (session.status == SessionStatus::Suspended).into(),
            );
        } else {
            stats.insert("session_active".to_string(), false.into());
            stats.insert("session_id".to_string(), serde_json::Value::Null);
            stats.insert("session_minutes".to_string(), serde_json::Value::Null);
            stats.insert("peak_amps".to_string(), serde_json::Value::Null);
            stats.insert("suspended".to_string(), false.into());
        }
        stats.insert(
            "completed_sessions".to_string(),
            self.session_history.len().into(),
        );

        serde_json::Value::Object(stats)
    }
}

impl Default for ChargeSessionTracker {
    fn default() -> Self {
        Self::new(100)
    }
}
