//! Client sessions: which job each session currently owns.
//!
//! Cache and checkpoint are shared by content hash; only job ownership and
//! cancellation authority are per session. A session owns at most one active
//! job: registering a new one hands the previous id back so the caller can
//! supersede it.

use crate::error::BalloonError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const MAX_SESSION_ID_LEN: usize = 128;

/// Opaque client-chosen session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, BalloonError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(BalloonError::InvalidInput {
                reason: "session id must not be empty".into(),
            });
        }
        if trimmed.len() > MAX_SESSION_ID_LEN {
            return Err(BalloonError::InvalidInput {
                reason: format!("session id longer than {MAX_SESSION_ID_LEN} bytes"),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// A fresh random session, for callers that do not track one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = BalloonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SessionId::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// session → id of the job it started most recently.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<HashMap<SessionId, Uuid>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Uuid>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `job_id` the session's active job, returning the one it replaces.
    pub fn set_active(&self, session: &SessionId, job_id: Uuid) -> Option<Uuid> {
        self.lock()
            .insert(session.clone(), job_id)
            .filter(|prev| *prev != job_id)
    }

    pub fn active_job(&self, session: &SessionId) -> Option<Uuid> {
        self.lock().get(session).copied()
    }

    /// Drop every session entry that points at `job_id`.
    pub fn forget_job(&self, job_id: Uuid) {
        self.lock().retain(|_, j| *j != job_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
