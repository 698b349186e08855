//! Session and time-window data model

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Best-effort identity of a terminal instance.
///
/// `pid` and `parent_pid` do not survive process restarts and are never used
/// as sole match keys for recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub tty_path: String,
    pub pid: u32,
    pub parent_pid: u32,
    pub user: String,
    pub shell: String,
}

impl Fingerprint {
    /// The stable identity tuple used for exact matching. Pids are excluded.
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.tty_path, &self.user, &self.shell)
    }
}

/// Session lifecycle status. `Disconnected` is terminal: detection never
/// resurrects a disconnected row, only explicit recovery may.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Inactive,
    Disconnected,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "disconnected" => Some(Self::Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub columns: u16,
    pub rows: u16,
}

/// A persisted or in-memory record tracking one terminal's lifecycle across
/// CLI invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub fingerprint: Fingerprint,
    pub start_time: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub status: SessionStatus,
    pub window_size: Option<WindowSize>,
    /// Most-recent-first, deduped, capped.
    pub recent_task_ids: Vec<String>,
    pub connection_count: u32,
    pub environment_snapshot: HashMap<String, String>,
}

impl Session {
    pub fn new(fingerprint: Fingerprint) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            fingerprint,
            start_time: now,
            last_active: now,
            status: SessionStatus::Active,
            window_size: None,
            recent_task_ids: Vec::new(),
            connection_count: 1,
            environment_snapshot: HashMap::new(),
        }
    }

    /// Push a task id to the front of the recent list, deduping and capping.
    pub fn push_recent_task(&mut self, task_id: &str, cap: usize) {
        self.recent_task_ids.retain(|t| t != task_id);
        self.recent_task_ids.insert(0, task_id.to_string());
        self.recent_task_ids.truncate(cap);
    }
}

/// Partial update merged into a session row. `last_active` is bumped on every
/// merge except when the caller explicitly sets `Disconnected`.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub window_size: Option<WindowSize>,
    pub recent_task_ids: Option<Vec<String>>,
    pub connection_count: Option<u32>,
    pub environment_snapshot: Option<HashMap<String, String>>,
    pub fingerprint: Option<Fingerprint>,
}

impl SessionUpdate {
    /// Merge into `session`. Shared by every store backend so merge semantics
    /// cannot drift between them.
    pub fn apply(&self, session: &mut Session, now: DateTime<Utc>) {
        if let Some(fingerprint) = &self.fingerprint {
            session.fingerprint = fingerprint.clone();
        }
        if let Some(window_size) = self.window_size {
            session.window_size = Some(window_size);
        }
        if let Some(recent) = &self.recent_task_ids {
            session.recent_task_ids = recent.clone();
        }
        if let Some(count) = self.connection_count {
            session.connection_count = count;
        }
        if let Some(env) = &self.environment_snapshot {
            session.environment_snapshot = env.clone();
        }
        match self.status {
            Some(SessionStatus::Disconnected) => {
                session.status = SessionStatus::Disconnected;
            }
            Some(status) => {
                session.status = status;
                session.last_active = now;
            }
            None => {
                session.last_active = now;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Opened and extended by task activity stamps.
    Task,
    /// User-created with explicit bounds.
    Manual,
    /// Derived from the activity log; replaced wholesale on re-detection.
    Auto,
}

impl WindowKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "task" => Some(Self::Task),
            "manual" => Some(Self::Manual),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStatus {
    Active,
    Completed,
}

impl WindowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A contiguous span of recorded activity associated with a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub id: String,
    pub session_id: String,
    pub task_id: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Open if still running.
    pub end_time: Option<DateTime<Utc>>,
    pub kind: WindowKind,
    pub status: WindowStatus,
}

impl TimeWindow {
    pub fn new(session_id: &str, kind: WindowKind, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            task_id: None,
            start_time,
            end_time: None,
            kind,
            status: WindowStatus::Active,
        }
    }

    /// Two windows overlap when their spans intersect. An open end counts as
    /// unbounded.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let self_end = match self.end_time {
            Some(t) => t,
            None => return end > self.start_time,
        };
        start < self_end && self.start_time < end
    }
}

/// Query filter for stored time windows. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct WindowFilter {
    pub session_id: Option<String>,
    pub kind: Option<WindowKind>,
    pub status: Option<WindowStatus>,
    pub task_id: Option<String>,
}

impl WindowFilter {
    pub fn matches(&self, window: &TimeWindow) -> bool {
        if let Some(session_id) = &self.session_id {
            if &window.session_id != session_id {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if window.kind != kind {
                return false;
            }
        }
        if let Some(status) = self.status {
            if window.status != status {
                return false;
            }
        }
        if let Some(task_id) = &self.task_id {
            if window.task_id.as_deref() != Some(task_id.as_str()) {
                return false;
            }
        }
        true
    }
}
