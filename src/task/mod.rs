//! Task collaborator seam
//!
//! The task repository itself (CRUD, search, AI integrations) lives outside
//! the session core; sessions only stamp which task was active through the
//! [`TaskUsageRecorder`] seam.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task ID in format T001, T002, etc.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new task ID from number
    pub fn from_number(n: u32) -> Self {
        Self(format!("T{:03}", n))
    }

    /// Parse task ID from string
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with('T') && s.len() >= 4 && s[1..].chars().all(|c| c.is_ascii_digit()) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Get the numeric part
    pub fn number(&self) -> Option<u32> {
        self.0[1..].parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback into the task repository when session tracking observes task
/// activity. The session core never owns task data.
pub trait TaskUsageRecorder: Send + Sync {
    fn task_used(&self, session_id: &str, task: &TaskId, at: DateTime<Utc>);
}
