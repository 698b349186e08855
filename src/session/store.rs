//! Session storage seam
//!
//! A narrow trait so backends are swappable and independently testable: a
//! SQLite store when persistence is enabled, an in-process map when it is
//! not. Matching is always on the `(tty_path, user, shell)` tuple, never pid.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::error::{Result, SessionError};
use super::model::{
    Fingerprint, Session, SessionStatus, SessionUpdate, TimeWindow, WindowFilter, WindowKind,
    WindowSize,
};

pub trait SessionStore: Send + Sync {
    /// Exact identity match, preferring the most recently active row.
    /// Disconnected rows are never returned here; recovery asks for them
    /// explicitly via [`find_candidates`](Self::find_candidates).
    fn find_exact(&self, fingerprint: &Fingerprint) -> Result<Option<Session>>;

    /// Non-active sessions for the given user, eligible for recovery
    /// scoring. Includes disconnected rows: explicit recovery is the one
    /// sanctioned path back from `disconnected`.
    fn find_candidates(&self, user: &str) -> Result<Vec<Session>>;

    /// Insert a fresh session: `status=active`, `connection_count=1`,
    /// `start_time=last_active=now`.
    fn create(
        &self,
        fingerprint: Fingerprint,
        window_size: Option<WindowSize>,
        environment: HashMap<String, String>,
    ) -> Result<Session>;

    fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Merge fields into the row. Bumps `last_active` unless the update
    /// explicitly sets `disconnected`. Returns the merged session.
    fn update(&self, id: &str, update: &SessionUpdate) -> Result<Session>;

    /// Terminal transition: `status=disconnected`, `last_active=now`.
    fn disconnect(&self, id: &str) -> Result<()>;

    fn session_count(&self) -> Result<usize>;

    fn insert_window(&self, window: &TimeWindow) -> Result<()>;

    fn update_window(&self, window: &TimeWindow) -> Result<()>;

    fn find_windows(&self, filter: &WindowFilter) -> Result<Vec<TimeWindow>>;

    /// Swap the session's derived `auto` windows for a new set in one step,
    /// keeping repeated auto-detection idempotent rather than cumulative.
    fn replace_auto_windows(&self, session_id: &str, windows: &[TimeWindow]) -> Result<()>;
}

/// In-process substitute used when persistence is disabled.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    windows: Mutex<Vec<TimeWindow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn find_exact(&self, fingerprint: &Fingerprint) -> Result<Option<Session>> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        Ok(sessions
            .values()
            .filter(|s| s.status != SessionStatus::Disconnected)
            .filter(|s| s.fingerprint.identity() == fingerprint.identity())
            .max_by_key(|s| s.last_active)
            .cloned())
    }

    fn find_candidates(&self, user: &str) -> Result<Vec<Session>> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        Ok(sessions
            .values()
            .filter(|s| s.status != SessionStatus::Active)
            .filter(|s| s.fingerprint.user == user)
            .cloned()
            .collect())
    }

    fn create(
        &self,
        fingerprint: Fingerprint,
        window_size: Option<WindowSize>,
        environment: HashMap<String, String>,
    ) -> Result<Session> {
        let mut session = Session::new(fingerprint);
        session.window_size = window_size;
        session.environment_snapshot = environment;

        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn get(&self, id: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        Ok(sessions.get(id).cloned())
    }

    fn update(&self, id: &str, update: &SessionUpdate) -> Result<Session> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        update.apply(session, Utc::now());
        Ok(session.clone())
    }

    fn disconnect(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        session.status = SessionStatus::Disconnected;
        session.last_active = Utc::now();
        Ok(())
    }

    fn session_count(&self) -> Result<usize> {
        Ok(self.sessions.lock().expect("session map poisoned").len())
    }

    fn insert_window(&self, window: &TimeWindow) -> Result<()> {
        let mut windows = self.windows.lock().expect("window list poisoned");
        windows.push(window.clone());
        Ok(())
    }

    fn update_window(&self, window: &TimeWindow) -> Result<()> {
        let mut windows = self.windows.lock().expect("window list poisoned");
        match windows.iter_mut().find(|w| w.id == window.id) {
            Some(existing) => {
                *existing = window.clone();
                Ok(())
            }
            None => Err(SessionError::InvalidWindow(format!(
                "unknown window id {}",
                window.id
            ))),
        }
    }

    fn find_windows(&self, filter: &WindowFilter) -> Result<Vec<TimeWindow>> {
        let windows = self.windows.lock().expect("window list poisoned");
        let mut matched: Vec<TimeWindow> = windows
            .iter()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect();
        matched.sort_by_key(|w| w.start_time);
        Ok(matched)
    }

    fn replace_auto_windows(&self, session_id: &str, new_windows: &[TimeWindow]) -> Result<()> {
        let mut windows = self.windows.lock().expect("window list poisoned");
        windows.retain(|w| !(w.session_id == session_id && w.kind == WindowKind::Auto));
        windows.extend_from_slice(new_windows);
        Ok(())
    }
}
