//! Session manager facade
//!
//! Owns the detector, the monitor task, the window tracker, and the event
//! bus. This is the surface the rest of the task manager calls; every
//! operation here fails open, because session tracking is an enhancement,
//! never a requirement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::task::{TaskId, TaskUsageRecorder};

use super::config::Config;
use super::detector::{OsProbe, SessionDetector, TerminalProbe};
use super::error::{Result, SessionError};
use super::events::{EventNotifier, SessionEvent};
use super::fingerprint;
use super::model::{Session, SessionStatus, SessionUpdate, TimeWindow, WindowFilter};
use super::monitor::InactivityMonitor;
use super::sqlite::SqliteStore;
use super::store::{MemoryStore, SessionStore};
use super::windows::TimeWindowTracker;
use super::{get_app_dir, SESSION_ID_ENV_VAR};

pub struct SessionManager {
    config: Config,
    store: Arc<dyn SessionStore>,
    detector: SessionDetector,
    tracker: TimeWindowTracker,
    notifier: EventNotifier,
    monitor: StdMutex<Option<InactivityMonitor>>,
    recorder: StdMutex<Option<Arc<dyn TaskUsageRecorder>>>,
    disconnected: AtomicBool,
}

/// Snapshot of the session subsystem for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationStatus {
    pub in_terminal: bool,
    pub persistence: bool,
    pub recovery_enabled: bool,
    pub session_id: Option<String>,
    pub status: Option<SessionStatus>,
    pub connection_count: Option<u32>,
    pub monitor_running: bool,
}

impl SessionManager {
    /// Build from config: SQLite under the app dir when persistence is
    /// enabled, an in-process map otherwise. A broken database degrades to
    /// the in-process map rather than failing the host command.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn SessionStore> = if config.session.persistence {
            let path = get_app_dir()?.join("sessions.db");
            match SqliteStore::open(&path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!("Falling back to in-memory sessions: {}", e);
                    Arc::new(MemoryStore::new())
                }
            }
        } else {
            Arc::new(MemoryStore::new())
        };

        Ok(Self::with_parts(config, store, Box::new(OsProbe)))
    }

    /// Assemble from explicit parts. Tests supply a stub probe and a shared
    /// store through here.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn SessionStore>,
        probe: Box<dyn TerminalProbe>,
    ) -> Self {
        let notifier = EventNotifier::new();
        let detector = SessionDetector::new(
            Arc::clone(&store),
            probe,
            config.session.recovery.clone(),
            notifier.clone(),
        );
        let tracker = TimeWindowTracker::new(config.windows.clone());

        Self {
            config,
            store,
            detector,
            tracker,
            notifier,
            monitor: StdMutex::new(None),
            recorder: StdMutex::new(None),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Resolve the current session, starting the inactivity monitor and
    /// exporting the session id on first resolution.
    pub async fn detect_session(&self) -> Option<Session> {
        let session = self.detector.detect_session().await?;
        self.ensure_monitor(&session.id);
        if self.config.session.export_env {
            std::env::set_var(SESSION_ID_ENV_VAR, &session.id);
        }
        Some(session)
    }

    /// Merge fields into the current session. Storage trouble is logged and
    /// the operation becomes a no-op.
    pub async fn update_session(&self, update: SessionUpdate) -> Option<Session> {
        let session = self.detect_session().await?;
        match self.store.update(&session.id, &update) {
            Ok(updated) => {
                self.detector.refresh_cache(updated.clone()).await;
                self.notifier.publish(SessionEvent::Updated {
                    session_id: updated.id.clone(),
                });
                Some(updated)
            }
            Err(e) => {
                warn!("Session update had no effect: {}", e);
                None
            }
        }
    }

    /// Disconnect the current session, cancel the monitor, and emit exactly
    /// one `disconnected` event. Idempotent.
    pub async fn disconnect_session(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(monitor) = self.monitor.lock().expect("monitor slot poisoned").take() {
            monitor.cancel();
        }

        let Some(session) = self.detector.resolved().await else {
            return;
        };
        match self.store.disconnect(&session.id) {
            Ok(()) => self.notifier.publish(SessionEvent::Disconnected {
                session_id: session.id.clone(),
            }),
            Err(e) => warn!("Session disconnect had no effect: {}", e),
        }
    }

    /// Stamp task activity: feeds the window tracker, the recent-task list,
    /// and the external usage recorder.
    pub async fn record_task_activity(&self, task_id: &TaskId) -> Option<Session> {
        let session = self.detect_session().await?;
        let now = Utc::now();

        if let Err(e) =
            self.tracker
                .record_task_activity(&*self.store, &session.id, task_id.as_str(), now)
        {
            warn!("Task activity not recorded: {}", e);
        }

        let mut fresh = match self.store.get(&session.id) {
            Ok(Some(s)) => s,
            _ => session,
        };
        fresh.push_recent_task(task_id.as_str(), self.config.session.recent_task_cap);

        let updated = match self.store.update(
            &fresh.id,
            &SessionUpdate {
                recent_task_ids: Some(fresh.recent_task_ids.clone()),
                ..Default::default()
            },
        ) {
            Ok(s) => {
                self.detector.refresh_cache(s.clone()).await;
                self.notifier.publish(SessionEvent::Updated {
                    session_id: s.id.clone(),
                });
                Some(s)
            }
            Err(e) => {
                warn!("Recent-task update had no effect: {}", e);
                None
            }
        };

        let recorder = self.recorder.lock().expect("recorder slot poisoned").clone();
        if let Some(recorder) = recorder {
            recorder.task_used(&fresh.id, task_id, now);
        }

        updated
    }

    /// Re-derive auto windows for the current session.
    pub async fn auto_detect_windows(&self) -> Vec<TimeWindow> {
        let Some(session) = self.detect_session().await else {
            return Vec::new();
        };
        match self.tracker.auto_detect_windows(&*self.store, &session.id) {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Auto window detection had no effect: {}", e);
                Vec::new()
            }
        }
    }

    pub fn find_windows(&self, filter: &WindowFilter) -> Vec<TimeWindow> {
        match self.store.find_windows(filter) {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Window query had no effect: {}", e);
                Vec::new()
            }
        }
    }

    /// Create a manual window on the current session. Validation failures
    /// surface to the caller; they are user errors, not storage trouble.
    pub async fn create_manual_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        task_id: Option<String>,
    ) -> Result<TimeWindow> {
        let session = self
            .detect_session()
            .await
            .ok_or(SessionError::NotInTerminal)?;
        self.tracker
            .create_manual_window(&*self.store, &session.id, start, end, task_id)
    }

    pub async fn integration_status(&self) -> IntegrationStatus {
        let resolved = self.detector.resolved().await;
        let fresh = resolved
            .as_ref()
            .and_then(|s| self.store.get(&s.id).ok().flatten())
            .or(resolved);

        IntegrationStatus {
            in_terminal: fingerprint::is_in_terminal(),
            persistence: self.config.session.persistence,
            recovery_enabled: self.detector.recovery_enabled(),
            session_id: fresh.as_ref().map(|s| s.id.clone()),
            status: fresh.as_ref().map(|s| s.status),
            connection_count: fresh.as_ref().map(|s| s.connection_count),
            monitor_running: self
                .monitor
                .lock()
                .expect("monitor slot poisoned")
                .as_ref()
                .map(|m| !m.is_cancelled())
                .unwrap_or(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.notifier.subscribe()
    }

    pub fn set_recovery_enabled(&self, enabled: bool) {
        self.detector.set_recovery_enabled(enabled);
        self.notifier
            .publish(SessionEvent::RecoveryEnabled { enabled });
    }

    pub fn set_task_recorder(&self, recorder: Arc<dyn TaskUsageRecorder>) {
        *self.recorder.lock().expect("recorder slot poisoned") = Some(recorder);
    }

    /// Install a SIGINT/SIGTERM hook that disconnects the session before the
    /// process exits. Best-effort: a forced kill leaves the row active until
    /// the next detection or inactivity check reclaims it.
    pub fn install_shutdown_hook(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            wait_for_termination().await;
            manager.disconnect_session().await;
        })
    }

    fn ensure_monitor(&self, session_id: &str) {
        if self.disconnected.load(Ordering::SeqCst) {
            return;
        }
        let mut guard = self.monitor.lock().expect("monitor slot poisoned");
        if guard.is_none() {
            *guard = Some(InactivityMonitor::spawn(
                Arc::clone(&self.store),
                session_id.to_string(),
                StdDuration::from_secs(self.config.session.monitor_interval_seconds),
                Duration::minutes(self.config.session.inactivity_timeout_minutes as i64),
                self.notifier.clone(),
            ));
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
