//! Session detection with single-flight semantics
//!
//! One detection/creation cycle per process, no matter how many subsystems
//! ask for the session concurrently at startup. The state machine is
//! `idle -> detecting -> resolved`; `resolved` is terminal and waiters park
//! on a watch channel instead of polling a flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::config::RecoveryConfig;
use super::error::{Result, SessionError};
use super::events::{EventNotifier, SessionEvent};
use super::fingerprint;
use super::model::{Fingerprint, Session, SessionStatus, SessionUpdate, WindowSize};
use super::recovery::RecoveryStrategy;
use super::store::SessionStore;

/// Seam for terminal introspection so detection is testable without a tty.
pub trait TerminalProbe: Send + Sync {
    fn capture(&self) -> Option<Fingerprint>;

    fn window_size(&self) -> Option<WindowSize> {
        None
    }

    fn environment(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Probe backed by the real process environment.
pub struct OsProbe;

impl TerminalProbe for OsProbe {
    fn capture(&self) -> Option<Fingerprint> {
        fingerprint::capture_fingerprint()
    }

    fn window_size(&self) -> Option<WindowSize> {
        fingerprint::terminal_window_size()
    }

    fn environment(&self) -> HashMap<String, String> {
        fingerprint::capture_environment()
    }
}

enum DetectState {
    Idle,
    Detecting(watch::Receiver<bool>),
    Resolved(Option<Session>),
}

enum Entry {
    Lead(watch::Sender<bool>),
    Wait(watch::Receiver<bool>),
    Done(Option<Session>),
}

pub struct SessionDetector {
    state: Mutex<DetectState>,
    store: Arc<dyn SessionStore>,
    probe: Box<dyn TerminalProbe>,
    recovery: RecoveryStrategy,
    recovery_enabled: AtomicBool,
    notifier: EventNotifier,
}

impl SessionDetector {
    pub fn new(
        store: Arc<dyn SessionStore>,
        probe: Box<dyn TerminalProbe>,
        recovery_config: RecoveryConfig,
        notifier: EventNotifier,
    ) -> Self {
        let recovery_enabled = AtomicBool::new(recovery_config.enabled);
        Self {
            state: Mutex::new(DetectState::Idle),
            store,
            probe,
            recovery: RecoveryStrategy::new(recovery_config),
            recovery_enabled,
            notifier,
        }
    }

    pub fn set_recovery_enabled(&self, enabled: bool) {
        self.recovery_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn recovery_enabled(&self) -> bool {
        self.recovery_enabled.load(Ordering::SeqCst)
    }

    /// Resolve the current session for this process. The first caller runs
    /// the detection cycle; concurrent callers await its outcome; later
    /// callers get the cached resolution.
    pub async fn detect_session(&self) -> Option<Session> {
        let entry = {
            let mut state = self.state.lock().await;
            match &*state {
                DetectState::Resolved(outcome) => Entry::Done(outcome.clone()),
                DetectState::Detecting(rx) => Entry::Wait(rx.clone()),
                DetectState::Idle => {
                    let (tx, rx) = watch::channel(false);
                    *state = DetectState::Detecting(rx);
                    Entry::Lead(tx)
                }
            }
        };

        match entry {
            Entry::Done(outcome) => outcome,
            Entry::Lead(tx) => {
                let (outcome, recovered) = match self.run_detection() {
                    Ok(result) => result,
                    Err(e) => {
                        // Detection failure must never crash the host command.
                        warn!("{}", SessionError::DetectionFailed(e.to_string()));
                        (None, false)
                    }
                };

                *self.state.lock().await = DetectState::Resolved(outcome.clone());
                let _ = tx.send(true);

                if let Some(session) = &outcome {
                    self.notifier.publish(SessionEvent::Detected {
                        session_id: session.id.clone(),
                        recovered,
                    });
                }
                outcome
            }
            Entry::Wait(mut rx) => {
                let _ = rx.changed().await;
                let mut state = self.state.lock().await;
                match &*state {
                    DetectState::Resolved(outcome) => outcome.clone(),
                    // The leading caller was cancelled mid-flight; let a
                    // later call restart detection.
                    _ => {
                        *state = DetectState::Idle;
                        None
                    }
                }
            }
        }
    }

    /// The cached resolution, without triggering detection.
    pub async fn resolved(&self) -> Option<Session> {
        match &*self.state.lock().await {
            DetectState::Resolved(outcome) => outcome.clone(),
            _ => None,
        }
    }

    /// Refresh the cached copy after a store update so later callers see the
    /// merged fields.
    pub async fn refresh_cache(&self, session: Session) {
        let mut state = self.state.lock().await;
        let same_session = matches!(
            &*state,
            DetectState::Resolved(Some(cached)) if cached.id == session.id
        );
        if same_session {
            *state = DetectState::Resolved(Some(session));
        }
    }

    fn run_detection(&self) -> Result<(Option<Session>, bool)> {
        let Some(fp) = self.probe.capture() else {
            debug!("No terminal attached; session tracking disabled");
            return Ok((None, false));
        };

        if let Some(existing) = self.store.find_exact(&fp)? {
            debug!("Reattached to session {} on {}", existing.id, fp.tty_path);
            // Same terminal seen again: heartbeat, refresh the drifting pid
            // fields, and make sure the row is active.
            let update = SessionUpdate {
                status: Some(SessionStatus::Active),
                fingerprint: Some(fp),
                window_size: self.probe.window_size(),
                ..Default::default()
            };
            let refreshed = self.store.update(&existing.id, &update)?;
            return Ok((Some(refreshed), false));
        }

        if self.recovery_enabled() {
            match self.recovery.recover(&*self.store, &fp) {
                Ok(recovered) => return Ok((Some(recovered), true)),
                // Expected: fall through to creation.
                Err(SessionError::NoRecoveryMatch) => {}
                Err(e) => return Err(e),
            }
        }

        let session =
            self.store
                .create(fp, self.probe.window_size(), self.probe.environment())?;
        debug!("Created session {}", session.id);
        Ok((Some(session), false))
    }
}
