//! Inactivity monitoring
//!
//! A recurring staleness check owned by the session manager. The task must
//! be cancelled on disconnect or process exit; dropping the monitor aborts
//! it as a backstop.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::Result;
use super::events::{EventNotifier, SessionEvent};
use super::model::{SessionStatus, SessionUpdate};
use super::store::SessionStore;

/// Whether an active session has outlived the inactivity timeout. Pure over
/// its inputs so staleness is testable without a runtime clock.
pub fn is_stale(
    status: SessionStatus,
    last_active: DateTime<Utc>,
    timeout: Duration,
    now: DateTime<Utc>,
) -> bool {
    status == SessionStatus::Active && now - last_active >= timeout
}

pub struct InactivityMonitor {
    handle: JoinHandle<()>,
}

impl InactivityMonitor {
    /// Spawn the recurring check for one session.
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        session_id: String,
        interval: StdDuration,
        timeout: Duration,
        notifier: EventNotifier,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first interval tick fires immediately; consume it so a
            // freshly created session is not evaluated at t=0.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = Self::check(&*store, &session_id, timeout, &notifier) {
                    warn!("Inactivity check failed: {}", e);
                }
            }
        });
        Self { handle }
    }

    /// One staleness check. Idempotent: a session that is already inactive
    /// or disconnected is left untouched.
    pub fn check(
        store: &dyn SessionStore,
        session_id: &str,
        timeout: Duration,
        notifier: &EventNotifier,
    ) -> Result<()> {
        let Some(session) = store.get(session_id)? else {
            return Ok(());
        };

        if is_stale(session.status, session.last_active, timeout, Utc::now()) {
            debug!(
                "Session {} idle since {}, marking inactive",
                session_id, session.last_active
            );
            store.update(
                session_id,
                &SessionUpdate {
                    status: Some(SessionStatus::Inactive),
                    ..Default::default()
                },
            )?;
            notifier.publish(SessionEvent::Updated {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
