//! Fuzzy session reattachment
//!
//! When no exact identity match exists, every non-active session is scored
//! against the freshly captured fingerprint using weighted field agreement.
//! Same user + same shell but a different tty is a plausible
//! terminal-multiplexer reattachment; same tty under a different user is not
//! a valid match at all.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::config::RecoveryConfig;
use super::error::{Result, SessionError};
use super::model::{Fingerprint, Session, SessionStatus, SessionUpdate};
use super::store::SessionStore;

/// Ephemeral scoring result, produced during a recovery attempt and
/// discarded afterward. Never persisted.
#[derive(Debug, Clone)]
pub struct RecoveryCandidate {
    pub session: Session,
    /// Weighted agreement in `[0, 1]`.
    pub score: f64,
    pub matched_fields: Vec<&'static str>,
}

pub struct RecoveryStrategy {
    config: RecoveryConfig,
}

impl RecoveryStrategy {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Score one session against the observed fingerprint. The user field is
    /// a gate: a mismatch zeroes the score outright.
    pub fn score(
        &self,
        session: &Session,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> RecoveryCandidate {
        let mut matched_fields = Vec::new();
        let mut score = 0.0;

        if session.fingerprint.user != fingerprint.user {
            return RecoveryCandidate {
                session: session.clone(),
                score: 0.0,
                matched_fields,
            };
        }
        matched_fields.push("user");

        if session.fingerprint.shell == fingerprint.shell {
            matched_fields.push("shell");
            score += self.config.shell_weight;
        }
        if session.fingerprint.tty_path == fingerprint.tty_path {
            matched_fields.push("tty_path");
            score += self.config.tty_weight;
        }

        // Recent sessions are likelier reattachment targets; decay linearly
        // to zero over the horizon.
        let horizon = Duration::hours(self.config.recency_horizon_hours as i64);
        let age = now - session.last_active;
        if age < horizon && horizon > Duration::zero() {
            let fraction =
                1.0 - age.num_seconds() as f64 / horizon.num_seconds() as f64;
            score += self.config.recency_weight * fraction.clamp(0.0, 1.0);
        }

        RecoveryCandidate {
            session: session.clone(),
            score: score.min(1.0),
            matched_fields,
        }
    }

    /// Best candidate above the confidence threshold, ties broken by most
    /// recent `last_active`.
    pub fn best_candidate(
        &self,
        sessions: &[Session],
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Option<RecoveryCandidate> {
        sessions
            .iter()
            .map(|s| self.score(s, fingerprint, now))
            .filter(|c| c.score >= self.config.confidence_threshold)
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.session.last_active.cmp(&b.session.last_active))
            })
    }

    /// Attempt reattachment. On acceptance the session transitions back to
    /// active, its connection count increments, and its fingerprint is
    /// replaced with the newly observed values (fingerprints drift; exact
    /// history is not preserved). `recent_task_ids` survive untouched.
    /// No match above threshold is `NoRecoveryMatch`, which callers treat as
    /// fall-through to creation, not a failure.
    pub fn recover(
        &self,
        store: &dyn SessionStore,
        fingerprint: &Fingerprint,
    ) -> Result<Session> {
        let candidates = store.find_candidates(&fingerprint.user)?;
        let best = match self.best_candidate(&candidates, fingerprint, Utc::now()) {
            Some(candidate) => candidate,
            None => {
                debug!(
                    "No recovery candidate above threshold {} among {} sessions",
                    self.config.confidence_threshold,
                    candidates.len()
                );
                return Err(SessionError::NoRecoveryMatch);
            }
        };

        debug!(
            "Recovering session {} (score {:.2}, matched {:?})",
            best.session.id, best.score, best.matched_fields
        );

        let update = SessionUpdate {
            status: Some(SessionStatus::Active),
            connection_count: Some(best.session.connection_count + 1),
            fingerprint: Some(fingerprint.clone()),
            ..Default::default()
        };
        store.update(&best.session.id, &update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemoryStore;
    use std::collections::HashMap;

    fn fingerprint(tty: &str, user: &str, shell: &str) -> Fingerprint {
        Fingerprint {
            tty_path: tty.to_string(),
            pid: 10,
            parent_pid: 9,
            user: user.to_string(),
            shell: shell.to_string(),
        }
    }

    fn strategy() -> RecoveryStrategy {
        RecoveryStrategy::new(RecoveryConfig::default())
    }

    fn session(tty: &str, user: &str, shell: &str, age_minutes: i64) -> Session {
        let mut s = Session::new(fingerprint(tty, user, shell));
        s.status = SessionStatus::Inactive;
        s.last_active = Utc::now() - Duration::minutes(age_minutes);
        s
    }

    #[test]
    fn test_user_mismatch_zeroes_score() {
        let strategy = strategy();
        let s = session("/dev/pts/1", "alice", "/bin/zsh", 1);
        let probe = fingerprint("/dev/pts/1", "bob", "/bin/zsh");

        let candidate = strategy.score(&s, &probe, Utc::now());
        assert_eq!(candidate.score, 0.0);
        assert!(candidate.matched_fields.is_empty());
    }

    #[test]
    fn test_multiplexer_reattach_clears_threshold() {
        // Same user and shell, different tty, recent: the classic tmux case.
        let strategy = strategy();
        let s = session("/dev/pts/1", "dev", "/bin/zsh", 5);
        let probe = fingerprint("/dev/pts/4", "dev", "/bin/zsh");

        let candidate = strategy.score(&s, &probe, Utc::now());
        assert!(candidate.score >= 0.6, "score was {}", candidate.score);
        assert!(candidate.matched_fields.contains(&"shell"));
        assert!(!candidate.matched_fields.contains(&"tty_path"));
    }

    #[test]
    fn test_stale_shell_only_match_falls_short() {
        let strategy = strategy();
        let s = session("/dev/pts/1", "dev", "/bin/zsh", 60 * 48);
        let probe = fingerprint("/dev/pts/4", "dev", "/bin/zsh");

        let candidate = strategy.score(&s, &probe, Utc::now());
        assert!(candidate.score < 0.6, "score was {}", candidate.score);
    }

    #[test]
    fn test_ties_break_by_recency() {
        let strategy = strategy();
        let older = session("/dev/pts/1", "dev", "/bin/zsh", 60 * 30);
        let newer = session("/dev/pts/2", "dev", "/bin/zsh", 60 * 30);
        // Identical field agreement and identical staleness beyond the
        // horizon; nudge last_active so ordering is deterministic.
        let mut newer = newer;
        newer.last_active = older.last_active + Duration::seconds(1);
        newer.fingerprint.tty_path = "/dev/pts/9".to_string();

        let probe = fingerprint("/dev/pts/9", "dev", "/bin/zsh");
        let best = strategy
            .best_candidate(&[older, newer.clone()], &probe, Utc::now())
            .unwrap();
        assert_eq!(best.session.id, newer.id);
    }

    #[test]
    fn test_recover_updates_session() {
        let store = MemoryStore::new();
        let created = store
            .create(
                fingerprint("/dev/pts/1", "dev", "/bin/zsh"),
                None,
                HashMap::new(),
            )
            .unwrap();
        store
            .update(
                &created.id,
                &SessionUpdate {
                    status: Some(SessionStatus::Inactive),
                    recent_task_ids: Some(vec!["T042".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();

        let probe = fingerprint("/dev/pts/8", "dev", "/bin/zsh");
        let recovered = strategy().recover(&store, &probe).unwrap();

        assert_eq!(recovered.id, created.id);
        assert_eq!(recovered.status, SessionStatus::Active);
        assert_eq!(recovered.connection_count, 2);
        assert_eq!(recovered.fingerprint.tty_path, "/dev/pts/8");
        assert_eq!(recovered.recent_task_ids, vec!["T042"]);
    }

    #[test]
    fn test_recover_without_candidates_reports_no_match() {
        let store = MemoryStore::new();
        let probe = fingerprint("/dev/pts/8", "dev", "/bin/zsh");
        let err = strategy().recover(&store, &probe).unwrap_err();
        assert!(matches!(err, SessionError::NoRecoveryMatch));
    }
}
