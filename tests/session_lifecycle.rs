//! Integration tests for session detection, recovery, and disconnect
//!
//! Each test assembles the manager from explicit parts (shared store, stub
//! probe) so a terminal-less CI environment exercises the full lifecycle.

use std::sync::Arc;

use taskdeck::session::{
    Config, Fingerprint, MemoryStore, SessionEvent, SessionManager, SessionStatus,
    SessionStore, SessionUpdate, SqliteStore, TerminalProbe,
};
use taskdeck::task::TaskId;

struct StubProbe(Option<Fingerprint>);

impl TerminalProbe for StubProbe {
    fn capture(&self) -> Option<Fingerprint> {
        self.0.clone()
    }
}

fn fingerprint(tty: &str) -> Fingerprint {
    Fingerprint {
        tty_path: tty.to_string(),
        pid: 1234,
        parent_pid: 1233,
        user: "dev".to_string(),
        shell: "/bin/zsh".to_string(),
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.session.export_env = false;
    config
}

fn manager_with(store: Arc<dyn SessionStore>, fp: Option<Fingerprint>) -> SessionManager {
    SessionManager::with_parts(test_config(), store, Box::new(StubProbe(fp)))
}

#[tokio::test]
async fn identical_fingerprint_resolves_to_same_session() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());

    // Two CLI invocations on the same terminal.
    let first = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));
    let id_one = first.detect_session().await.unwrap().id;

    let second = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));
    let id_two = second.detect_session().await.unwrap().id;

    assert_eq!(id_one, id_two);
    assert_eq!(store.session_count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cold_start_concurrency_creates_one_row() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let manager = Arc::new(manager_with(store.clone(), Some(fingerprint("/dev/pts/3"))));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(
            async move { manager.detect_session().await },
        ));
    }

    let mut ids: Vec<String> = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(store.session_count().unwrap(), 1);
}

#[tokio::test]
async fn no_terminal_means_no_session_and_no_writes() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let manager = manager_with(store.clone(), None);

    assert!(manager.detect_session().await.is_none());
    assert!(manager.detect_session().await.is_none());
    assert_eq!(store.session_count().unwrap(), 0);
}

#[tokio::test]
async fn fresh_terminal_persists_one_active_row() {
    let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let manager = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));

    let session = manager.detect_session().await.unwrap();

    assert_eq!(store.session_count().unwrap(), 1);
    let row = store.get(&session.id).unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Active);
    assert_eq!(row.connection_count, 1);
}

#[tokio::test]
async fn recovery_reattaches_and_preserves_recent_tasks() {
    let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::open_in_memory().unwrap());

    // First invocation records some task usage, then the session goes stale.
    let first = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));
    let original = first.detect_session().await.unwrap();
    first
        .record_task_activity(&TaskId::from_number(42))
        .await
        .unwrap();
    store
        .update(
            &original.id,
            &SessionUpdate {
                status: Some(SessionStatus::Inactive),
                ..Default::default()
            },
        )
        .unwrap();

    // New terminal, same user and shell: a multiplexer reattachment.
    let second = manager_with(store.clone(), Some(fingerprint("/dev/pts/7")));
    let recovered = second.detect_session().await.unwrap();

    assert_eq!(recovered.id, original.id);
    assert_eq!(recovered.status, SessionStatus::Active);
    assert_eq!(recovered.connection_count, 2);
    assert_eq!(recovered.fingerprint.tty_path, "/dev/pts/7");
    assert_eq!(recovered.recent_task_ids, vec!["T042"]);
    assert_eq!(store.session_count().unwrap(), 1);
}

#[tokio::test]
async fn different_user_never_recovers() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());

    let first = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));
    let original = first.detect_session().await.unwrap();
    store
        .update(
            &original.id,
            &SessionUpdate {
                status: Some(SessionStatus::Inactive),
                ..Default::default()
            },
        )
        .unwrap();

    let mut other = fingerprint("/dev/pts/3");
    other.user = "intruder".to_string();
    let second = manager_with(store.clone(), Some(other));
    let session = second.detect_session().await.unwrap();

    assert_ne!(session.id, original.id);
    assert_eq!(store.session_count().unwrap(), 2);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_cancels_monitor() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let manager = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));

    let session = manager.detect_session().await.unwrap();
    assert!(manager.integration_status().await.monitor_running);

    let mut events = manager.subscribe();
    manager.disconnect_session().await;
    manager.disconnect_session().await;

    let mut disconnected = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Disconnected { .. }) {
            disconnected += 1;
        }
    }
    assert_eq!(disconnected, 1);
    assert!(!manager.integration_status().await.monitor_running);

    let row = store.get(&session.id).unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Disconnected);
}

#[tokio::test]
async fn disconnected_session_is_not_silently_resurrected() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());

    let first = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));
    let original = first.detect_session().await.unwrap();
    first.disconnect_session().await;

    // Same terminal again with recovery off: a brand-new session.
    let second = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));
    second.set_recovery_enabled(false);
    let session = second.detect_session().await.unwrap();

    assert_ne!(session.id, original.id);
}

#[tokio::test]
async fn explicit_recovery_may_reattach_disconnected_session() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());

    let first = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));
    let original = first.detect_session().await.unwrap();
    first.disconnect_session().await;

    // Recovery enabled (the default) scores the disconnected row and brings
    // it back.
    let second = manager_with(store.clone(), Some(fingerprint("/dev/pts/3")));
    let session = second.detect_session().await.unwrap();

    assert_eq!(session.id, original.id);
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.connection_count, 2);
}

#[tokio::test]
async fn detection_failure_resolves_to_no_session() {
    // A store that refuses everything: detection must swallow the failure.
    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn find_exact(
            &self,
            _: &Fingerprint,
        ) -> taskdeck::session::Result<Option<taskdeck::session::Session>> {
            Err(taskdeck::session::SessionError::StorageUnavailable(
                "database locked".to_string(),
            ))
        }
        fn find_candidates(
            &self,
            _: &str,
        ) -> taskdeck::session::Result<Vec<taskdeck::session::Session>> {
            Err(taskdeck::session::SessionError::StorageUnavailable(
                "database locked".to_string(),
            ))
        }
        fn create(
            &self,
            _: Fingerprint,
            _: Option<taskdeck::session::WindowSize>,
            _: std::collections::HashMap<String, String>,
        ) -> taskdeck::session::Result<taskdeck::session::Session> {
            Err(taskdeck::session::SessionError::StorageUnavailable(
                "database locked".to_string(),
            ))
        }
        fn get(
            &self,
            _: &str,
        ) -> taskdeck::session::Result<Option<taskdeck::session::Session>> {
            Ok(None)
        }
        fn update(
            &self,
            id: &str,
            _: &SessionUpdate,
        ) -> taskdeck::session::Result<taskdeck::session::Session> {
            Err(taskdeck::session::SessionError::SessionNotFound(
                id.to_string(),
            ))
        }
        fn disconnect(&self, _: &str) -> taskdeck::session::Result<()> {
            Ok(())
        }
        fn session_count(&self) -> taskdeck::session::Result<usize> {
            Ok(0)
        }
        fn insert_window(
            &self,
            _: &taskdeck::session::TimeWindow,
        ) -> taskdeck::session::Result<()> {
            Ok(())
        }
        fn update_window(
            &self,
            _: &taskdeck::session::TimeWindow,
        ) -> taskdeck::session::Result<()> {
            Ok(())
        }
        fn find_windows(
            &self,
            _: &taskdeck::session::WindowFilter,
        ) -> taskdeck::session::Result<Vec<taskdeck::session::TimeWindow>> {
            Ok(Vec::new())
        }
        fn replace_auto_windows(
            &self,
            _: &str,
            _: &[taskdeck::session::TimeWindow],
        ) -> taskdeck::session::Result<()> {
            Ok(())
        }
    }

    let manager = manager_with(Arc::new(BrokenStore), Some(fingerprint("/dev/pts/3")));
    assert!(manager.detect_session().await.is_none());
}
