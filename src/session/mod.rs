//! Terminal session tracking - identity, recovery, and time windows
//!
//! A running CLI invocation is associated with a persistent session
//! representing a physical terminal. Detection survives process restarts,
//! fuzzy recovery reattaches across terminal multiplexers, and recorded task
//! activity clusters into time windows.

pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod manager;
pub mod model;
pub mod monitor;
pub mod recovery;
pub mod sqlite;
pub mod store;
pub mod windows;

pub use config::{save_config, Config, RecoveryConfig, SessionConfig, WindowsConfig};
pub use detector::{OsProbe, SessionDetector, TerminalProbe};
pub use error::{Result, SessionError};
pub use events::{EventNotifier, SessionEvent};
pub use fingerprint::{capture_fingerprint, is_in_terminal};
pub use manager::{IntegrationStatus, SessionManager};
pub use model::{
    Fingerprint, Session, SessionStatus, SessionUpdate, TimeWindow, WindowFilter, WindowKind,
    WindowSize, WindowStatus,
};
pub use monitor::InactivityMonitor;
pub use recovery::{RecoveryCandidate, RecoveryStrategy};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, SessionStore};
pub use windows::TimeWindowTracker;

use std::path::PathBuf;

/// Exported to the host process so child processes inherit the session
/// identity. One-way and best-effort, not a contract.
pub const SESSION_ID_ENV_VAR: &str = "TASKDECK_SESSION_ID";

pub fn get_app_dir() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?;
    let dir = home.join(".taskdeck");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_get_app_dir_creates_directory() -> anyhow::Result<()> {
        let temp = tempdir()?;
        std::env::set_var("HOME", temp.path());

        let dir = get_app_dir()?;
        assert!(dir.ends_with(".taskdeck"));
        assert!(dir.exists());
        Ok(())
    }
}
