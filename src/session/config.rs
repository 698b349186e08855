//! User configuration management

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

use super::get_app_dir;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub windows: WindowsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// When false, sessions live only in process memory.
    #[serde(default = "default_true")]
    pub persistence: bool,

    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_minutes: u64,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,

    #[serde(default = "default_recent_task_cap")]
    pub recent_task_cap: usize,

    /// Export the session id to the process environment for child inheritance.
    #[serde(default = "default_true")]
    pub export_env: bool,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persistence: true,
            inactivity_timeout_minutes: default_inactivity_timeout(),
            monitor_interval_seconds: default_monitor_interval(),
            recent_task_cap: default_recent_task_cap(),
            export_env: true,
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Fuzzy-reattachment tuning. The weights are heuristics, not contract;
/// a same-user, same-shell match on a recent session clears the default
/// threshold without the tty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_shell_weight")]
    pub shell_weight: f64,

    #[serde(default = "default_tty_weight")]
    pub tty_weight: f64,

    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,

    #[serde(default = "default_recency_horizon")]
    pub recency_horizon_hours: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: default_confidence_threshold(),
            shell_weight: default_shell_weight(),
            tty_weight: default_tty_weight(),
            recency_weight: default_recency_weight(),
            recency_horizon_hours: default_recency_horizon(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    /// Gap between activity stamps that splits auto-detected windows.
    #[serde(default = "default_idle_gap")]
    pub idle_gap_minutes: u64,

    #[serde(default = "default_activity_log_cap")]
    pub activity_log_cap: usize,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            idle_gap_minutes: default_idle_gap(),
            activity_log_cap: default_activity_log_cap(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_inactivity_timeout() -> u64 {
    30
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_recent_task_cap() -> usize {
    20
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_shell_weight() -> f64 {
    0.55
}

fn default_tty_weight() -> f64 {
    0.25
}

fn default_recency_weight() -> f64 {
    0.2
}

fn default_recency_horizon() -> u64 {
    24
}

fn default_idle_gap() -> u64 {
    15
}

fn default_activity_log_cap() -> usize {
    512
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = get_app_dir()?.join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(toml::from_str(&content)?)
    }
}

pub fn save_config(config: &Config) -> Result<()> {
    let path = get_app_dir()?.join("config.toml");
    let content = toml::to_string_pretty(config)?;
    fs::write(&path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_load_missing_file_returns_defaults() -> Result<()> {
        let temp = tempdir()?;
        std::env::set_var("HOME", temp.path());

        let config = Config::load()?;
        assert!(config.session.persistence);
        assert_eq!(config.session.inactivity_timeout_minutes, 30);
        assert_eq!(config.windows.idle_gap_minutes, 15);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_save_load_roundtrip() -> Result<()> {
        let temp = tempdir()?;
        std::env::set_var("HOME", temp.path());

        let mut config = Config::default();
        config.session.persistence = false;
        config.session.recovery.confidence_threshold = 0.8;
        save_config(&config)?;

        let loaded = Config::load()?;
        assert!(!loaded.session.persistence);
        assert_eq!(loaded.session.recovery.confidence_threshold, 0.8);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_partial_config_fills_defaults() -> Result<()> {
        let temp = tempdir()?;
        std::env::set_var("HOME", temp.path());

        let path = get_app_dir()?.join("config.toml");
        fs::write(&path, "[session]\ninactivity_timeout_minutes = 5\n")?;

        let config = Config::load()?;
        assert_eq!(config.session.inactivity_timeout_minutes, 5);
        assert!(config.session.recovery.enabled);
        assert_eq!(config.windows.activity_log_cap, 512);
        Ok(())
    }
}
