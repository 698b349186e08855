//! Time window tracking
//!
//! Clusters recorded task activity into windows. Auto-detected windows are
//! derived from the activity log and replaced wholesale on every detection
//! run; manual windows are user-created and validated against each other.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use super::config::WindowsConfig;
use super::error::{Result, SessionError};
use super::model::{TimeWindow, WindowFilter, WindowKind, WindowStatus};
use super::store::SessionStore;

#[derive(Debug, Clone)]
struct ActivityEntry {
    session_id: String,
    timestamp: DateTime<Utc>,
}

pub struct TimeWindowTracker {
    config: WindowsConfig,
    /// Bounded in-process log; oldest entries are dropped past the cap.
    log: Mutex<Vec<ActivityEntry>>,
}

impl TimeWindowTracker {
    pub fn new(config: WindowsConfig) -> Self {
        Self {
            config,
            log: Mutex::new(Vec::new()),
        }
    }

    fn idle_gap(&self) -> Duration {
        Duration::minutes(self.config.idle_gap_minutes as i64)
    }

    /// Append a task activity stamp and extend (or open) the task window.
    pub fn record_task_activity(
        &self,
        store: &dyn SessionStore,
        session_id: &str,
        task_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut log = self.log.lock().expect("activity log poisoned");
            log.push(ActivityEntry {
                session_id: session_id.to_string(),
                timestamp,
            });
            let cap = self.config.activity_log_cap;
            if log.len() > cap {
                let excess = log.len() - cap;
                log.drain(..excess);
            }
        }

        let open = store
            .find_windows(&WindowFilter {
                session_id: Some(session_id.to_string()),
                kind: Some(WindowKind::Task),
                status: Some(WindowStatus::Active),
                task_id: Some(task_id.to_string()),
            })?
            .into_iter()
            .max_by_key(|w| w.start_time);

        match open {
            Some(mut window) => {
                window.end_time = Some(timestamp);
                store.update_window(&window)
            }
            None => {
                let mut window = TimeWindow::new(session_id, WindowKind::Task, timestamp);
                window.task_id = Some(task_id.to_string());
                window.end_time = Some(timestamp);
                store.insert_window(&window)
            }
        }
    }

    /// Derive auto windows from the activity log: clusters separated by gaps
    /// exceeding the idle threshold, each spanning its first and last stamp.
    /// Deterministic and re-runnable; previous auto windows are replaced,
    /// never accumulated.
    pub fn auto_detect_windows(
        &self,
        store: &dyn SessionStore,
        session_id: &str,
    ) -> Result<Vec<TimeWindow>> {
        let mut timestamps: Vec<DateTime<Utc>> = {
            let log = self.log.lock().expect("activity log poisoned");
            log.iter()
                .filter(|e| e.session_id == session_id)
                .map(|e| e.timestamp)
                .collect()
        };
        timestamps.sort();

        let windows = cluster_windows(session_id, &timestamps, self.idle_gap(), Utc::now());
        store.replace_auto_windows(session_id, &windows)?;
        Ok(windows)
    }

    /// Create a user-defined window. Manual windows may overlap auto windows
    /// but not other manual windows of the same session.
    pub fn create_manual_window(
        &self,
        store: &dyn SessionStore,
        session_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        task_id: Option<String>,
    ) -> Result<TimeWindow> {
        if start >= end {
            return Err(SessionError::InvalidWindow(format!(
                "start {} is not before end {}",
                start, end
            )));
        }

        let existing = store.find_windows(&WindowFilter {
            session_id: Some(session_id.to_string()),
            kind: Some(WindowKind::Manual),
            ..Default::default()
        })?;
        if let Some(conflict) = existing.iter().find(|w| w.overlaps(start, end)) {
            return Err(SessionError::InvalidWindow(format!(
                "overlaps manual window {}",
                conflict.id
            )));
        }

        let mut window = TimeWindow::new(session_id, WindowKind::Manual, start);
        window.task_id = task_id;
        window.end_time = Some(end);
        window.status = WindowStatus::Completed;
        store.insert_window(&window)?;
        Ok(window)
    }

    #[cfg(test)]
    fn log_len(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

/// Split sorted timestamps into clusters separated by gaps greater than
/// `idle_gap`. The most recent cluster stays `active` while "now" is still
/// within the gap of its last stamp.
fn cluster_windows(
    session_id: &str,
    timestamps: &[DateTime<Utc>],
    idle_gap: Duration,
    now: DateTime<Utc>,
) -> Vec<TimeWindow> {
    let mut windows = Vec::new();
    if timestamps.is_empty() {
        return windows;
    }

    let mut cluster_start = timestamps[0];
    let mut cluster_end = timestamps[0];

    for &ts in &timestamps[1..] {
        if ts - cluster_end > idle_gap {
            windows.push(completed_window(session_id, cluster_start, cluster_end));
            cluster_start = ts;
        }
        cluster_end = ts;
    }

    let mut last = completed_window(session_id, cluster_start, cluster_end);
    if now - cluster_end <= idle_gap {
        last.status = WindowStatus::Active;
    }
    windows.push(last);
    windows
}

fn completed_window(
    session_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> TimeWindow {
    let mut window = TimeWindow::new(session_id, WindowKind::Auto, start);
    window.end_time = Some(end);
    window.status = WindowStatus::Completed;
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemoryStore;

    fn tracker() -> TimeWindowTracker {
        TimeWindowTracker::new(WindowsConfig::default())
    }

    #[test]
    fn test_cluster_gap_splitting() {
        // Stamps at minutes 0, 2, 5, 40, 42 with a 15 minute gap: two
        // clusters, [0,5] and [40,42].
        let base = Utc::now() - Duration::hours(3);
        let stamps: Vec<DateTime<Utc>> = [0, 2, 5, 40, 42]
            .iter()
            .map(|&m| base + Duration::minutes(m))
            .collect();

        let windows = cluster_windows("s1", &stamps, Duration::minutes(15), Utc::now());
        assert_eq!(windows.len(), 2);

        assert_eq!(windows[0].start_time, stamps[0]);
        assert_eq!(windows[0].end_time, Some(stamps[2]));
        assert_eq!(windows[0].status, WindowStatus::Completed);

        assert_eq!(windows[1].start_time, stamps[3]);
        assert_eq!(windows[1].end_time, Some(stamps[4]));
        assert_eq!(windows[1].status, WindowStatus::Completed);
    }

    #[test]
    fn test_recent_cluster_stays_active() {
        let now = Utc::now();
        let stamps = vec![now - Duration::minutes(10), now - Duration::minutes(2)];

        let windows = cluster_windows("s1", &stamps, Duration::minutes(15), now);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].status, WindowStatus::Active);
    }

    #[test]
    fn test_gap_exactly_at_threshold_does_not_split() {
        let base = Utc::now() - Duration::hours(3);
        let stamps = vec![base, base + Duration::minutes(15)];

        let windows = cluster_windows("s1", &stamps, Duration::minutes(15), Utc::now());
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn test_auto_detect_is_idempotent() {
        let store = MemoryStore::new();
        let tracker = tracker();
        let base = Utc::now() - Duration::hours(3);

        for minutes in [0, 2, 5, 40, 42] {
            tracker
                .record_task_activity(&store, "s1", "T001", base + Duration::minutes(minutes))
                .unwrap();
        }

        let first = tracker.auto_detect_windows(&store, "s1").unwrap();
        let second = tracker.auto_detect_windows(&store, "s1").unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);

        let stored = store
            .find_windows(&WindowFilter {
                session_id: Some("s1".to_string()),
                kind: Some(WindowKind::Auto),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_record_extends_open_task_window() {
        let store = MemoryStore::new();
        let tracker = tracker();
        let base = Utc::now();

        tracker
            .record_task_activity(&store, "s1", "T001", base)
            .unwrap();
        tracker
            .record_task_activity(&store, "s1", "T001", base + Duration::minutes(3))
            .unwrap();

        let task_windows = store
            .find_windows(&WindowFilter {
                session_id: Some("s1".to_string()),
                kind: Some(WindowKind::Task),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(task_windows.len(), 1);
        assert_eq!(task_windows[0].start_time, base);
        assert_eq!(
            task_windows[0].end_time,
            Some(base + Duration::minutes(3))
        );
    }

    #[test]
    fn test_record_opens_separate_window_per_task() {
        let store = MemoryStore::new();
        let tracker = tracker();
        let base = Utc::now();

        tracker
            .record_task_activity(&store, "s1", "T001", base)
            .unwrap();
        tracker
            .record_task_activity(&store, "s1", "T002", base + Duration::minutes(1))
            .unwrap();

        let task_windows = store
            .find_windows(&WindowFilter {
                session_id: Some("s1".to_string()),
                kind: Some(WindowKind::Task),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(task_windows.len(), 2);
    }

    #[test]
    fn test_activity_log_is_bounded() {
        let store = MemoryStore::new();
        let tracker = TimeWindowTracker::new(WindowsConfig {
            idle_gap_minutes: 15,
            activity_log_cap: 10,
        });
        let base = Utc::now();

        for i in 0..25 {
            tracker
                .record_task_activity(&store, "s1", "T001", base + Duration::seconds(i))
                .unwrap();
        }
        assert_eq!(tracker.log_len(), 10);
    }

    #[test]
    fn test_manual_window_rejects_inverted_bounds() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let err = tracker()
            .create_manual_window(&store, "s1", now, now - Duration::minutes(5), None)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidWindow(_)));
    }

    #[test]
    fn test_manual_windows_cannot_overlap_each_other() {
        let store = MemoryStore::new();
        let tracker = tracker();
        let base = Utc::now();

        tracker
            .create_manual_window(&store, "s1", base, base + Duration::hours(1), None)
            .unwrap();
        let err = tracker
            .create_manual_window(
                &store,
                "s1",
                base + Duration::minutes(30),
                base + Duration::hours(2),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidWindow(_)));

        // Adjacent is fine.
        tracker
            .create_manual_window(
                &store,
                "s1",
                base + Duration::hours(1),
                base + Duration::hours(2),
                None,
            )
            .unwrap();
    }

    #[test]
    fn test_manual_windows_may_overlap_auto_windows() {
        let store = MemoryStore::new();
        let tracker = tracker();
        let base = Utc::now() - Duration::hours(2);

        tracker
            .record_task_activity(&store, "s1", "T001", base)
            .unwrap();
        tracker
            .record_task_activity(&store, "s1", "T001", base + Duration::minutes(10))
            .unwrap();
        tracker.auto_detect_windows(&store, "s1").unwrap();

        tracker
            .create_manual_window(&store, "s1", base, base + Duration::minutes(30), None)
            .unwrap();
    }
}
