//! SQLite persistence for sessions, allowing identity to survive process
//! restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::{Result, SessionError};
use super::model::{
    Fingerprint, Session, SessionStatus, SessionUpdate, TimeWindow, WindowFilter, WindowKind,
    WindowSize, WindowStatus,
};
use super::store::SessionStore;

/// SQLite-backed session store.
///
/// rusqlite connections are not `Sync`; the connection sits behind a mutex so
/// the store can be shared across the detector, monitor, and tracker.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create the schema if it does not already exist.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            // Foreign keys are declared for documentation of the schema
            // relationship but not enforced at runtime (SQLite's default);
            // pin it explicitly so behavior does not depend on how the
            // bundled SQLite was compiled.
            "PRAGMA foreign_keys = OFF;
            CREATE TABLE IF NOT EXISTS sessions (
                id               TEXT PRIMARY KEY,
                tty_path         TEXT NOT NULL,
                pid              INTEGER NOT NULL,
                parent_pid       INTEGER NOT NULL,
                user_name        TEXT NOT NULL,
                shell            TEXT NOT NULL,
                start_time       TEXT NOT NULL,
                last_active      TEXT NOT NULL,
                status           TEXT NOT NULL,
                window_size      TEXT,
                recent_task_ids  TEXT NOT NULL DEFAULT '[]',
                connection_count INTEGER NOT NULL DEFAULT 1,
                environment      TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_identity
                ON sessions (tty_path, user_name, shell);
            CREATE TABLE IF NOT EXISTS time_windows (
                id          TEXT PRIMARY KEY,
                session_id  TEXT NOT NULL REFERENCES sessions(id),
                task_id     TEXT,
                start_time  TEXT NOT NULL,
                end_time    TEXT,
                kind        TEXT NOT NULL,
                status      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_windows_session
                ON time_windows (session_id);",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection poisoned")
    }

    fn save_session(conn: &Connection, session: &Session) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO sessions
                (id, tty_path, pid, parent_pid, user_name, shell,
                 start_time, last_active, status, window_size,
                 recent_task_ids, connection_count, environment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                session.id,
                session.fingerprint.tty_path,
                session.fingerprint.pid,
                session.fingerprint.parent_pid,
                session.fingerprint.user,
                session.fingerprint.shell,
                session.start_time.to_rfc3339(),
                session.last_active.to_rfc3339(),
                session.status.label(),
                session
                    .window_size
                    .map(|ws| serde_json::to_string(&ws).unwrap_or_default()),
                serde_json::to_string(&session.recent_task_ids).unwrap_or_default(),
                session.connection_count,
                serde_json::to_string(&session.environment_snapshot).unwrap_or_default(),
            ],
        )?;
        Ok(())
    }

    fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
        let window_size_str: Option<String> = row.get(9)?;
        let recent_str: String = row.get(10)?;
        let environment_str: String = row.get(12)?;
        let status_str: String = row.get(8)?;

        let window_size: Option<WindowSize> = window_size_str
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok());
        let recent_task_ids: Vec<String> =
            serde_json::from_str(&recent_str).unwrap_or_default();
        let environment_snapshot: HashMap<String, String> =
            serde_json::from_str(&environment_str).unwrap_or_default();

        Ok(Session {
            id: row.get(0)?,
            fingerprint: Fingerprint {
                tty_path: row.get(1)?,
                pid: row.get(2)?,
                parent_pid: row.get(3)?,
                user: row.get(4)?,
                shell: row.get(5)?,
            },
            start_time: parse_timestamp(&row.get::<_, String>(6)?),
            last_active: parse_timestamp(&row.get::<_, String>(7)?),
            status: SessionStatus::parse(&status_str).unwrap_or(SessionStatus::Inactive),
            window_size,
            recent_task_ids,
            connection_count: row.get(11)?,
            environment_snapshot,
        })
    }

    fn row_to_window(row: &Row<'_>) -> rusqlite::Result<TimeWindow> {
        let kind_str: String = row.get(5)?;
        let status_str: String = row.get(6)?;
        let end_str: Option<String> = row.get(4)?;

        Ok(TimeWindow {
            id: row.get(0)?,
            session_id: row.get(1)?,
            task_id: row.get(2)?,
            start_time: parse_timestamp(&row.get::<_, String>(3)?),
            end_time: end_str.as_deref().map(parse_timestamp),
            kind: WindowKind::parse(&kind_str).unwrap_or(WindowKind::Auto),
            status: WindowStatus::parse(&status_str).unwrap_or(WindowStatus::Completed),
        })
    }

    fn save_window(conn: &Connection, window: &TimeWindow) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO time_windows
                (id, session_id, task_id, start_time, end_time, kind, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                window.id,
                window.session_id,
                window.task_id,
                window.start_time.to_rfc3339(),
                window.end_time.map(|t| t.to_rfc3339()),
                window.kind.label(),
                window.status.label(),
            ],
        )?;
        Ok(())
    }
}

const SESSION_COLUMNS: &str = "id, tty_path, pid, parent_pid, user_name, shell, \
     start_time, last_active, status, window_size, \
     recent_task_ids, connection_count, environment";

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SessionStore for SqliteStore {
    fn find_exact(&self, fingerprint: &Fingerprint) -> Result<Option<Session>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE tty_path = ?1 AND user_name = ?2 AND shell = ?3
               AND status != 'disconnected'
             ORDER BY last_active DESC
             LIMIT 1"
        );
        let session = conn
            .query_row(
                &sql,
                params![
                    fingerprint.tty_path,
                    fingerprint.user,
                    fingerprint.shell
                ],
                Self::row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    fn find_candidates(&self, user: &str) -> Result<Vec<Session>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_name = ?1 AND status != 'active'
             ORDER BY last_active DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user], Self::row_to_session)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
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

        let conn = self.lock();
        Self::save_session(&conn, &session)?;
        Ok(session)
    }

    fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.lock();
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let session = conn
            .query_row(&sql, params![id], Self::row_to_session)
            .optional()?;
        Ok(session)
    }

    fn update(&self, id: &str, update: &SessionUpdate) -> Result<Session> {
        let conn = self.lock();
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let mut session = conn
            .query_row(&sql, params![id], Self::row_to_session)
            .optional()?
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;

        update.apply(&mut session, Utc::now());
        Self::save_session(&conn, &session)?;
        Ok(session)
    }

    fn disconnect(&self, id: &str) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE sessions SET status = 'disconnected', last_active = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(SessionError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    fn session_count(&self) -> Result<usize> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn insert_window(&self, window: &TimeWindow) -> Result<()> {
        let conn = self.lock();
        Self::save_window(&conn, window)
    }

    fn update_window(&self, window: &TimeWindow) -> Result<()> {
        let conn = self.lock();
        Self::save_window(&conn, window)
    }

    fn find_windows(&self, filter: &WindowFilter) -> Result<Vec<TimeWindow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, task_id, start_time, end_time, kind, status
             FROM time_windows
             ORDER BY start_time ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_window)?;

        let mut result = Vec::new();
        for row in rows {
            let window = row?;
            if filter.matches(&window) {
                result.push(window);
            }
        }
        Ok(result)
    }

    fn replace_auto_windows(&self, session_id: &str, windows: &[TimeWindow]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(SessionError::from)?;
        tx.execute(
            "DELETE FROM time_windows WHERE session_id = ?1 AND kind = 'auto'",
            params![session_id],
        )?;
        for window in windows {
            Self::save_window(&tx, window)?;
        }
        tx.commit().map_err(SessionError::from)?;
        Ok(())
    }
}
