//! `td window` subcommands implementation

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, Subcommand};

use crate::session::{Config, SessionManager, WindowFilter, WindowKind};

use super::truncate_id;

#[derive(Subcommand)]
pub enum WindowCommands {
    /// List time windows for the current session
    List(ListArgs),

    /// Create a manual window
    Add(AddArgs),

    /// Re-derive auto windows from recorded activity
    Auto,
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter by kind: task, manual, or auto
    #[arg(long)]
    pub kind: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct AddArgs {
    /// Window start (RFC 3339 or "YYYY-MM-DD HH:MM", UTC)
    pub start: String,

    /// Window end (RFC 3339 or "YYYY-MM-DD HH:MM", UTC)
    pub end: String,

    /// Associate with a task (e.g. T042)
    #[arg(long)]
    pub task: Option<String>,
}

pub async fn run(command: WindowCommands) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let manager = Arc::new(SessionManager::new(config)?);

    match command {
        WindowCommands::List(args) => run_list(&manager, args).await,
        WindowCommands::Add(args) => run_add(&manager, args).await,
        WindowCommands::Auto => run_auto(&manager).await,
    }
}

async fn run_list(manager: &Arc<SessionManager>, args: ListArgs) -> Result<()> {
    let Some(session) = manager.detect_session().await else {
        bail!("No session: not attached to a terminal");
    };

    let kind = match args.kind.as_deref() {
        Some(s) => match WindowKind::parse(s) {
            Some(kind) => Some(kind),
            None => bail!("Unknown window kind: {} (task, manual, auto)", s),
        },
        None => None,
    };

    let windows = manager.find_windows(&WindowFilter {
        session_id: Some(session.id.clone()),
        kind,
        ..Default::default()
    });

    if args.json {
        println!("{}", serde_json::to_string_pretty(&windows)?);
        return Ok(());
    }

    if windows.is_empty() {
        println!("No windows recorded for session {}", truncate_id(&session.id, 8));
        return Ok(());
    }

    for window in windows {
        let end = window
            .end_time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "..".to_string());
        println!(
            "{}  {:6}  {}  {} - {}  [{}]",
            truncate_id(&window.id, 8),
            window.kind.label(),
            window.task_id.as_deref().unwrap_or("-"),
            window.start_time.format("%Y-%m-%d %H:%M"),
            end,
            window.status.label(),
        );
    }
    Ok(())
}

async fn run_add(manager: &Arc<SessionManager>, args: AddArgs) -> Result<()> {
    let start = parse_time(&args.start)?;
    let end = parse_time(&args.end)?;

    let window = manager
        .create_manual_window(start, end, args.task.clone())
        .await?;
    println!("Created manual window {}", truncate_id(&window.id, 8));
    Ok(())
}

async fn run_auto(manager: &Arc<SessionManager>) -> Result<()> {
    let windows = manager.auto_detect_windows().await;
    println!(
        "Detected {} window{}",
        windows.len(),
        if windows.len() == 1 { "" } else { "s" }
    );
    Ok(())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        return Ok(t.and_utc());
    }
    bail!("Cannot parse time: {} (RFC 3339 or \"YYYY-MM-DD HH:MM\")", s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_rfc3339() {
        let t = parse_time("2026-08-07T09:30:00Z").unwrap();
        assert_eq!(t.format("%H:%M").to_string(), "09:30");
    }

    #[test]
    fn test_parse_time_simple_format() {
        let t = parse_time("2026-08-07 09:30").unwrap();
        assert_eq!(t.format("%Y-%m-%d %H:%M").to_string(), "2026-08-07 09:30");
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time("yesterday-ish").is_err());
    }
}
