//! `td session` subcommands implementation

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use crate::session::{save_config, Config, SessionManager};
use crate::task::TaskId;

use super::truncate_id;

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Show current session status
    Status(StatusArgs),

    /// Detect (or create) the session for this terminal
    Detect(DetectArgs),

    /// Disconnect the current session
    Disconnect,

    /// Stamp task activity on the current session
    Record(RecordArgs),

    /// Enable or disable fuzzy session recovery
    Recovery(RecoveryArgs),

    /// Stream session lifecycle events until interrupted
    Watch,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DetectArgs {
    /// Just the session id (for scripting)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct RecordArgs {
    /// Task ID (e.g. T042)
    pub task_id: String,
}

#[derive(Args)]
pub struct RecoveryArgs {
    /// "on" or "off"
    pub state: String,
}

pub async fn run(command: SessionCommands) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let manager = Arc::new(SessionManager::new(config)?);

    match command {
        SessionCommands::Status(args) => run_status(&manager, args.json).await,
        SessionCommands::Detect(args) => run_detect(&manager, args).await,
        SessionCommands::Disconnect => run_disconnect(&manager).await,
        SessionCommands::Record(args) => run_record(&manager, args).await,
        SessionCommands::Recovery(args) => run_recovery(&manager, args).await,
        SessionCommands::Watch => run_watch(&manager).await,
    }
}

pub async fn run_status(manager: &Arc<SessionManager>, json: bool) -> Result<()> {
    manager.detect_session().await;
    let status = manager.integration_status().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match (&status.session_id, status.status) {
        (Some(id), Some(state)) => {
            println!("Session:     {}", truncate_id(id, 8));
            println!("Status:      {}", state);
            println!(
                "Connections: {}",
                status.connection_count.unwrap_or_default()
            );
        }
        _ => println!("Session:     none (not attached to a terminal)"),
    }
    println!(
        "Persistence: {}",
        if status.persistence { "on" } else { "off" }
    );
    println!(
        "Recovery:    {}",
        if status.recovery_enabled { "on" } else { "off" }
    );
    Ok(())
}

async fn run_detect(manager: &Arc<SessionManager>, args: DetectArgs) -> Result<()> {
    let session = manager.detect_session().await;

    match session {
        Some(session) if args.json => {
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        Some(session) if args.quiet => {
            println!("{}", session.id);
        }
        Some(session) => {
            println!(
                "Session {} on {} ({} connection{})",
                truncate_id(&session.id, 8),
                session.fingerprint.tty_path,
                session.connection_count,
                if session.connection_count == 1 { "" } else { "s" }
            );
        }
        None if args.quiet || args.json => {}
        None => println!("No session: not attached to a terminal"),
    }
    Ok(())
}

async fn run_disconnect(manager: &Arc<SessionManager>) -> Result<()> {
    let session = manager.detect_session().await;
    manager.disconnect_session().await;

    match session {
        Some(session) => println!("Disconnected session {}", truncate_id(&session.id, 8)),
        None => println!("No session to disconnect"),
    }
    Ok(())
}

async fn run_record(manager: &Arc<SessionManager>, args: RecordArgs) -> Result<()> {
    let Some(task_id) = TaskId::parse(&args.task_id) else {
        bail!("Invalid task id: {} (expected e.g. T042)", args.task_id);
    };

    match manager.record_task_activity(&task_id).await {
        Some(session) => {
            println!(
                "Recorded {} on session {}",
                task_id,
                truncate_id(&session.id, 8)
            );
            Ok(())
        }
        None => bail!("No session: not attached to a terminal"),
    }
}

async fn run_recovery(manager: &Arc<SessionManager>, args: RecoveryArgs) -> Result<()> {
    let enabled = match args.state.as_str() {
        "on" => true,
        "off" => false,
        other => bail!("Expected \"on\" or \"off\", got \"{}\"", other),
    };

    manager.set_recovery_enabled(enabled);

    // Persist so the next invocation agrees.
    let mut config = Config::load().unwrap_or_default();
    config.session.recovery.enabled = enabled;
    save_config(&config)?;

    println!("Recovery {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

async fn run_watch(manager: &Arc<SessionManager>) -> Result<()> {
    let mut events = manager.subscribe();
    let shutdown = manager.install_shutdown_hook();

    match manager.detect_session().await {
        Some(session) => println!("Watching session {}", truncate_id(&session.id, 8)),
        None => println!("Watching (no session: not attached to a terminal)"),
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{:?}", event),
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Let the hook finish the disconnect; fall back to a direct call in case
    // the signal raced past it.
    manager.disconnect_session().await;
    shutdown.abort();
    Ok(())
}
