//! Taskdeck - command-line task manager

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use taskdeck::cli::{self, Cli, Commands};
use taskdeck::session::{Config, SessionManager};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("TASKDECK_DEBUG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter("taskdeck=debug")
            .init();
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completion { shell }) => {
            generate(shell, &mut Cli::command(), "td", &mut std::io::stdout());
            Ok(())
        }
        Some(Commands::Session { command }) => cli::session::run(command).await,
        Some(Commands::Window { command }) => cli::window::run(command).await,
        None => {
            let config = Config::load().unwrap_or_default();
            let manager = std::sync::Arc::new(SessionManager::new(config)?);
            cli::session::run_status(&manager, false).await
        }
    }
}
