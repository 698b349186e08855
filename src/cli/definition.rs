//! Top-level CLI definition

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use super::{session::SessionCommands, window::WindowCommands};

#[derive(Parser)]
#[command(name = "td", version, about = "Command-line task manager")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Terminal session tracking
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Time windows for the current session
    Window {
        #[command(subcommand)]
        command: WindowCommands,
    },

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
