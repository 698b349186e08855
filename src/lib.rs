//! Taskdeck library - terminal session tracking for the task manager
//!
//! The task repository, search, and UI layers consume session identity
//! through the `session` module's manager facade and event bus.

pub mod cli;
pub mod session;
pub mod task;
