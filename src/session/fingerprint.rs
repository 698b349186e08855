//! Terminal fingerprint capture
//!
//! Best-effort OS probes. Every accessor returns `Option` and never panics;
//! a missing signal degrades detection to "no session" rather than erroring.

use std::collections::HashMap;
use std::io::{stdin, stdout, IsTerminal};
use std::os::fd::AsRawFd;

use nix::libc;
use nix::unistd;

use super::model::{Fingerprint, WindowSize};

/// Environment variables captured into the session snapshot. Mirrors what a
/// child process needs to reconstruct the terminal context.
pub(crate) const SNAPSHOT_ENV_VARS: &[&str] = &[
    "TERM",
    "COLORTERM",
    "LANG",
    "SHELL",
    "TERM_PROGRAM",
    "TMUX",
    "SSH_TTY",
];

/// True only if both stdin and stdout are attached to an interactive
/// terminal device. Pure, side-effect-free.
pub fn is_in_terminal() -> bool {
    stdin().is_terminal() && stdout().is_terminal()
}

/// Derive the terminal fingerprint from environment signals. Returns `None`
/// if any required signal is unavailable (e.g. not a terminal).
pub fn capture_fingerprint() -> Option<Fingerprint> {
    if !is_in_terminal() {
        return None;
    }

    let tty_path = unistd::ttyname(stdin())
        .ok()?
        .to_string_lossy()
        .into_owned();
    let user = current_user()?;
    let shell = std::env::var("SHELL").ok().filter(|s| !s.is_empty())?;

    Some(Fingerprint {
        tty_path,
        pid: std::process::id(),
        parent_pid: unistd::getppid().as_raw() as u32,
        user,
        shell,
    })
}

/// Snapshot of the terminal-relevant environment.
pub fn capture_environment() -> HashMap<String, String> {
    SNAPSHOT_ENV_VARS
        .iter()
        .filter_map(|&key| std::env::var(key).ok().map(|val| (key.to_string(), val)))
        .collect()
}

nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);

/// Current terminal dimensions, if stdout is a terminal.
pub fn terminal_window_size() -> Option<WindowSize> {
    if !stdout().is_terminal() {
        return None;
    }

    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let res = unsafe { tiocgwinsz(stdout().as_raw_fd(), &mut ws) };
    match res {
        Ok(_) if ws.ws_col > 0 && ws.ws_row > 0 => Some(WindowSize {
            columns: ws.ws_col,
            rows: ws.ws_row,
        }),
        _ => None,
    }
}

fn current_user() -> Option<String> {
    if let Ok(user) = std::env::var("USER") {
        if !user.is_empty() {
            return Some(user);
        }
    }

    unistd::User::from_uid(unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
}
