//! Tmux session provisioning
//!
//! Wraps the `tmux` binary to create, probe, kill and attach to the named
//! sessions that back agent workspaces. Each session is rooted at the agent's
//! worktree and carries a fixed set of named windows.

mod commands;
mod error;
mod sessions;

pub use error::{Result, TmuxError};
pub use sessions::{TmuxSessions, WindowSpec};
