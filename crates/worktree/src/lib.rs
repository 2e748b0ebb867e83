//! Git worktree provisioning
//!
//! This crate wraps the `git` binary to create and remove branch-bound
//! worktrees, giving each agent an isolated checkout of the repository.

mod commands;
mod error;
mod workspace;

pub use error::{Result, WorktreeError};
pub use workspace::{GitWorkspace, WorktreeInfo};
