//! Agent provisioning and dual-registry reconciliation
//!
//! This crate orchestrates agent lifecycles across the three leaf providers
//! (git worktrees, tmux sessions, docker compose sandboxes):
//! - `AgentManager` runs the provisioning saga with ordered compensation and
//!   the best-effort teardown, backed by the CLI-local line-file registry.
//! - `DurableAgentManager` mirrors every mutation into a SQLite store and
//!   reconciles status drift between the two registries on every read.

pub mod agent_manager;
pub mod providers;
pub mod reconciler;
pub mod saga;
pub mod store;

pub use agent_manager::{AgentManager, AgentState, TeardownOptions};
pub use providers::{ContainerProvider, SessionProvider, WorkspaceProvider, WorktreeSummary};
pub use reconciler::DurableAgentManager;
pub use store::SqliteStore;

#[cfg(test)]
pub(crate) mod fakes;
