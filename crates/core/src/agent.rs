//! Agent model definitions

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of an agent as derived from its tmux session (CLI-local registry)
/// or stored and refreshed by the reconciler (durable store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// The agent's session exists
    Running,
    /// The agent is registered but its session is gone
    Stopped,
    /// The agent's external resources are in an inconsistent state
    Error,
}

impl AgentStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Parse a status stored in the durable store
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

/// An Agent is one provisioned workspace unit: a branch plus worktree, a tmux
/// session, and optionally a sandboxed container set with a reserved port
/// range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier
    pub id: String,

    /// Branch the agent works on
    pub branch: String,

    /// Absolute path to the agent's worktree
    pub workspace_path: PathBuf,

    /// Name of the agent's tmux session
    pub session_name: String,

    /// Current liveness
    pub status: AgentStatus,

    /// Timestamp when the agent was provisioned
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last mutation (status refresh, reassignment)
    pub updated_at: Option<DateTime<Utc>>,

    /// Project this agent belongs to, if any
    pub project_id: Option<String>,

    /// Whether the agent runs inside a container set
    pub uses_container: bool,

    /// Compose project name of the container set, if any
    pub container_ref: Option<String>,

    /// Free-form agent configuration
    pub config: Option<HashMap<String, String>>,
}

/// Request to provision a new agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentRequest {
    /// Agent identifier; must be unique within the registry
    pub id: String,

    /// Branch to work on; computed from the id when absent
    pub branch: Option<String>,

    /// Base branch; falls back to the configured default
    pub base_branch: Option<String>,

    /// Provision a sandboxed container set for this agent
    #[serde(default)]
    pub use_container: bool,

    /// Restrict container networking to the private subnet
    #[serde(default)]
    pub restricted_network: bool,

    /// Project this agent is provisioned under, if any
    pub project_id: Option<String>,

    /// Free-form agent configuration
    pub config: Option<HashMap<String, String>>,
}

impl CreateAgentRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            branch: None,
            base_branch: None,
            use_container: false,
            restricted_network: false,
            project_id: None,
            config: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_container(mut self) -> Self {
        self.use_container = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [AgentStatus::Running, AgentStatus::Stopped, AgentStatus::Error] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("paused"), None);
    }

    #[test]
    fn test_request_builders() {
        let request = CreateAgentRequest::new("a1")
            .with_branch("feature/x")
            .with_container();
        assert_eq!(request.id, "a1");
        assert_eq!(request.branch.as_deref(), Some("feature/x"));
        assert!(request.use_container);
        assert!(!request.restricted_network);
    }
}
