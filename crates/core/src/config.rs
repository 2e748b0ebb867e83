//! Configuration for the agent workspace manager
//!
//! The configuration is an explicitly constructed value passed into each
//! component constructor. There is no global singleton; tests build their own
//! `Config` against temp directories.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

/// Configuration shared by the registry, port allocator and agent manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the main repository agents are provisioned against
    pub repo_path: PathBuf,

    /// Directory holding the registry file, port allocation file and the
    /// durable store
    pub data_dir: PathBuf,

    /// Directory where worktrees are created (relative to the repository root)
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: String,

    /// Prefix for agent branch names
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Prefix for tmux session names
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,

    /// Branch new agent branches are created off
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Maximum number of registered agents
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Lowest port in the allocation pool
    #[serde(default = "default_port_floor")]
    pub port_floor: u16,

    /// Highest port in the allocation pool (inclusive)
    #[serde(default = "default_port_ceiling")]
    pub port_ceiling: u16,

    /// Number of contiguous ports reserved per containerized agent
    #[serde(default = "default_ports_per_agent")]
    pub ports_per_agent: u16,

    /// Operator context files copied into every new worktree (best-effort)
    #[serde(default)]
    pub context_paths: Vec<PathBuf>,
}

fn default_worktree_dir() -> String {
    ".worktrees".to_string()
}

fn default_branch_prefix() -> String {
    "agent/".to_string()
}

fn default_session_prefix() -> String {
    "amx-".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_max_agents() -> usize {
    16
}

fn default_port_floor() -> u16 {
    3000
}

fn default_port_ceiling() -> u16 {
    3999
}

fn default_ports_per_agent() -> u16 {
    10
}

impl Config {
    /// Create a configuration with defaults for the given repository
    pub fn default_for(repo_path: impl Into<PathBuf>) -> Self {
        let repo_path = repo_path.into();
        let data_dir = repo_path.join(".agentmux");
        Self {
            repo_path,
            data_dir,
            worktree_dir: default_worktree_dir(),
            branch_prefix: default_branch_prefix(),
            session_prefix: default_session_prefix(),
            base_branch: default_base_branch(),
            max_agents: default_max_agents(),
            port_floor: default_port_floor(),
            port_ceiling: default_port_ceiling(),
            ports_per_agent: default_ports_per_agent(),
            context_paths: Vec::new(),
        }
    }

    /// Load configuration from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub async fn load(path: &Path, repo_path: impl Into<PathBuf>) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default_for(repo_path));
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read config file: {}", e)))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate pool bounds and capacity
    pub fn validate(&self) -> Result<()> {
        if self.port_floor > self.port_ceiling {
            return Err(Error::InvalidInput(format!(
                "port_floor {} exceeds port_ceiling {}",
                self.port_floor, self.port_ceiling
            )));
        }
        if self.ports_per_agent == 0 {
            return Err(Error::InvalidInput(
                "ports_per_agent must be at least 1".to_string(),
            ));
        }
        if self.max_agents == 0 {
            return Err(Error::InvalidInput(
                "max_agents must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Full path to the worktrees directory
    pub fn worktrees_path(&self) -> PathBuf {
        self.repo_path.join(&self.worktree_dir)
    }

    /// Worktree path computed for an agent id
    pub fn worktree_path_for(&self, agent_id: &str) -> PathBuf {
        self.worktrees_path().join(agent_id)
    }

    /// Branch name computed for an agent id
    pub fn branch_for(&self, agent_id: &str) -> String {
        format!("{}{}", self.branch_prefix, agent_id)
    }

    /// Session name computed for an agent id
    pub fn session_for(&self, agent_id: &str) -> String {
        format!("{}{}", self.session_prefix, agent_id)
    }

    /// Path to the CLI-local registry file
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("agents")
    }

    /// Path to the port allocation file
    pub fn ports_path(&self) -> PathBuf {
        self.data_dir.join("ports.json")
    }

    /// Path to the durable SQLite store
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("agentmux.db")
    }
}
