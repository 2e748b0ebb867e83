//! Provider seams consumed by the agent manager
//!
//! The manager drives external systems only through these traits; the
//! concrete implementations shell out to git, tmux and docker compose. Tests
//! substitute in-memory fakes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use agentmux_core::{Error, Result};
use agentmux_docker::{ComposeRuntime, ContainerStatus, ManifestParams};
use agentmux_tmux::{TmuxSessions, WindowSpec};
use agentmux_worktree::GitWorkspace;

/// One worktree as reported by the workspace provider
#[derive(Debug, Clone)]
pub struct WorktreeSummary {
    pub path: PathBuf,
    pub branch: String,
    pub head: String,
}

/// Creates and removes branch-bound worktrees
#[async_trait]
pub trait WorkspaceProvider: Send + Sync + 'static {
    async fn ensure_branch(&self, branch: &str, base: &str) -> Result<()>;
    async fn create_worktree(&self, path: &Path, branch: &str, base: &str) -> Result<()>;
    async fn remove_worktree(&self, path: &Path) -> Result<()>;
    async fn worktree_exists(&self, path: &Path) -> Result<bool>;
    async fn list_worktrees(&self) -> Result<Vec<WorktreeSummary>>;
}

/// Creates, probes and kills named terminal sessions
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    async fn create_session(
        &self,
        name: &str,
        work_dir: &Path,
        windows: &[WindowSpec],
        env: &HashMap<String, String>,
    ) -> Result<()>;
    async fn exists(&self, name: &str) -> Result<bool>;
    async fn kill(&self, name: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
}

/// Builds and runs the sandboxed container set of an agent
#[async_trait]
pub trait ContainerProvider: Send + Sync + 'static {
    /// Render the manifest and bring the container set up. Returns the
    /// container reference (compose project name).
    async fn provision(&self, params: &ManifestParams) -> Result<String>;
    async fn down(&self, agent_id: &str, workspace: &Path) -> Result<()>;
    /// Remove the container set together with volumes and local images
    async fn remove(&self, agent_id: &str, workspace: &Path) -> Result<()>;
    async fn exec(&self, agent_id: &str, workspace: &Path, argv: &[&str]) -> Result<String>;
    async fn status(&self, agent_id: &str, workspace: &Path) -> Result<ContainerStatus>;
}

#[async_trait]
impl WorkspaceProvider for GitWorkspace {
    async fn ensure_branch(&self, branch: &str, base: &str) -> Result<()> {
        GitWorkspace::ensure_branch(self, branch, base)
            .await
            .map_err(|e| Error::Workspace(e.to_string()))
    }

    async fn create_worktree(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        GitWorkspace::create_worktree(self, path, branch, base)
            .await
            .map(|_| ())
            .map_err(|e| Error::Workspace(e.to_string()))
    }

    async fn remove_worktree(&self, path: &Path) -> Result<()> {
        GitWorkspace::remove_worktree(self, path, true)
            .await
            .map_err(|e| Error::Workspace(e.to_string()))
    }

    async fn worktree_exists(&self, path: &Path) -> Result<bool> {
        GitWorkspace::worktree_exists(self, path)
            .await
            .map_err(|e| Error::Workspace(e.to_string()))
    }

    async fn list_worktrees(&self) -> Result<Vec<WorktreeSummary>> {
        let worktrees = GitWorkspace::list(self)
            .await
            .map_err(|e| Error::Workspace(e.to_string()))?;
        Ok(worktrees
            .into_iter()
            .map(|wt| WorktreeSummary {
                path: wt.path,
                branch: wt.branch,
                head: wt.head,
            })
            .collect())
    }
}

#[async_trait]
impl SessionProvider for TmuxSessions {
    async fn create_session(
        &self,
        name: &str,
        work_dir: &Path,
        windows: &[WindowSpec],
        env: &HashMap<String, String>,
    ) -> Result<()> {
        TmuxSessions::create_session(self, name, work_dir, windows, env)
            .await
            .map_err(|e| Error::Session(e.to_string()))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        TmuxSessions::exists(self, name)
            .await
            .map_err(|e| Error::Session(e.to_string()))
    }

    async fn kill(&self, name: &str) -> Result<()> {
        TmuxSessions::kill(self, name)
            .await
            .map_err(|e| Error::Session(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        TmuxSessions::list(self)
            .await
            .map_err(|e| Error::Session(e.to_string()))
    }
}

#[async_trait]
impl ContainerProvider for ComposeRuntime {
    async fn provision(&self, params: &ManifestParams) -> Result<String> {
        self.write_manifest(params)
            .await
            .map_err(|e| Error::Container(e.to_string()))?;
        self.build(&params.agent_id, &params.workspace_path)
            .await
            .map_err(|e| Error::Container(e.to_string()))?;
        self.up(&params.agent_id, &params.workspace_path)
            .await
            .map_err(|e| Error::Container(e.to_string()))?;
        Ok(params.compose_project())
    }

    async fn down(&self, agent_id: &str, workspace: &Path) -> Result<()> {
        ComposeRuntime::down(self, agent_id, workspace)
            .await
            .map_err(|e| Error::Container(e.to_string()))
    }

    async fn remove(&self, agent_id: &str, workspace: &Path) -> Result<()> {
        ComposeRuntime::remove(self, agent_id, workspace)
            .await
            .map_err(|e| Error::Container(e.to_string()))
    }

    async fn exec(&self, agent_id: &str, workspace: &Path, argv: &[&str]) -> Result<String> {
        ComposeRuntime::exec(self, agent_id, workspace, argv)
            .await
            .map_err(|e| Error::Container(e.to_string()))
    }

    async fn status(&self, agent_id: &str, workspace: &Path) -> Result<ContainerStatus> {
        ComposeRuntime::status(self, agent_id, workspace)
            .await
            .map_err(|e| Error::Container(e.to_string()))
    }
}
