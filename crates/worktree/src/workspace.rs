//! Workspace provider: worktree lifecycle bound to agent branches

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::commands::{
    branch_exists, create_branch, git_command_checked, is_git_repository, remote_branch_exists,
};
use crate::error::{Result, WorktreeError};

/// One entry from `git worktree list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    /// Absolute path to the worktree
    pub path: PathBuf,
    /// Branch checked out in this worktree
    pub branch: String,
    /// Commit hash at HEAD
    pub head: String,
}

/// Provisions and removes worktrees for agent branches.
///
/// Stateless apart from the repository path; every operation shells out to
/// git and reports the repository's current view.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    repo_path: PathBuf,
}

impl GitWorkspace {
    /// Open the workspace provider for a repository
    pub async fn open(repo_path: impl Into<PathBuf>) -> Result<Self> {
        let repo_path = repo_path.into();

        if !is_git_repository(&repo_path).await? {
            return Err(WorktreeError::NotAGitRepository { path: repo_path });
        }

        Ok(Self { repo_path })
    }

    /// Get the repository path
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Make sure `branch` exists: an existing local or remote branch passes,
    /// otherwise the branch is created off `base`.
    pub async fn ensure_branch(&self, branch: &str, base: &str) -> Result<()> {
        if branch_exists(&self.repo_path, branch).await? {
            debug!("Branch {} already exists", branch);
            return Ok(());
        }
        if remote_branch_exists(&self.repo_path, branch).await? {
            debug!("Branch {} exists on origin", branch);
            return Ok(());
        }

        if !branch_exists(&self.repo_path, base).await? {
            return Err(WorktreeError::BranchNotFound {
                branch: base.to_string(),
            });
        }

        info!("Creating branch {} off {}", branch, base);
        create_branch(&self.repo_path, branch, base).await
    }

    /// Materialize a worktree for `branch` at the given path, creating the
    /// branch off `base` when it does not exist yet.
    pub async fn create_worktree(
        &self,
        path: &Path,
        branch: &str,
        base: &str,
    ) -> Result<WorktreeInfo> {
        if path.exists() {
            return Err(WorktreeError::WorktreeExists {
                path: path.to_path_buf(),
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path_str = path.to_string_lossy();
        info!("Creating worktree at {:?} for branch {}", path, branch);

        if branch_exists(&self.repo_path, branch).await? {
            git_command_checked(&self.repo_path, &["worktree", "add", &path_str, branch]).await?;
        } else {
            if !branch_exists(&self.repo_path, base).await? {
                return Err(WorktreeError::BranchNotFound {
                    branch: base.to_string(),
                });
            }
            git_command_checked(
                &self.repo_path,
                &["worktree", "add", "-b", branch, &path_str, base],
            )
            .await?;
        }

        let head = git_command_checked(path, &["rev-parse", "HEAD"]).await?;

        Ok(WorktreeInfo {
            path: path.to_path_buf(),
            branch: branch.to_string(),
            head: head.trim().to_string(),
        })
    }

    /// Remove the worktree at the given path. The branch is left in place;
    /// branches are cheap and reused on re-provisioning.
    pub async fn remove_worktree(&self, path: &Path, force: bool) -> Result<()> {
        if self.find(path).await?.is_none() {
            return Err(WorktreeError::WorktreeNotFound {
                path: path.to_path_buf(),
            });
        }

        info!("Removing worktree at {:?}", path);

        let path_str = path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        git_command_checked(&self.repo_path, &args).await?;

        // Drop any stale administrative entries as well
        git_command_checked(&self.repo_path, &["worktree", "prune"]).await?;
        Ok(())
    }

    /// Whether a worktree is registered at the given path
    pub async fn worktree_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.find(path).await?.is_some())
    }

    /// List all worktrees, the main checkout excluded
    pub async fn list(&self) -> Result<Vec<WorktreeInfo>> {
        let output =
            git_command_checked(&self.repo_path, &["worktree", "list", "--porcelain"]).await?;

        let mut worktrees = Vec::new();
        let mut current: Option<WorktreeInfo> = None;

        for line in output.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(wt) = current.take() {
                    worktrees.push(wt);
                }
                current = Some(WorktreeInfo {
                    path: PathBuf::from(path),
                    branch: String::new(),
                    head: String::new(),
                });
            } else if let Some(ref mut wt) = current {
                if let Some(head) = line.strip_prefix("HEAD ") {
                    wt.head = head.to_string();
                } else if let Some(branch) = line.strip_prefix("branch ") {
                    wt.branch = branch.trim_start_matches("refs/heads/").to_string();
                }
            }
        }
        if let Some(wt) = current {
            worktrees.push(wt);
        }

        // The first porcelain entry is the main checkout, not an agent worktree
        if !worktrees.is_empty() {
            worktrees.remove(0);
        }

        Ok(worktrees)
    }

    async fn find(&self, path: &Path) -> Result<Option<WorktreeInfo>> {
        let worktrees = self.list().await?;
        let canonical = tokio::fs::canonicalize(path).await.ok();
        Ok(worktrees.into_iter().find(|wt| {
            wt.path == path || canonical.as_deref().is_some_and(|c| wt.path == c)
        }))
    }
}
