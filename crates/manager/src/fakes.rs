//! In-memory provider fakes for manager tests

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use agentmux_core::port::PortProbe;
use agentmux_core::{Error, Result};
use agentmux_docker::{ContainerStatus, ManifestParams};
use agentmux_tmux::WindowSpec;

use crate::providers::{
    ContainerProvider, SessionProvider, WorkspaceProvider, WorktreeSummary,
};

/// Install an env-filtered subscriber writing into the test capture.
/// Safe to call from every test; only the first call wins.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Host probe that reports every port as free
pub struct UnboundProbe;

impl PortProbe for UnboundProbe {
    fn is_bound(&self, _port: u16) -> bool {
        false
    }
}

#[derive(Default)]
pub struct FakeWorkspace {
    branches: Mutex<HashSet<String>>,
    worktrees: Mutex<HashMap<PathBuf, String>>,
    fail_create: Mutex<bool>,
    fail_remove: Mutex<bool>,
}

impl FakeWorkspace {
    pub fn fail_create(&self) {
        *self.fail_create.lock().unwrap() = true;
    }

    pub fn fail_remove(&self) {
        *self.fail_remove.lock().unwrap() = true;
    }

    pub fn has_worktree(&self, path: &Path) -> bool {
        self.worktrees.lock().unwrap().contains_key(path)
    }

    pub fn worktree_count(&self) -> usize {
        self.worktrees.lock().unwrap().len()
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.branches.lock().unwrap().contains(branch)
    }
}

#[async_trait]
impl WorkspaceProvider for FakeWorkspace {
    async fn ensure_branch(&self, branch: &str, _base: &str) -> Result<()> {
        self.branches.lock().unwrap().insert(branch.to_string());
        Ok(())
    }

    async fn create_worktree(&self, path: &Path, branch: &str, _base: &str) -> Result<()> {
        if *self.fail_create.lock().unwrap() {
            return Err(Error::Workspace("forced worktree failure".to_string()));
        }
        // Materialize the directory so context copies have a target
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Workspace(format!("create dir: {}", e)))?;
        self.worktrees
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<()> {
        if *self.fail_remove.lock().unwrap() {
            return Err(Error::Workspace("forced removal failure".to_string()));
        }
        self.worktrees.lock().unwrap().remove(path);
        Ok(())
    }

    async fn worktree_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.worktrees.lock().unwrap().contains_key(path))
    }

    async fn list_worktrees(&self) -> Result<Vec<WorktreeSummary>> {
        Ok(self
            .worktrees
            .lock()
            .unwrap()
            .iter()
            .map(|(path, branch)| WorktreeSummary {
                path: path.clone(),
                branch: branch.clone(),
                head: "HEAD".to_string(),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeSessions {
    sessions: Mutex<HashSet<String>>,
    fail_create: Mutex<bool>,
    fail_kill_for: Mutex<HashSet<String>>,
}

impl FakeSessions {
    pub fn fail_create(&self) {
        *self.fail_create.lock().unwrap() = true;
    }

    pub fn fail_kill(&self, name: &str) {
        self.fail_kill_for.lock().unwrap().insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        *self.fail_create.lock().unwrap() = false;
        self.fail_kill_for.lock().unwrap().clear();
    }

    pub fn has(&self, name: &str) -> bool {
        self.sessions.lock().unwrap().contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    /// Simulate a session dying outside the manager
    pub fn drop_session(&self, name: &str) {
        self.sessions.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl SessionProvider for FakeSessions {
    async fn create_session(
        &self,
        name: &str,
        _work_dir: &Path,
        _windows: &[WindowSpec],
        _env: &HashMap<String, String>,
    ) -> Result<()> {
        if *self.fail_create.lock().unwrap() {
            return Err(Error::Session("forced session failure".to_string()));
        }
        let mut sessions = self.sessions.lock().unwrap();
        if !sessions.insert(name.to_string()) {
            return Err(Error::Session(format!("session {} already exists", name)));
        }
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.sessions.lock().unwrap().contains(name))
    }

    async fn kill(&self, name: &str) -> Result<()> {
        if self.fail_kill_for.lock().unwrap().contains(name) {
            return Err(Error::Session("forced kill failure".to_string()));
        }
        if !self.sessions.lock().unwrap().remove(name) {
            return Err(Error::Session(format!("session {} not found", name)));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.sessions.lock().unwrap().iter().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[derive(Default)]
pub struct FakeContainers {
    running: Mutex<HashMap<String, PathBuf>>,
    manifests: Mutex<Vec<ManifestParams>>,
    fail_provision: Mutex<bool>,
    fail_remove: Mutex<bool>,
}

impl FakeContainers {
    pub fn fail_provision(&self) {
        *self.fail_provision.lock().unwrap() = true;
    }

    pub fn fail_remove(&self) {
        *self.fail_remove.lock().unwrap() = true;
    }

    pub fn is_running(&self, agent_id: &str) -> bool {
        self.running.lock().unwrap().contains_key(agent_id)
    }

    pub fn manifest_for(&self, agent_id: &str) -> Option<ManifestParams> {
        self.manifests
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.agent_id == agent_id)
            .cloned()
    }
}

#[async_trait]
impl ContainerProvider for FakeContainers {
    async fn provision(&self, params: &ManifestParams) -> Result<String> {
        if *self.fail_provision.lock().unwrap() {
            return Err(Error::Container("forced provision failure".to_string()));
        }
        self.manifests.lock().unwrap().push(params.clone());
        self.running
            .lock()
            .unwrap()
            .insert(params.agent_id.clone(), params.workspace_path.clone());
        Ok(params.compose_project())
    }

    async fn down(&self, _agent_id: &str, _workspace: &Path) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, agent_id: &str, _workspace: &Path) -> Result<()> {
        if *self.fail_remove.lock().unwrap() {
            return Err(Error::Container("forced container removal".to_string()));
        }
        self.running.lock().unwrap().remove(agent_id);
        Ok(())
    }

    async fn exec(&self, agent_id: &str, _workspace: &Path, argv: &[&str]) -> Result<String> {
        if !self.is_running(agent_id) {
            return Err(Error::Container(format!(
                "no container set for {}",
                agent_id
            )));
        }
        Ok(argv.join(" "))
    }

    async fn status(&self, agent_id: &str, _workspace: &Path) -> Result<ContainerStatus> {
        if self.is_running(agent_id) {
            Ok(ContainerStatus::Running)
        } else {
            Ok(ContainerStatus::Absent)
        }
    }
}
