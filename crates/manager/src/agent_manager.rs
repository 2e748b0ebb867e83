//! Agent manager: the provisioning saga and its mirror teardown
//!
//! A provisioning attempt either ends fully materialized and recorded in the
//! CLI-local registry, or ends with every external resource it created rolled
//! back. Teardown is the best-effort mirror: every independent cleanup action
//! is attempted, failures are collected, and the registry record survives a
//! failed teardown so it can be retried.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use agentmux_core::{
    Agent, AgentRecord, AgentRegistry, AgentStatus, Config, CreateAgentRequest, Error,
    PortAllocator, Result,
};
use agentmux_docker::{ComposeRuntime, ContainerStatus, IsolationMode, ManifestParams};
use agentmux_tmux::{TmuxSessions, WindowSpec};
use agentmux_worktree::GitWorkspace;

use crate::providers::{ContainerProvider, SessionProvider, WorkspaceProvider};
use crate::saga::Compensations;

/// Window layout of every agent session
const SESSION_WINDOWS: [&str; 3] = ["main", "shell", "logs"];

/// What teardown removes beyond the session
#[derive(Debug, Clone, Copy)]
pub struct TeardownOptions {
    pub remove_worktree: bool,
    pub remove_container: bool,
}

impl TeardownOptions {
    /// Remove everything the agent owns
    pub fn full() -> Self {
        Self {
            remove_worktree: true,
            remove_container: true,
        }
    }

    /// Kill the session but keep worktree and container
    pub fn session_only() -> Self {
        Self {
            remove_worktree: false,
            remove_container: false,
        }
    }
}

/// A registry record together with its derived liveness
#[derive(Debug, Clone)]
pub struct AgentState {
    pub record: AgentRecord,
    pub status: AgentStatus,
}

/// Orchestrates the three providers and the CLI-local registry.
pub struct AgentManager<W, S, C> {
    config: Config,
    registry: AgentRegistry,
    ports: PortAllocator,
    workspace: Arc<W>,
    sessions: Arc<S>,
    containers: Arc<C>,
    /// Per-agent-id locks serializing create/stop for the same id
    id_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentManager<GitWorkspace, TmuxSessions, ComposeRuntime> {
    /// Open a manager against the real providers
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = AgentRegistry::new(config.registry_path()).await?;
        let ports =
            PortAllocator::new(config.ports_path(), config.port_floor, config.port_ceiling)
                .await?;
        let workspace = GitWorkspace::open(&config.repo_path)
            .await
            .map_err(|e| Error::Workspace(e.to_string()))?;

        Ok(Self::with_providers(
            config,
            registry,
            ports,
            Arc::new(workspace),
            Arc::new(TmuxSessions::new()),
            Arc::new(ComposeRuntime::new()),
        ))
    }
}

impl<W, S, C> AgentManager<W, S, C>
where
    W: WorkspaceProvider,
    S: SessionProvider,
    C: ContainerProvider,
{
    /// Assemble a manager from explicit parts
    pub fn with_providers(
        config: Config,
        registry: AgentRegistry,
        ports: PortAllocator,
        workspace: Arc<W>,
        sessions: Arc<S>,
        containers: Arc<C>,
    ) -> Self {
        Self {
            config,
            registry,
            ports,
            workspace,
            sessions,
            containers,
            id_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run the provisioning saga for one agent.
    ///
    /// Ordered steps, each pushing its compensation after success:
    /// preconditions, branch preparation, worktree creation, context copy
    /// (best-effort), container set (optional), session, registry commit.
    pub async fn create_agent(&self, request: CreateAgentRequest) -> Result<Agent> {
        let lock = self.id_lock(&request.id).await;
        let result = {
            let _guard = lock.lock().await;
            self.create_agent_locked(request).await
        };
        drop(lock);
        self.prune_id_locks().await;
        result
    }

    async fn create_agent_locked(&self, request: CreateAgentRequest) -> Result<Agent> {
        let id = request.id.clone();

        // Step 1: preconditions, no side effects yet
        if id.is_empty() || id.contains(':') || id.contains('/') || id.contains(char::is_whitespace)
        {
            return Err(Error::InvalidInput(format!("invalid agent id: {:?}", id)));
        }
        if self.registry.get(&id).await.is_some() {
            return Err(Error::AlreadyExists(id));
        }
        if self.registry.len().await >= self.config.max_agents {
            return Err(Error::CapacityExceeded {
                max: self.config.max_agents,
            });
        }

        let branch = request
            .branch
            .clone()
            .unwrap_or_else(|| self.config.branch_for(&id));
        let base = request
            .base_branch
            .clone()
            .unwrap_or_else(|| self.config.base_branch.clone());
        let worktree_path = self.config.worktree_path_for(&id);
        let session_name = self.config.session_for(&id);
        // Ports are keyed by project; a standalone agent is its own pool key
        let project_key = request.project_id.clone().unwrap_or_else(|| id.clone());

        info!("Provisioning agent {} on branch {}", id, branch);

        // Step 2: branch preparation. Nothing created yet, nothing to undo.
        self.workspace.ensure_branch(&branch, &base).await?;

        let mut comp = Compensations::new();

        // Step 3: worktree. The branch intentionally stays behind on
        // compensation; branches are cheap and reused on the next attempt.
        self.workspace
            .create_worktree(&worktree_path, &branch, &base)
            .await?;
        {
            let workspace = self.workspace.clone();
            let path = worktree_path.clone();
            comp.push("remove worktree", async move {
                workspace
                    .remove_worktree(&path)
                    .await
                    .map_err(|e| e.to_string())
            });
        }

        // Step 4: context copy. Never fails the saga.
        self.copy_context(&worktree_path).await;

        // Step 5: container set, ports first
        let mut container_ref = None;
        let mut port_range = None;
        if request.use_container {
            let range = match self
                .ports
                .allocate_range(
                    &project_key,
                    Some(&id),
                    "agent",
                    self.config.ports_per_agent,
                    None,
                )
                .await
            {
                Ok(range) => range,
                Err(e) => return Err(self.unwound(e, comp).await),
            };
            port_range = Some(range);
            {
                let ports = self.ports.clone();
                let agent = id.clone();
                comp.push("release ports", async move {
                    ports
                        .release_agent(&agent)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                });
            }

            let params = ManifestParams {
                agent_id: id.clone(),
                workspace_path: worktree_path.clone(),
                port_range,
                isolation: if request.restricted_network {
                    IsolationMode::Restricted
                } else {
                    IsolationMode::Open
                },
                subnet: agentmux_docker::random_subnet(),
            };
            match self.containers.provision(&params).await {
                Ok(reference) => container_ref = Some(reference),
                Err(e) => return Err(self.unwound(e, comp).await),
            }
            {
                let containers = self.containers.clone();
                let agent = id.clone();
                let path = worktree_path.clone();
                comp.push("remove container set", async move {
                    containers
                        .remove(&agent, &path)
                        .await
                        .map_err(|e| e.to_string())
                });
            }
        }

        // Step 6: session
        let windows: Vec<WindowSpec> = SESSION_WINDOWS
            .iter()
            .map(|name| WindowSpec::shell(*name))
            .collect();
        let mut env = HashMap::new();
        env.insert("AGENT_ID".to_string(), id.clone());
        env.insert("AGENT_BRANCH".to_string(), branch.clone());
        if let Some((first, last)) = port_range {
            env.insert("AGENT_PORT_FIRST".to_string(), first.to_string());
            env.insert("AGENT_PORT_LAST".to_string(), last.to_string());
        }
        if let Err(e) = self
            .sessions
            .create_session(&session_name, &worktree_path, &windows, &env)
            .await
        {
            return Err(self.unwound(e, comp).await);
        }
        {
            let sessions = self.sessions.clone();
            let name = session_name.clone();
            comp.push("kill session", async move {
                sessions.kill(&name).await.map_err(|e| e.to_string())
            });
        }

        // Step 7: registry commit
        let record = AgentRecord {
            id: id.clone(),
            branch: branch.clone(),
            worktree_path: worktree_path.clone(),
            session_name: session_name.clone(),
        };
        if let Err(e) = self.registry.create_if_absent(record).await {
            return Err(self.unwound(e, comp).await);
        }
        comp.dismiss();

        info!("Provisioned agent {}", id);
        Ok(Agent {
            id,
            branch,
            workspace_path: worktree_path,
            session_name,
            status: AgentStatus::Running,
            created_at: Utc::now(),
            updated_at: None,
            project_id: request.project_id,
            uses_container: request.use_container,
            container_ref,
            config: request.config,
        })
    }

    /// Tear an agent down. Every independent cleanup action is attempted;
    /// failures are collected and reported together, and the registry record
    /// is removed only when nothing failed.
    pub async fn stop_agent(&self, id: &str, opts: TeardownOptions) -> Result<()> {
        let lock = self.id_lock(id).await;
        let result = {
            let _guard = lock.lock().await;
            self.stop_agent_locked(id, opts).await
        };
        drop(lock);
        self.prune_id_locks().await;
        result
    }

    async fn stop_agent_locked(&self, id: &str, opts: TeardownOptions) -> Result<()> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("agent {}", id)))?;

        info!("Tearing down agent {}", id);
        let mut errors: Vec<String> = Vec::new();

        match self.sessions.exists(&record.session_name).await {
            Ok(true) => {
                if let Err(e) = self.sessions.kill(&record.session_name).await {
                    errors.push(format!("kill session: {}", e));
                }
            }
            Ok(false) => {}
            Err(e) => errors.push(format!("probe session: {}", e)),
        }

        if opts.remove_container {
            match self.containers.status(id, &record.worktree_path).await {
                Ok(ContainerStatus::Absent) => {}
                Ok(_) => {
                    if let Err(e) = self.containers.remove(id, &record.worktree_path).await {
                        errors.push(format!("remove container set: {}", e));
                    }
                }
                Err(e) => errors.push(format!("probe container: {}", e)),
            }
            if let Err(e) = self.ports.release_agent(id).await {
                errors.push(format!("release ports: {}", e));
            }
        }

        if opts.remove_worktree {
            match self.workspace.worktree_exists(&record.worktree_path).await {
                Ok(true) => {
                    if let Err(e) = self.workspace.remove_worktree(&record.worktree_path).await {
                        errors.push(format!("remove worktree: {}", e));
                    }
                }
                Ok(false) => {}
                Err(e) => errors.push(format!("probe worktree: {}", e)),
            }
        }

        if errors.is_empty() {
            self.registry.remove(id).await?;
            info!("Agent {} torn down", id);
            Ok(())
        } else {
            Err(Error::PartialCleanup(errors))
        }
    }

    /// Tear down every registered agent. Per-agent failures are aggregated;
    /// a failed agent keeps its registry record for retry, and the registry
    /// file is cleared only when every agent was removed.
    pub async fn cleanup_all(&self, opts: TeardownOptions) -> Result<()> {
        let records = self.registry.list().await;
        let mut failures = Vec::new();

        for record in &records {
            if let Err(e) = self.stop_agent(&record.id, opts).await {
                failures.push(format!("agent {}: {}", record.id, e));
            }
        }

        if failures.is_empty() {
            self.registry.clear().await?;
            Ok(())
        } else {
            Err(Error::PartialCleanup(failures))
        }
    }

    /// All registered agents with status derived by probing the session
    /// provider.
    pub async fn list_agents(&self) -> Result<Vec<AgentState>> {
        let mut agents = Vec::new();
        for record in self.registry.list().await {
            let status = self.derive_status(&record).await;
            agents.push(AgentState { record, status });
        }
        Ok(agents)
    }

    /// One agent with freshly derived status
    pub async fn get_agent(&self, id: &str) -> Result<AgentState> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("agent {}", id)))?;
        let status = self.derive_status(&record).await;
        Ok(AgentState { record, status })
    }

    /// Run a command inside the agent's container set
    pub async fn exec(&self, id: &str, argv: &[&str]) -> Result<String> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("agent {}", id)))?;
        self.containers.exec(id, &record.worktree_path, argv).await
    }

    async fn derive_status(&self, record: &AgentRecord) -> AgentStatus {
        match self.sessions.exists(&record.session_name).await {
            Ok(true) => AgentStatus::Running,
            Ok(false) => AgentStatus::Stopped,
            Err(e) => {
                warn!("Probing session {} failed: {}", record.session_name, e);
                AgentStatus::Error
            }
        }
    }

    async fn unwound(&self, err: Error, comp: Compensations) -> Error {
        err.with_compensation_failures(comp.unwind().await)
    }

    async fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.id_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop lock entries nobody holds anymore; the map would otherwise grow
    /// with every agent id ever seen
    async fn prune_id_locks(&self) {
        let mut locks = self.id_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    async fn id_lock_count(&self) -> usize {
        self.id_locks.lock().await.len()
    }

    /// Copy operator context files into a fresh worktree. Failures are
    /// logged and swallowed; this step never fails the saga.
    async fn copy_context(&self, worktree: &Path) {
        for source in &self.config.context_paths {
            let Some(name) = source.file_name() else {
                warn!("Skipping context path without file name: {:?}", source);
                continue;
            };
            if let Err(e) = copy_recursive(source, &worktree.join(name)).await {
                warn!("Skipping context copy of {:?}: {}", source, e);
            }
        }
    }
}

fn copy_recursive<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let metadata = tokio::fs::metadata(src).await?;
        if metadata.is_dir() {
            tokio::fs::create_dir_all(dst).await?;
            let mut entries = tokio::fs::read_dir(src).await?;
            while let Some(entry) = entries.next_entry().await? {
                copy_recursive(&entry.path(), &dst.join(entry.file_name())).await?;
            }
        } else {
            tokio::fs::copy(src, dst).await?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{init_test_tracing, FakeContainers, FakeSessions, FakeWorkspace, UnboundProbe};
    use tempfile::TempDir;

    struct Harness {
        manager: AgentManager<FakeWorkspace, FakeSessions, FakeContainers>,
        workspace: Arc<FakeWorkspace>,
        sessions: Arc<FakeSessions>,
        containers: Arc<FakeContainers>,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        harness_with(|_| {}).await
    }

    async fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
        init_test_tracing();
        let dir = TempDir::new().unwrap();
        let mut config = Config::default_for(dir.path());
        config.ports_per_agent = 5;
        tweak(&mut config);

        let registry = AgentRegistry::new(config.registry_path()).await.unwrap();
        let ports = PortAllocator::with_probe(
            config.ports_path(),
            config.port_floor,
            config.port_ceiling,
            Arc::new(UnboundProbe),
        )
        .await
        .unwrap();

        let workspace = Arc::new(FakeWorkspace::default());
        let sessions = Arc::new(FakeSessions::default());
        let containers = Arc::new(FakeContainers::default());

        let manager = AgentManager::with_providers(
            config,
            registry,
            ports,
            workspace.clone(),
            sessions.clone(),
            containers.clone(),
        );

        Harness {
            manager,
            workspace,
            sessions,
            containers,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_create_agent_success_path() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1").with_container())
            .await
            .unwrap();

        assert_eq!(agent.status, AgentStatus::Running);
        assert_eq!(agent.container_ref.as_deref(), Some("amx-a1"));

        // Worktree, branch, session, container set and registry record all
        // exist
        assert!(h.workspace.has_branch("agent/a1"));
        assert!(h.workspace.has_worktree(&agent.workspace_path));
        assert!(h.sessions.has(&agent.session_name));
        assert!(h.containers.is_running("a1"));
        assert_eq!(h.manager.registry().len().await, 1);

        // The reserved range was recorded before use
        let allocations = h.manager.ports().list().await;
        assert_eq!(allocations.len(), 5);
        assert!(allocations
            .iter()
            .all(|a| a.agent_id.as_deref() == Some("a1")));

        // The rendered manifest got the reserved range
        let manifest = h.containers.manifest_for("a1").unwrap();
        assert_eq!(manifest.port_range, Some((3000, 3004)));
    }

    #[tokio::test]
    async fn test_worktree_failure_aborts_with_nothing_to_undo() {
        let h = harness().await;
        h.workspace.fail_create();

        let result = h
            .manager
            .create_agent(CreateAgentRequest::new("a1").with_container())
            .await;
        assert!(matches!(result, Err(Error::Workspace(_))));

        // The branch may remain; no worktree, session, ports or record do
        assert_eq!(h.workspace.worktree_count(), 0);
        assert!(h.sessions.is_empty());
        assert!(h.manager.ports().list().await.is_empty());
        assert_eq!(h.manager.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_create_agent_without_container_allocates_no_ports() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"))
            .await
            .unwrap();

        assert!(agent.container_ref.is_none());
        assert!(h.manager.ports().list().await.is_empty());
        assert!(!h.containers.is_running("a1"));
    }

    #[tokio::test]
    async fn test_container_failure_rolls_back_everything() {
        let h = harness().await;
        h.containers.fail_provision();

        let result = h
            .manager
            .create_agent(CreateAgentRequest::new("a1").with_container())
            .await;
        assert!(matches!(result, Err(Error::Container(_))));

        // No worktree, no session, no registry record, no ports
        assert!(h.workspace.worktree_count() == 0);
        assert!(h.sessions.is_empty());
        assert_eq!(h.manager.registry().len().await, 0);
        assert!(h.manager.ports().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_failure_rolls_back_container_and_worktree() {
        let h = harness().await;
        h.sessions.fail_create();

        let result = h
            .manager
            .create_agent(CreateAgentRequest::new("a1").with_container())
            .await;
        assert!(matches!(result, Err(Error::Session(_))));

        assert!(!h.containers.is_running("a1"));
        assert!(h.workspace.worktree_count() == 0);
        assert!(h.manager.ports().list().await.is_empty());
        assert_eq!(h.manager.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_compensation_failure_appends_to_original_error() {
        let h = harness().await;
        h.sessions.fail_create();
        h.workspace.fail_remove();

        let err = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("forced session failure"));
        assert!(message.contains("remove worktree"));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let h = harness().await;
        h.manager
            .create_agent(CreateAgentRequest::new("a1"))
            .await
            .unwrap();

        let result = h.manager.create_agent(CreateAgentRequest::new("a1")).await;
        assert!(matches!(result, Err(Error::AlreadyExists(id)) if id == "a1"));
    }

    #[tokio::test]
    async fn test_concurrent_create_same_id_commits_once() {
        let h = harness().await;
        let manager = Arc::new(h.manager);

        let (ra, rb) = tokio::join!(
            manager.create_agent(CreateAgentRequest::new("a1")),
            manager.create_agent(CreateAgentRequest::new("a1")),
        );
        assert!(ra.is_ok() ^ rb.is_ok());
        assert_eq!(manager.registry().len().await, 1);
        assert_eq!(h.workspace.worktree_count(), 1);
    }

    #[tokio::test]
    async fn test_id_locks_pruned_after_use() {
        let h = harness().await;
        for id in ["a1", "a2"] {
            h.manager
                .create_agent(CreateAgentRequest::new(id))
                .await
                .unwrap();
        }
        assert_eq!(h.manager.id_lock_count().await, 0);

        h.manager
            .stop_agent("a1", TeardownOptions::full())
            .await
            .unwrap();
        assert_eq!(h.manager.id_lock_count().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let h = harness_with(|c| c.max_agents = 1).await;
        h.manager
            .create_agent(CreateAgentRequest::new("a1"))
            .await
            .unwrap();

        let result = h.manager.create_agent(CreateAgentRequest::new("a2")).await;
        assert!(matches!(result, Err(Error::CapacityExceeded { max: 1 })));
        // Precondition failures leave no trace
        assert_eq!(h.workspace.worktree_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_id_rejected_before_side_effects() {
        let h = harness().await;
        for bad in ["", "a:1", "a/1", "a 1"] {
            let result = h.manager.create_agent(CreateAgentRequest::new(bad)).await;
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }
        assert_eq!(h.workspace.worktree_count(), 0);
    }

    #[tokio::test]
    async fn test_context_copy_is_best_effort() {
        let dir = TempDir::new().unwrap();
        let context_file = dir.path().join("NOTES.md");
        tokio::fs::write(&context_file, "operator notes")
            .await
            .unwrap();
        let missing = dir.path().join("does-not-exist");

        let h = harness_with(|c| c.context_paths = vec![context_file.clone(), missing]).await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"))
            .await
            .unwrap();

        // The existing file landed in the worktree; the missing one was
        // logged and skipped without failing the saga
        let copied = agent.workspace_path.join("NOTES.md");
        assert_eq!(
            tokio::fs::read_to_string(&copied).await.unwrap(),
            "operator notes"
        );
    }

    #[tokio::test]
    async fn test_stop_agent_full_teardown() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1").with_container())
            .await
            .unwrap();

        h.manager
            .stop_agent("a1", TeardownOptions::full())
            .await
            .unwrap();

        assert!(!h.sessions.has(&agent.session_name));
        assert!(!h.containers.is_running("a1"));
        assert_eq!(h.workspace.worktree_count(), 0);
        assert!(h.manager.ports().list().await.is_empty());
        assert_eq!(h.manager.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_stop_agent_session_only_keeps_resources() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1").with_container())
            .await
            .unwrap();

        h.manager
            .stop_agent("a1", TeardownOptions::session_only())
            .await
            .unwrap();

        assert!(!h.sessions.has(&agent.session_name));
        assert!(h.containers.is_running("a1"));
        assert!(h.workspace.has_worktree(&agent.workspace_path));
        assert_eq!(h.manager.ports().list().await.len(), 5);
        // The registry record is still removed; the agent is gone, its
        // resources were deliberately kept
        assert_eq!(h.manager.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_stop_missing_agent() {
        let h = harness().await;
        let result = h.manager.stop_agent("ghost", TeardownOptions::full()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_teardown_keeps_record_for_retry() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"))
            .await
            .unwrap();

        h.sessions.fail_kill(&agent.session_name);
        let result = h.manager.stop_agent("a1", TeardownOptions::full()).await;
        assert!(matches!(result, Err(Error::PartialCleanup(_))));
        assert!(h.manager.registry().get("a1").await.is_some());

        // Retry succeeds once the provider recovers
        h.sessions.clear_failures();
        h.manager
            .stop_agent("a1", TeardownOptions::full())
            .await
            .unwrap();
        assert!(h.manager.registry().get("a1").await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_all_partial_failure_names_the_agent() {
        let h = harness().await;
        for id in ["a1", "a2", "a3"] {
            h.manager
                .create_agent(CreateAgentRequest::new(id))
                .await
                .unwrap();
        }

        // a2's session refuses to die
        h.sessions.fail_kill(&h.manager.config().session_for("a2"));

        let err = h
            .manager
            .cleanup_all(TeardownOptions::full())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("agent a2"));

        // Exactly the failed agent's record survives
        let remaining = h.manager.registry().list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "a2");
    }

    #[tokio::test]
    async fn test_cleanup_all_empty_registry_is_noop() {
        let h = harness().await;
        h.manager.cleanup_all(TeardownOptions::full()).await.unwrap();
        assert_eq!(h.manager.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_status_derived_from_session_probe() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"))
            .await
            .unwrap();

        assert_eq!(
            h.manager.get_agent("a1").await.unwrap().status,
            AgentStatus::Running
        );

        // The session dies behind the manager's back; the record stays and
        // the status flips on the next read
        h.sessions.drop_session(&agent.session_name);
        assert_eq!(
            h.manager.get_agent("a1").await.unwrap().status,
            AgentStatus::Stopped
        );

        let listed = h.manager.list_agents().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, AgentStatus::Stopped);
    }
}
