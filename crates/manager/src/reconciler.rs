//! Dual-registry reconciliation
//!
//! `DurableAgentManager` layers the SQLite store over the saga-backed
//! manager. Provisioning commits to the durable store only after the saga
//! succeeds; a failed durable write tears the freshly provisioned agent back
//! down. Reads reconcile the stored status against the live one derived from
//! the session probe and persist the correction.

use chrono::Utc;
use tracing::{info, warn};

use agentmux_core::{
    Agent, AgentStatus, Config, CreateAgentRequest, Error, Project, Result,
};
use agentmux_docker::ComposeRuntime;
use agentmux_tmux::TmuxSessions;
use agentmux_worktree::GitWorkspace;

use crate::agent_manager::{AgentManager, TeardownOptions};
use crate::providers::{ContainerProvider, SessionProvider, WorkspaceProvider};
use crate::store::SqliteStore;

pub struct DurableAgentManager<W, S, C> {
    inner: AgentManager<W, S, C>,
    store: SqliteStore,
}

impl DurableAgentManager<GitWorkspace, TmuxSessions, ComposeRuntime> {
    /// Open against the real providers and the database under the data dir
    pub async fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config.store_path())?;
        let inner = AgentManager::open(config).await?;
        Ok(Self { inner, store })
    }
}

impl<W, S, C> DurableAgentManager<W, S, C>
where
    W: WorkspaceProvider,
    S: SessionProvider,
    C: ContainerProvider,
{
    pub fn new(inner: AgentManager<W, S, C>, store: SqliteStore) -> Self {
        Self { inner, store }
    }

    pub fn inner(&self) -> &AgentManager<W, S, C> {
        &self.inner
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn create_project(&self, project: &Project) -> Result<()> {
        self.store.create_project(project)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.store.get_project(id)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.store.list_projects()
    }

    /// Delete a project. Rejected while it still owns agents.
    pub fn delete_project(&self, id: &str) -> Result<()> {
        self.store.delete_project(id)
    }

    /// Provision an agent under a project.
    ///
    /// The saga runs first; the durable row is written only once every
    /// resource exists. If the durable write fails, the agent is torn back
    /// down so neither registry keeps a half-committed entry.
    pub async fn create_agent(
        &self,
        mut request: CreateAgentRequest,
        project_id: &str,
    ) -> Result<Agent> {
        if self.store.get_project(project_id)?.is_none() {
            return Err(Error::NotFound(format!("project {}", project_id)));
        }
        request.project_id = Some(project_id.to_string());

        let agent = self.inner.create_agent(request).await?;

        if let Err(store_err) = self.store.commit_agent(&agent, project_id) {
            warn!(
                "Durable write for agent {} failed, tearing back down: {}",
                agent.id, store_err
            );
            return match self
                .inner
                .stop_agent(&agent.id, TeardownOptions::full())
                .await
            {
                Ok(()) => Err(store_err),
                Err(teardown_err) => {
                    Err(store_err.with_compensation_failures(vec![teardown_err.to_string()]))
                }
            };
        }

        info!("Agent {} committed under project {}", agent.id, project_id);
        Ok(agent)
    }

    /// Tear an agent down and drop it from both registries. The durable row
    /// is only removed after the teardown fully succeeded, so a partial
    /// cleanup stays visible and retryable.
    pub async fn delete_agent(&self, id: &str, opts: TeardownOptions) -> Result<()> {
        // Drift: a durable row may outlive its CLI-local record (the same
        // divergence reads reconcile to Stopped). Nothing left to tear down
        // then; the durable row must still be deletable.
        let locally_known = match self.inner.stop_agent(id, opts).await {
            Ok(()) => true,
            Err(Error::NotFound(_)) => {
                warn!("Agent {} missing from the local registry", id);
                false
            }
            Err(e) => return Err(e),
        };

        match self.store.remove_agent(id) {
            Ok(()) => Ok(()),
            // The reverse drift: torn down locally, never durably recorded
            Err(Error::NotFound(_)) if locally_known => {
                warn!("Agent {} had no durable row", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The durable view of one agent, with status reconciled against the
    /// live session probe.
    pub async fn get_agent(&self, id: &str) -> Result<Agent> {
        let agent = self
            .store
            .get_agent(id)?
            .ok_or_else(|| Error::NotFound(format!("agent {}", id)))?;
        self.reconciled(agent).await
    }

    /// All durable agents, statuses reconciled on the way out
    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut agents = Vec::new();
        for agent in self.store.list_agents()? {
            agents.push(self.reconciled(agent).await?);
        }
        Ok(agents)
    }

    async fn reconciled(&self, mut agent: Agent) -> Result<Agent> {
        let live = match self.inner.get_agent(&agent.id).await {
            Ok(state) => state.status,
            // Gone from the CLI-local registry entirely: not running
            Err(Error::NotFound(_)) => AgentStatus::Stopped,
            Err(e) => return Err(e),
        };

        if live != agent.status {
            info!(
                "Reconciling agent {} status {} -> {}",
                agent.id,
                agent.status.as_str(),
                live.as_str()
            );
            self.store.update_agent_status(&agent.id, live)?;
            agent.status = live;
            agent.updated_at = Some(Utc::now());
        }
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{init_test_tracing, FakeContainers, FakeSessions, FakeWorkspace, UnboundProbe};
    use agentmux_core::{AgentRegistry, PortAllocator};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Harness {
        manager: DurableAgentManager<FakeWorkspace, FakeSessions, FakeContainers>,
        sessions: Arc<FakeSessions>,
        workspace: Arc<FakeWorkspace>,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        init_test_tracing();
        let dir = TempDir::new().unwrap();
        let mut config = Config::default_for(dir.path());
        config.ports_per_agent = 5;

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

        let inner = AgentManager::with_providers(
            config,
            registry,
            ports,
            workspace.clone(),
            sessions.clone(),
            containers,
        );
        let manager = DurableAgentManager::new(inner, SqliteStore::in_memory().unwrap());
        manager
            .create_project(&Project::with_id("p1", dir.path()))
            .unwrap();

        Harness {
            manager,
            sessions,
            workspace,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_create_agent_requires_project() {
        let h = harness().await;
        let result = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"), "ghost")
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        // The saga never ran
        assert_eq!(h.workspace.worktree_count(), 0);
    }

    #[tokio::test]
    async fn test_create_agent_commits_to_both_registries() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"), "p1")
            .await
            .unwrap();

        assert_eq!(agent.project_id.as_deref(), Some("p1"));
        assert_eq!(h.manager.inner().registry().len().await, 1);

        let stored = h.manager.store().get_agent("a1").unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Running);
        assert_eq!(
            h.manager.get_project("p1").unwrap().unwrap().agents,
            vec!["a1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_durable_write_tears_the_agent_back_down() {
        let h = harness().await;

        // Plant a conflicting durable row so the commit after the saga hits
        // the primary key
        let planted = Agent {
            id: "a1".to_string(),
            branch: "agent/a1".to_string(),
            workspace_path: h.manager.inner().config().worktree_path_for("a1"),
            session_name: "amx-a1".to_string(),
            status: AgentStatus::Stopped,
            created_at: Utc::now(),
            updated_at: None,
            project_id: Some("p1".to_string()),
            uses_container: false,
            container_ref: None,
            config: None,
        };
        h.manager.store().commit_agent(&planted, "p1").unwrap();

        let result = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"), "p1")
            .await;
        assert!(matches!(result, Err(Error::Persistence(_))));

        // The freshly provisioned resources were rolled back
        assert_eq!(h.manager.inner().registry().len().await, 0);
        assert!(h.sessions.is_empty());
        assert_eq!(h.workspace.worktree_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_agent_removes_both_rows() {
        let h = harness().await;
        h.manager
            .create_agent(CreateAgentRequest::new("a1"), "p1")
            .await
            .unwrap();

        h.manager
            .delete_agent("a1", TeardownOptions::full())
            .await
            .unwrap();

        assert!(h.manager.store().get_agent("a1").unwrap().is_none());
        assert_eq!(h.manager.inner().registry().len().await, 0);
        assert!(h.manager.get_project("p1").unwrap().unwrap().agents.is_empty());
    }

    #[tokio::test]
    async fn test_failed_teardown_keeps_durable_row() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"), "p1")
            .await
            .unwrap();

        h.sessions.fail_kill(&agent.session_name);
        let result = h.manager.delete_agent("a1", TeardownOptions::full()).await;
        assert!(matches!(result, Err(Error::PartialCleanup(_))));
        assert!(h.manager.store().get_agent("a1").unwrap().is_some());

        h.sessions.clear_failures();
        h.manager
            .delete_agent("a1", TeardownOptions::full())
            .await
            .unwrap();
        assert!(h.manager.store().get_agent("a1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_reconciles_stale_status() {
        let h = harness().await;
        let agent = h
            .manager
            .create_agent(CreateAgentRequest::new("a1"), "p1")
            .await
            .unwrap();

        // The session dies out of band; the durable row still says running
        h.sessions.drop_session(&agent.session_name);
        let reconciled = h.manager.get_agent("a1").await.unwrap();
        assert_eq!(reconciled.status, AgentStatus::Stopped);

        // The correction was persisted, not just returned
        let stored = h.manager.store().get_agent("a1").unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Stopped);
    }

    #[tokio::test]
    async fn test_reconciles_agent_missing_from_local_registry() {
        let h = harness().await;
        h.manager
            .create_agent(CreateAgentRequest::new("a1"), "p1")
            .await
            .unwrap();

        // The CLI-local record disappears entirely
        h.manager.inner().registry().remove("a1").await.unwrap();

        let agents = h.manager.list_agents().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].status, AgentStatus::Stopped);
    }

    #[tokio::test]
    async fn test_delete_agent_with_missing_local_record() {
        let h = harness().await;
        h.manager
            .create_agent(CreateAgentRequest::new("a1"), "p1")
            .await
            .unwrap();

        // The CLI-local record vanishes; the durable row must still be
        // deletable
        h.manager.inner().registry().remove("a1").await.unwrap();
        assert_eq!(
            h.manager.get_agent("a1").await.unwrap().status,
            AgentStatus::Stopped
        );

        h.manager
            .delete_agent("a1", TeardownOptions::full())
            .await
            .unwrap();
        assert!(h.manager.store().get_agent("a1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_unknown_agent_is_not_found() {
        let h = harness().await;
        let result = h.manager.delete_agent("ghost", TeardownOptions::full()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_project_guard() {
        let h = harness().await;
        h.manager
            .create_agent(CreateAgentRequest::new("a1"), "p1")
            .await
            .unwrap();

        assert!(matches!(
            h.manager.delete_project("p1"),
            Err(Error::InvalidInput(_))
        ));

        h.manager
            .delete_agent("a1", TeardownOptions::full())
            .await
            .unwrap();
        h.manager.delete_project("p1").unwrap();
        assert!(h.manager.get_project("p1").unwrap().is_none());
    }
}
