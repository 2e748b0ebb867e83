//! Durable relational store
//!
//! SQLite mirror of the agent and project state. Unlike the line-file
//! registry, status is stored here and refreshed by the reconciler on read.
//! Mutations that touch an agent and its owning project run in one
//! transaction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use agentmux_core::{Agent, AgentStatus, Error, Project, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY,
    path        TEXT NOT NULL,
    port_start  INTEGER,
    port_end    INTEGER,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id             TEXT PRIMARY KEY,
    branch         TEXT NOT NULL,
    worktree_path  TEXT NOT NULL,
    session_name   TEXT NOT NULL,
    status         TEXT NOT NULL,
    project_id     TEXT REFERENCES projects(id),
    uses_container INTEGER NOT NULL DEFAULT 0,
    container_ref  TEXT,
    metadata       TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT
);

CREATE INDEX IF NOT EXISTS idx_agents_project ON agents(project_id);
";

/// Durable store backed by a single SQLite database file
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and migrate) the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(persistence)?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(persistence)?;
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Persistence("store mutex poisoned".to_string()))
    }

    pub fn create_project(&self, project: &Project) -> Result<()> {
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO projects (id, path, port_start, port_end, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    project.id,
                    project.path.to_string_lossy(),
                    project.port_range.map(|(s, _)| s),
                    project.port_range.map(|(_, e)| e),
                    project.created_at.to_rfc3339(),
                    project.updated_at.to_rfc3339(),
                ],
            )
            .map_err(persistence)?;
        if inserted == 0 {
            return Err(Error::AlreadyExists(format!("project {}", project.id)));
        }
        debug!("Stored project {}", project.id);
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, path, port_start, port_end, created_at, updated_at
                 FROM projects WHERE id = ?1",
                params![id],
                project_from_row,
            )
            .optional()
            .map_err(persistence)?;

        let Some(mut project) = row else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT id FROM agents WHERE project_id = ?1 ORDER BY created_at")
            .map_err(persistence)?;
        let agents = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(persistence)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(persistence)?;
        project.agents = agents;
        Ok(Some(project))
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let ids: Vec<String> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT id FROM projects ORDER BY created_at")
                .map_err(persistence)?;
            let ids = stmt
                .query_map([], |row| row.get(0))
                .map_err(persistence)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(persistence)?;
            ids
        };

        let mut projects = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(project) = self.get_project(&id)? {
                projects.push(project);
            }
        }
        Ok(projects)
    }

    /// Delete a project. Rejected while agents still reference it.
    pub fn delete_project(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let agents: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM agents WHERE project_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(persistence)?;
        if agents > 0 {
            return Err(Error::InvalidInput(format!(
                "project {} still owns {} agent(s)",
                id, agents
            )));
        }
        let deleted = conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .map_err(persistence)?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("project {}", id)));
        }
        Ok(())
    }

    /// Record a provisioned agent under its project in one transaction,
    /// bumping the project's updated timestamp.
    pub fn commit_agent(&self, agent: &Agent, project_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(persistence)?;
        let now = Utc::now().to_rfc3339();

        let metadata = match &agent.config {
            Some(config) => Some(serde_json::to_string(config)?),
            None => None,
        };
        tx.execute(
            "INSERT INTO agents (id, branch, worktree_path, session_name, status,
                                 project_id, uses_container, container_ref, metadata,
                                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                agent.id,
                agent.branch,
                agent.workspace_path.to_string_lossy(),
                agent.session_name,
                agent.status.as_str(),
                project_id,
                agent.uses_container,
                agent.container_ref,
                metadata,
                agent.created_at.to_rfc3339(),
                agent.updated_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(persistence)?;
        tx.execute(
            "UPDATE projects SET updated_at = ?1 WHERE id = ?2",
            params![now, project_id],
        )
        .map_err(persistence)?;

        tx.commit().map_err(persistence)?;
        debug!("Committed agent {} under project {}", agent.id, project_id);
        Ok(())
    }

    /// Remove an agent and bump its project in one transaction
    pub fn remove_agent(&self, id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(persistence)?;

        let project_id: Option<String> = tx
            .query_row(
                "SELECT project_id FROM agents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(persistence)?
            .flatten();

        let deleted = tx
            .execute("DELETE FROM agents WHERE id = ?1", params![id])
            .map_err(persistence)?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("agent {}", id)));
        }
        if let Some(project_id) = project_id {
            tx.execute(
                "UPDATE projects SET updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), project_id],
            )
            .map_err(persistence)?;
        }

        tx.commit().map_err(persistence)?;
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, branch, worktree_path, session_name, status, project_id,
                    uses_container, container_ref, metadata, created_at, updated_at
             FROM agents WHERE id = ?1",
            params![id],
            agent_from_row,
        )
        .optional()
        .map_err(persistence)
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, branch, worktree_path, session_name, status, project_id,
                        uses_container, container_ref, metadata, created_at, updated_at
                 FROM agents ORDER BY created_at",
            )
            .map_err(persistence)?;
        let agents = stmt
            .query_map([], agent_from_row)
            .map_err(persistence)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(persistence)?;
        Ok(agents)
    }

    /// Overwrite the stored status of an agent
    pub fn update_agent_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE agents SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .map_err(persistence)?;
        if updated == 0 {
            return Err(Error::NotFound(format!("agent {}", id)));
        }
        Ok(())
    }
}

fn persistence(err: rusqlite::Error) -> Error {
    Error::Persistence(err.to_string())
}

fn parse_timestamp(value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let port_start: Option<u16> = row.get(2)?;
    let port_end: Option<u16> = row.get(3)?;
    Ok(Project {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        agents: Vec::new(),
        port_range: port_start.zip(port_end),
        created_at: parse_timestamp(row.get(4)?)?,
        updated_at: parse_timestamp(row.get(5)?)?,
    })
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let status: String = row.get(4)?;
    let metadata: Option<String> = row.get(8)?;
    let config: Option<HashMap<String, String>> = match metadata {
        Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    let updated_at: Option<String> = row.get(10)?;

    Ok(Agent {
        id: row.get(0)?,
        branch: row.get(1)?,
        workspace_path: PathBuf::from(row.get::<_, String>(2)?),
        session_name: row.get(3)?,
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Error),
        project_id: row.get(5)?,
        uses_container: row.get(6)?,
        container_ref: row.get(7)?,
        config,
        created_at: parse_timestamp(row.get(9)?)?,
        updated_at: updated_at.map(parse_timestamp).transpose()?,
    })
}
