//! Project model definitions

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Project groups agents working against one repository checkout and may
/// reserve a port range of its own. Deleting a project is rejected while it
/// still owns agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project identifier
    pub id: String,

    /// Repository path the project manages
    pub path: PathBuf,

    /// Ids of the agents owned by this project
    pub agents: Vec<String>,

    /// Reserved port range, if any
    pub port_range: Option<(u16, u16)>,

    /// Timestamp when the project was created
    pub created_at: DateTime<Utc>,

    /// Timestamp when the project was last updated
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create a project with a generated id
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), path)
    }

    /// Create a project with an explicit id
    pub fn with_id(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            path: path.into(),
            agents: Vec::new(),
            port_range: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = Some((start, end));
        self
    }

    pub fn owns_agents(&self) -> bool {
        !self.agents.is_empty()
    }
}
