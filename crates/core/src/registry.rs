//! CLI-local agent registry
//!
//! The authoritative list of agents as seen by the command-line tool: one line
//! per agent, colon-delimited `id:branch:worktreePath:sessionName`, no header.
//! Records are appended to add and the file is rewritten minus the matching
//! line to remove. The write lock is held across the check-and-append in
//! `create_if_absent`, which closes the same-id provisioning race at the
//! storage layer.
//!
//! Status is intentionally absent from the record: it is derived on every
//! read by probing the session provider.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Error;
use crate::Result;

/// One registry line. Field order matches the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: String,
    pub branch: String,
    pub worktree_path: PathBuf,
    pub session_name: String,
}

impl AgentRecord {
    /// Serialize to the colon-delimited line format
    fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.id,
            self.branch,
            self.worktree_path.display(),
            self.session_name
        )
    }

    /// Parse one registry line; `None` for blank or malformed lines
    fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let mut parts = line.splitn(4, ':');
        let id = parts.next()?;
        let branch = parts.next()?;
        let worktree_path = parts.next()?;
        let session_name = parts.next()?;
        if id.is_empty() || session_name.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            branch: branch.to_string(),
            worktree_path: PathBuf::from(worktree_path),
            session_name: session_name.to_string(),
        })
    }

    /// Reject fields that cannot survive the line format
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("id", self.id.as_str()),
            ("branch", self.branch.as_str()),
            ("session name", self.session_name.as_str()),
        ] {
            if value.contains(':') || value.contains('\n') {
                return Err(Error::InvalidInput(format!(
                    "agent {} may not contain ':' or newlines: {:?}",
                    name, value
                )));
            }
        }
        let path = self.worktree_path.to_string_lossy();
        if path.contains(':') || path.contains('\n') {
            return Err(Error::InvalidInput(
                "worktree path may not contain ':' or newlines".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thread-safe registry with line-file persistence
#[derive(Clone)]
pub struct AgentRegistry {
    /// In-memory cache, in file order
    records: Arc<RwLock<Vec<AgentRecord>>>,
    /// Path to the registry file
    file_path: PathBuf,
}

impl AgentRegistry {
    /// Load the registry from the given file, creating an empty registry if
    /// the file does not exist. Malformed lines are skipped with a warning.
    pub async fn new(file_path: PathBuf) -> Result<Self> {
        let records = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to read registry file: {}", e)))?;

            let mut records = Vec::new();
            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match AgentRecord::from_line(line) {
                    Some(record) => records.push(record),
                    None => warn!(
                        "Skipping malformed registry line {} in {:?}",
                        index + 1,
                        file_path
                    ),
                }
            }
            records
        } else {
            Vec::new()
        };

        Ok(Self {
            records: Arc::new(RwLock::new(records)),
            file_path,
        })
    }

    /// Number of registered agents
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Get a record by agent id
    pub async fn get(&self, id: &str) -> Option<AgentRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.id == id).cloned()
    }

    /// List all records in file order
    pub async fn list(&self) -> Vec<AgentRecord> {
        self.records.read().await.clone()
    }

    /// Append a record if no record with the same id exists. The write lock
    /// is held across check, append and persist, so two concurrent calls with
    /// the same id cannot both commit.
    pub async fn create_if_absent(&self, record: AgentRecord) -> Result<()> {
        record.validate()?;

        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(Error::AlreadyExists(record.id));
        }
        records.push(record);
        // The record only counts as committed once the file write succeeded
        if let Err(e) = self.persist(&records).await {
            records.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Remove the record with the given id, rewriting the file minus the
    /// matching line. Returns whether a record was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        let kept: Vec<AgentRecord> = records.iter().filter(|r| r.id != id).cloned().collect();
        if kept.len() == records.len() {
            return Ok(false);
        }
        // Persist first; a failed write leaves the record in place for retry
        self.persist(&kept).await?;
        *records = kept;
        Ok(true)
    }

    /// Truncate the registry. Only called after every record has already been
    /// removed individually; kept separate so a partial cleanup never wipes
    /// surviving records.
    pub async fn clear(&self) -> Result<()> {
        let mut records = self.records.write().await;
        self.persist(&[]).await?;
        records.clear();
        Ok(())
    }

    async fn persist(&self, records: &[AgentRecord]) -> Result<()> {
        let mut content = String::new();
        for record in records {
            content.push_str(&record.to_line());
            content.push('\n');
        }

        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        tokio::fs::write(&self.file_path, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write registry file: {}", e)))?;
        Ok(())
    }
}
