//! Port allocator
//!
//! Assigns single ports or contiguous ranges from a bounded pool, avoiding
//! both internally tracked allocations and ports observed bound on the host.
//! Allocations are appended to a JSON file before the port is handed back
//! (allocate-then-use, never use-then-record). Both availability checks are
//! advisory; a race between check and bind is an accepted limitation and is
//! surfaced later as a normal, retryable provisioning error.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Error;
use crate::Result;

/// One port reservation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAllocation {
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub port: u16,
    pub service: String,
    pub allocated_at: DateTime<Utc>,
}

/// Host-side port availability check.
///
/// The production probe binds the port; tests inject a static set so they do
/// not depend on the machine's listening sockets.
pub trait PortProbe: Send + Sync {
    /// Whether the host reports this port as already bound
    fn is_bound(&self, port: u16) -> bool;
}

/// Probe that attempts a localhost bind
#[derive(Debug, Default)]
pub struct TcpProbe;

impl PortProbe for TcpProbe {
    fn is_bound(&self, port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_err()
    }
}

/// Thread-safe port allocator with JSON file persistence
#[derive(Clone)]
pub struct PortAllocator {
    allocations: Arc<RwLock<Vec<PortAllocation>>>,
    file_path: PathBuf,
    floor: u16,
    ceiling: u16,
    probe: Arc<dyn PortProbe>,
}

impl PortAllocator {
    /// Load the allocator state from the given file, creating an empty table
    /// if the file does not exist.
    pub async fn new(file_path: PathBuf, floor: u16, ceiling: u16) -> Result<Self> {
        Self::with_probe(file_path, floor, ceiling, Arc::new(TcpProbe)).await
    }

    /// Load with a custom host probe (used by tests)
    pub async fn with_probe(
        file_path: PathBuf,
        floor: u16,
        ceiling: u16,
        probe: Arc<dyn PortProbe>,
    ) -> Result<Self> {
        if floor > ceiling {
            return Err(Error::InvalidInput(format!(
                "port pool floor {} exceeds ceiling {}",
                floor, ceiling
            )));
        }

        let allocations = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to read port file: {}", e)))?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Storage(format!("Failed to parse port file: {}", e)))?
        } else {
            Vec::new()
        };

        Ok(Self {
            allocations: Arc::new(RwLock::new(allocations)),
            file_path,
            floor,
            ceiling,
            probe,
        })
    }

    /// Allocate a single port for a project service.
    ///
    /// If `preferred` is given and available, it is allocated; otherwise the
    /// scan continues ascending from it (or from the pool floor) to the pool
    /// ceiling.
    pub async fn allocate_single(
        &self,
        project_id: &str,
        service: &str,
        preferred: Option<u16>,
    ) -> Result<u16> {
        let mut allocations = self.allocations.write().await;

        let start = preferred.unwrap_or(self.floor).max(self.floor);
        for port in start..=self.ceiling {
            if self.is_available(&allocations, port) {
                allocations.push(PortAllocation {
                    project_id: project_id.to_string(),
                    agent_id: None,
                    port,
                    service: service.to_string(),
                    allocated_at: Utc::now(),
                });
                // The record only survives a successful persist; memory and
                // disk must not diverge
                if let Err(e) = self.persist(&allocations).await {
                    allocations.pop();
                    return Err(e);
                }
                debug!("Allocated port {} for {}/{}", port, project_id, service);
                return Ok(port);
            }
        }

        Err(Error::NoPortAvailable {
            floor: self.floor,
            ceiling: self.ceiling,
        })
    }

    /// Allocate the first contiguous window of `count` ports, each
    /// individually available, starting the scan at `start` or the pool
    /// floor. Either all `count` ports are recorded or none are.
    pub async fn allocate_range(
        &self,
        project_id: &str,
        agent_id: Option<&str>,
        service: &str,
        count: u16,
        start: Option<u16>,
    ) -> Result<(u16, u16)> {
        if count == 0 {
            return Err(Error::InvalidInput(
                "cannot allocate an empty port range".to_string(),
            ));
        }

        let mut allocations = self.allocations.write().await;

        let scan_from = start.unwrap_or(self.floor).max(self.floor);
        // u32 arithmetic so a window near u16::MAX cannot overflow
        let mut candidate = u32::from(scan_from);
        let width = u32::from(count);
        while candidate + width - 1 <= u32::from(self.ceiling) {
            let window_start = candidate as u16;
            match self.window_conflict(&allocations, window_start, count) {
                None => {
                    let now = Utc::now();
                    let before = allocations.len();
                    for port in (candidate..candidate + width).map(|p| p as u16) {
                        allocations.push(PortAllocation {
                            project_id: project_id.to_string(),
                            agent_id: agent_id.map(String::from),
                            port,
                            service: service.to_string(),
                            allocated_at: now,
                        });
                    }
                    // All-or-nothing: a failed persist must not leave any of
                    // the window recorded in memory
                    if let Err(e) = self.persist(&allocations).await {
                        allocations.truncate(before);
                        return Err(e);
                    }
                    let last = (candidate + width - 1) as u16;
                    debug!(
                        "Allocated port range {}-{} for {}/{}",
                        window_start, last, project_id, service
                    );
                    return Ok((window_start, last));
                }
                // Skip past the conflicting port rather than sliding by one
                Some(conflict) => {
                    candidate = u32::from(conflict) + 1;
                }
            }
        }

        Err(Error::NoRangeAvailable {
            count,
            floor: self.floor,
            ceiling: self.ceiling,
        })
    }

    /// Release every allocation belonging to a project. Idempotent.
    pub async fn release_project(&self, project_id: &str) -> Result<usize> {
        self.release_where(|a| a.project_id == project_id).await
    }

    /// Release every allocation belonging to an agent. Idempotent.
    pub async fn release_agent(&self, agent_id: &str) -> Result<usize> {
        self.release_where(|a| a.agent_id.as_deref() == Some(agent_id))
            .await
    }

    /// All current allocations
    pub async fn list(&self) -> Vec<PortAllocation> {
        self.allocations.read().await.clone()
    }

    async fn release_where<F>(&self, matches: F) -> Result<usize>
    where
        F: Fn(&PortAllocation) -> bool,
    {
        let mut allocations = self.allocations.write().await;
        let kept: Vec<PortAllocation> = allocations
            .iter()
            .filter(|&a| !matches(a))
            .cloned()
            .collect();
        let released = allocations.len() - kept.len();
        if released > 0 {
            // Persist first; the in-memory table keeps the records when the
            // write fails
            self.persist(&kept).await?;
            *allocations = kept;
        }
        Ok(released)
    }

    /// Availability = not in the allocation table AND not bound on the host
    fn is_available(&self, allocations: &[PortAllocation], port: u16) -> bool {
        !allocations.iter().any(|a| a.port == port) && !self.probe.is_bound(port)
    }

    /// First unavailable port in the window, if any
    fn window_conflict(
        &self,
        allocations: &[PortAllocation],
        start: u16,
        count: u16,
    ) -> Option<u16> {
        (u32::from(start)..u32::from(start) + u32::from(count))
            .map(|port| port as u16)
            .find(|&port| !self.is_available(allocations, port))
    }

    async fn persist(&self, allocations: &[PortAllocation]) -> Result<()> {
        let content = serde_json::to_string_pretty(allocations)
            .map_err(|e| Error::Storage(format!("Failed to serialize allocations: {}", e)))?;

        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        tokio::fs::write(&self.file_path, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write port file: {}", e)))?;
        Ok(())
    }
}
