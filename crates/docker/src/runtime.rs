//! Compose runtime: build, start, stop, remove and exec

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, trace};

use crate::error::{ContainerError, Result};
use crate::manifest::ManifestParams;

/// Observed state of an agent's container set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    /// No manifest or no containers for this agent
    Absent,
}

/// Drives `docker compose` for agent container sets.
///
/// Stateless; the compose project (named after the agent) is the source of
/// truth.
#[derive(Debug, Clone, Default)]
pub struct ComposeRuntime;

impl ComposeRuntime {
    pub fn new() -> Self {
        Self
    }

    /// Path of the rendered manifest inside a workspace
    pub fn manifest_path(workspace: &Path) -> PathBuf {
        workspace.join(".agentmux").join("docker-compose.yml")
    }

    /// Render the manifest for the given parameters and write it into the
    /// workspace.
    pub async fn write_manifest(&self, params: &ManifestParams) -> Result<PathBuf> {
        let path = Self::manifest_path(&params.workspace_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, params.render()).await?;
        debug!("Wrote compose manifest to {:?}", path);
        Ok(path)
    }

    /// Build the container images
    pub async fn build(&self, agent_id: &str, workspace: &Path) -> Result<()> {
        self.compose_checked(agent_id, workspace, &["build"]).await?;
        Ok(())
    }

    /// Start the container set detached
    pub async fn up(&self, agent_id: &str, workspace: &Path) -> Result<()> {
        info!("Starting container set for agent {}", agent_id);
        self.compose_checked(agent_id, workspace, &["up", "-d"])
            .await?;
        Ok(())
    }

    /// Stop the container set, keeping images and volumes
    pub async fn down(&self, agent_id: &str, workspace: &Path) -> Result<()> {
        info!("Stopping container set for agent {}", agent_id);
        self.compose_checked(agent_id, workspace, &["down"]).await?;
        Ok(())
    }

    /// Remove the container set together with its volumes and local images
    pub async fn remove(&self, agent_id: &str, workspace: &Path) -> Result<()> {
        info!("Removing container set for agent {}", agent_id);
        self.compose_checked(
            agent_id,
            workspace,
            &["down", "-v", "--rmi", "local", "--remove-orphans"],
        )
        .await?;
        Ok(())
    }

    /// Run a command inside the workspace service, returning its stdout
    pub async fn exec(&self, agent_id: &str, workspace: &Path, argv: &[&str]) -> Result<String> {
        let mut args = vec!["exec", "-T", "workspace"];
        args.extend_from_slice(argv);
        self.compose_checked(agent_id, workspace, &args).await
    }

    /// Observed status of the agent's container set
    pub async fn status(&self, agent_id: &str, workspace: &Path) -> Result<ContainerStatus> {
        let manifest = Self::manifest_path(workspace);
        if !manifest.exists() {
            return Ok(ContainerStatus::Absent);
        }

        let output = self
            .compose(agent_id, workspace, &["ps", "--format", "json"])
            .await?;
        if !output.success {
            return Ok(ContainerStatus::Absent);
        }
        Ok(parse_ps_status(&output.stdout))
    }

    async fn compose(
        &self,
        agent_id: &str,
        workspace: &Path,
        args: &[&str],
    ) -> Result<ComposeOutput> {
        let manifest = Self::manifest_path(workspace);
        if !manifest.exists() {
            return Err(ContainerError::ManifestMissing { path: manifest });
        }

        let project = format!("amx-{}", agent_id);
        debug!("Running docker compose -p {} {:?}", project, args);

        let output = Command::new("docker")
            .arg("compose")
            .arg("-p")
            .arg(&project)
            .arg("-f")
            .arg(&manifest)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ContainerError::command_failed_with_source("Failed to execute docker", e)
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!("docker stdout: {}", stdout);
        if !stderr.is_empty() {
            trace!("docker stderr: {}", stderr);
        }

        Ok(ComposeOutput {
            stdout,
            stderr,
            success: output.status.success(),
        })
    }

    async fn compose_checked(
        &self,
        agent_id: &str,
        workspace: &Path,
        args: &[&str],
    ) -> Result<String> {
        let output = self.compose(agent_id, workspace, args).await?;
        if !output.success {
            return Err(ContainerError::command_failed(format!(
                "docker compose {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[derive(Debug)]
struct ComposeOutput {
    stdout: String,
    stderr: String,
    success: bool,
}

/// Interpret `docker compose ps --format json` output: one JSON object per
/// line, newer versions emit an array instead.
fn parse_ps_status(stdout: &str) -> ContainerStatus {
    let states: Vec<String> = if stdout.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<serde_json::Value>>(stdout)
            .map(|entries| collect_states(&entries))
            .unwrap_or_default()
    } else {
        stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|entry| state_of(&entry))
            .collect()
    };

    if states.is_empty() {
        ContainerStatus::Absent
    } else if states.iter().any(|s| s == "running") {
        ContainerStatus::Running
    } else {
        ContainerStatus::Stopped
    }
}

fn collect_states(entries: &[serde_json::Value]) -> Vec<String> {
    entries.iter().filter_map(state_of).collect()
}

fn state_of(entry: &serde_json::Value) -> Option<String> {
    entry
        .get("State")
        .and_then(|s| s.as_str())
        .map(|s| s.to_ascii_lowercase())
}
