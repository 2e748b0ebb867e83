//! Compose manifest rendering
//!
//! The manifest is rendered from a built-in template with the agent id, the
//! workspace path, the allocated port range, the isolation mode and a random
//! private subnet substituted in, then written into the workspace at
//! `.agentmux/docker-compose.yml`.

use std::path::PathBuf;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Network isolation of the container set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Containers may reach the outside network
    Open,
    /// Containers only see the private subnet
    Restricted,
}

/// Inputs to manifest rendering
#[derive(Debug, Clone)]
pub struct ManifestParams {
    /// Agent the container set belongs to
    pub agent_id: String,
    /// Worktree mounted as the container workspace
    pub workspace_path: PathBuf,
    /// Host port range published into the container, if any
    pub port_range: Option<(u16, u16)>,
    /// Network isolation
    pub isolation: IsolationMode,
    /// Private subnet in CIDR notation
    pub subnet: String,
}

impl ManifestParams {
    /// Compose project name for this agent's container set
    pub fn compose_project(&self) -> String {
        format!("amx-{}", self.agent_id)
    }

    /// Render the docker-compose manifest
    pub fn render(&self) -> String {
        let ports = match self.port_range {
            Some((first, last)) => format!(
                "    ports:\n      - \"{first}-{last}:{first}-{last}\"\n"
            ),
            None => String::new(),
        };
        let internal = match self.isolation {
            IsolationMode::Open => "false",
            IsolationMode::Restricted => "true",
        };

        format!(
            r#"name: {project}
services:
  workspace:
    build:
      context: {workspace}
      dockerfile: .agentmux/Dockerfile
    working_dir: /workspace
    volumes:
      - {workspace}:/workspace
    environment:
      AGENT_ID: {agent_id}
{ports}    networks:
      - agent
    command: ["sleep", "infinity"]
networks:
  agent:
    driver: bridge
    internal: {internal}
    ipam:
      config:
        - subnet: {subnet}
"#,
            project = self.compose_project(),
            workspace = self.workspace_path.display(),
            agent_id = self.agent_id,
            ports = ports,
            internal = internal,
            subnet = self.subnet,
        )
    }
}

/// Pick a random /24 inside the 172.16.0.0/12 private block.
///
/// Subnets are not pooled like ports; a collision with an existing docker
/// network surfaces as a compose failure and the provisioning attempt is
/// retried.
pub fn random_subnet() -> String {
    let mut rng = rand::thread_rng();
    let second: u8 = rng.gen_range(16..=31);
    let third: u8 = rng.gen();
    format!("172.{}.{}.0/24", second, third)
}
