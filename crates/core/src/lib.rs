//! Core library for agentmux
//!
//! This crate contains the shared building blocks of the agent workspace
//! manager:
//! - Agent and project models
//! - The CLI-local agent registry (line-file store)
//! - The port allocator
//! - Configuration and the error taxonomy

pub mod agent;
pub mod config;
pub mod error;
pub mod port;
pub mod project;
pub mod registry;

pub use agent::{Agent, AgentStatus, CreateAgentRequest};
pub use config::Config;
pub use error::Error;
pub use port::{PortAllocation, PortAllocator, PortProbe, TcpProbe};
pub use project::Project;
pub use registry::{AgentRecord, AgentRegistry};

pub type Result<T> = std::result::Result<T, Error>;
