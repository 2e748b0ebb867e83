//! Docker compose sandboxes
//!
//! Renders a compose manifest for an agent workspace and drives
//! `docker compose` to build, start, stop and remove the container set, and
//! to exec commands inside it.

mod error;
mod manifest;
mod runtime;

pub use error::{ContainerError, Result};
pub use manifest::{random_subnet, IsolationMode, ManifestParams};
pub use runtime::{ComposeRuntime, ContainerStatus};
