//! Error types for container operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors that can occur while driving docker compose
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Docker command execution failed
    #[error("Docker command failed: {message}")]
    CommandFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Manifest has not been rendered for this workspace
    #[error("No compose manifest at {path}")]
    ManifestMissing { path: PathBuf },

    /// Could not interpret docker output
    #[error("Failed to parse docker output: {message}")]
    ParseError { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// Create a CommandFailed error
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a CommandFailed error with source
    pub fn command_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            message: message.into(),
            source: Some(source),
        }
    }
}
