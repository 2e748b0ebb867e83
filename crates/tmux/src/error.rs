//! Error types for tmux operations

use thiserror::Error;

/// Result type alias for tmux operations
pub type Result<T> = std::result::Result<T, TmuxError>;

/// Errors that can occur while driving tmux
#[derive(Debug, Error)]
pub enum TmuxError {
    /// Tmux command execution failed
    #[error("Tmux command failed: {message}")]
    CommandFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Session already exists
    #[error("Session '{name}' already exists")]
    SessionExists { name: String },

    /// Session not found
    #[error("Session '{name}' not found")]
    SessionNotFound { name: String },

    /// A session needs at least one window
    #[error("Session '{name}' was given no windows")]
    NoWindows { name: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TmuxError {
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
