//! Error types for the core library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Agent already exists: {0}")]
    AlreadyExists(String),

    #[error("Agent capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },

    #[error("No port available in pool {floor}..={ceiling}")]
    NoPortAvailable { floor: u16, ceiling: u16 },

    #[error("No contiguous range of {count} ports available in pool {floor}..={ceiling}")]
    NoRangeAvailable {
        count: u16,
        floor: u16,
        ceiling: u16,
    },

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Partial cleanup failure: {}", .0.join("; "))]
    PartialCleanup(Vec<String>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Append a compensation failure to an existing error, preserving the
    /// original cause. The caller sees both why the operation failed and what
    /// could not be rolled back.
    pub fn with_compensation_failures(self, failures: Vec<String>) -> Self {
        if failures.is_empty() {
            return self;
        }
        let mut messages = vec![self.to_string()];
        messages.extend(
            failures
                .into_iter()
                .map(|f| format!("compensation failed: {}", f)),
        );
        Error::PartialCleanup(messages)
    }
}
