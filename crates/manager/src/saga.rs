//! Saga compensation runner
//!
//! Each provisioning step that leaves external state behind pushes a
//! compensating action after it succeeds. On failure the stack unwinds in
//! reverse order, best-effort: a compensation failure is collected rather
//! than aborting the remaining compensations, and the collected messages are
//! appended to the original error by the caller.

use std::future::Future;
use std::pin::Pin;

use tracing::warn;

type CompensationFuture = Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>;

/// Ordered stack of (label, compensating action) pairs
#[derive(Default)]
pub struct Compensations {
    steps: Vec<(String, CompensationFuture)>,
}

impl Compensations {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Register the compensation for a step that just succeeded
    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: Future<Output = std::result::Result<(), String>> + Send + 'static,
    {
        self.steps.push((label.into(), Box::pin(action)));
    }

    /// The saga committed; no compensation will run
    pub fn dismiss(mut self) {
        self.steps.clear();
    }

    /// Run all registered compensations in reverse order, returning the
    /// failures that occurred.
    pub async fn unwind(self) -> Vec<String> {
        let mut failures = Vec::new();
        for (label, action) in self.steps.into_iter().rev() {
            warn!("Compensating: {}", label);
            if let Err(message) = action.await {
                warn!("Compensation '{}' failed: {}", label, message);
                failures.push(format!("{}: {}", label, message));
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
