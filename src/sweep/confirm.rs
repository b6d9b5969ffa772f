//! Operator checkpoints.
//!
//! Reversing the field means swapping the magnet leads by hand, so the session
//! blocks until someone confirms it. There is no timeout.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::console::ConsolePrompt;
use crate::error::AppResult;

/// Blocks until a human (or a stub) acknowledges `prompt`.
#[async_trait]
pub trait OperatorConfirmation: Send + Sync {
    /// Wait for acknowledgment.
    ///
    /// # Errors
    /// [`crate::error::SweepError::OperatorAborted`] if the confirmation channel
    /// is closed.
    async fn confirm(&self, prompt: &str) -> AppResult<()>;
}

/// Prompts on stdout and waits for Enter on stdin.
#[derive(Default)]
pub struct ConsoleConfirmation {
    console: ConsolePrompt,
}

impl ConsoleConfirmation {
    /// Confirm through the process console.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperatorConfirmation for ConsoleConfirmation {
    async fn confirm(&self, prompt: &str) -> AppResult<()> {
        self.console.ask(prompt).await?;
        info!("Operator confirmed");
        Ok(())
    }
}

/// Confirms immediately and counts how often it was asked.
#[derive(Debug, Default)]
pub struct AutoConfirm {
    calls: AtomicUsize,
}

impl AutoConfirm {
    /// New stub with a zero count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of confirmations requested.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperatorConfirmation for AutoConfirm {
    async fn confirm(&self, prompt: &str) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        info!(prompt, "Auto-confirmed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_confirm_counts() {
        let confirm = AutoConfirm::new();
        confirm.confirm("swap").await.unwrap();
        confirm.confirm("swap").await.unwrap();
        assert_eq!(confirm.calls(), 2);
    }
}
