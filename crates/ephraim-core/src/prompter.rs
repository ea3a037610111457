//! Terminal interaction seam.
//!
//! The agent loop and interactive tools talk to the user only through
//! this trait, so the binary can install a styled console and tests can
//! install scripted fakes.

use async_trait::async_trait;

use crate::state::{Phase, Plan, RiskLevel};

#[async_trait]
pub trait Prompter: Send + Sync {
    /// Read one line of input. `None` means end of input (the user closed
    /// stdin or interrupted twice).
    async fn read_line(&self, prompt: &str) -> anyhow::Result<Option<String>>;

    /// Yes/no confirmation.
    async fn confirm(&self, question: &str) -> anyhow::Result<bool>;

    fn info(&self, message: &str);
    fn success(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);

    /// Announce a phase change.
    fn phase(&self, phase: Phase);

    /// Render a proposed plan for approval.
    fn show_plan(&self, plan: &Plan);

    /// Render model reasoning with its confidence and risk.
    fn show_reply(&self, reasoning: &str, confidence: i64, risk: RiskLevel);

    /// Render one streamed content fragment (no newline).
    fn stream_fragment(&self, fragment: &str);
}
