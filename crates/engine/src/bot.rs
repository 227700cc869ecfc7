//! Bot runner contract
//!
//! A bot performs one scripted check against one line of input, optionally
//! through a proxy, and classifies the result as a [`BotOutcome`]. Ordinary
//! check failures are outcomes; only infrastructure faults are errors.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::job::JobId;
use crate::proxy::Proxy;

/// Terminal classification of one check
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotOutcome {
    Success,
    Fail,
    Ban,
    Retry,
    Error,
    Custom(String),
}

impl BotOutcome {
    /// Whether the line should be attempted again
    pub fn needs_retry(&self) -> bool {
        matches!(self, Self::Ban | Self::Retry)
    }
}

impl std::fmt::Display for BotOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Ban => write!(f, "BAN"),
            Self::Retry => write!(f, "RETRY"),
            Self::Error => write!(f, "ERROR"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// Outcome plus the variables captured during the check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotResult {
    pub outcome: BotOutcome,
    #[serde(default)]
    pub captured: BTreeMap<String, String>,
}

impl BotResult {
    pub fn new(outcome: BotOutcome) -> Self {
        Self {
            outcome,
            captured: BTreeMap::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(BotOutcome::Success)
    }

    pub fn fail() -> Self {
        Self::new(BotOutcome::Fail)
    }

    pub fn ban() -> Self {
        Self::new(BotOutcome::Ban)
    }

    pub fn retry() -> Self {
        Self::new(BotOutcome::Retry)
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(BotOutcome::Custom(name.into()))
    }

    /// Add a captured variable
    pub fn with_capture(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.captured.insert(name.into(), value.into());
        self
    }
}

/// Infrastructure faults raised by a bot
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// The check observed the cancellation signal
    #[error("check was cancelled")]
    Cancelled,

    /// Network failure outside the bot's own classification
    #[error("network error: {0}")]
    Network(String),

    /// Any other fault
    #[error("bot failure: {0}")]
    Other(String),
}

/// Context provided to a bot for one attempt
///
/// Bots must observe [`BotContext::cancelled`] at their I/O boundaries so an
/// aborted job unwinds promptly.
#[derive(Debug, Clone)]
pub struct BotContext {
    /// Job running the check
    pub job_id: JobId,

    /// Position of the line in the data pool
    pub line_index: Option<u64>,

    /// Attempt number for this line (1-based)
    pub attempt: u32,

    cancel: CancellationToken,
}

impl BotContext {
    pub fn new(job_id: JobId, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            line_index: None,
            attempt,
            cancel,
        }
    }

    pub fn with_line_index(mut self, index: u64) -> Self {
        self.line_index = Some(index);
        self
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested
    ///
    /// ```ignore
    /// tokio::select! {
    ///     response = client.get(url).send() => { ... }
    ///     _ = ctx.cancelled() => return Err(BotError::Cancelled),
    /// }
    /// ```
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// The underlying token, for handing to libraries that accept one
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Runs one scripted check
#[async_trait]
pub trait BotRunner: Send + Sync {
    /// Check `line`, through `proxy` when one is attached
    async fn run(
        &self,
        line: &str,
        proxy: Option<&Proxy>,
        ctx: &BotContext,
    ) -> Result<BotResult, BotError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_outcome_display() {
        assert_eq!(BotOutcome::Success.to_string(), "SUCCESS");
        assert_eq!(BotOutcome::Custom("2FA".into()).to_string(), "2FA");
    }

    #[test]
    fn test_needs_retry() {
        assert!(BotOutcome::Ban.needs_retry());
        assert!(BotOutcome::Retry.needs_retry());
        assert!(!BotOutcome::Fail.needs_retry());
        assert!(!BotOutcome::Error.needs_retry());
    }

    #[test]
    fn test_result_captures() {
        let result = BotResult::success()
            .with_capture("plan", "premium")
            .with_capture("expiry", "2027-01-01");

        assert_eq!(result.outcome, BotOutcome::Success);
        assert_eq!(result.captured.len(), 2);
        assert_eq!(result.captured["plan"], "premium");
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(BotOutcome::Custom("free".into())).unwrap();
        assert_eq!(json, serde_json::json!({"custom": "free"}));

        let parsed: BotOutcome = serde_json::from_str(r#""ban""#).unwrap();
        assert_eq!(parsed, BotOutcome::Ban);
    }

    #[tokio::test]
    async fn test_context_cancellation() {
        let token = CancellationToken::new();
        let ctx = BotContext::new(Uuid::now_v7(), 1, token.clone()).with_line_index(7);

        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.line_index, Some(7));

        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }
}
