//! Tool dispatch boundary

use async_trait::async_trait;
use relay_ai::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Arguments handed to a tool
pub type ToolInput = serde_json::Map<String, serde_json::Value>;

/// Text prefix that marks a failed tool outcome
pub const ERROR_PREFIX: &str = "Error:";

/// Result of invoking a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Text to show the user and return to the model
    pub text: String,
    /// Whether the invocation failed
    pub is_error: bool,
}

impl ToolOutcome {
    /// Create a successful outcome
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Create a failed outcome
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Classify text by its `Error:` prefix
    pub fn classify(text: impl Into<String>) -> Self {
        let text = text.into();
        let is_error = text.starts_with(ERROR_PREFIX);
        Self { text, is_error }
    }

    /// The invocation was cancelled before it produced a result
    pub fn cancelled() -> Self {
        Self::error("Error: tool execution cancelled")
    }

    /// The backend failed to produce a result
    pub fn failed(detail: impl std::fmt::Display) -> Self {
        Self::error(format!("Error: tool execution failed: {}", detail))
    }
}

/// Something that can list and invoke tools.
///
/// `invoke` never fails: every problem is folded into a [`ToolOutcome`] with
/// `is_error` set, so callers only ever have a result to show.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// The tools currently on offer
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Run `name` with `input`
    async fn invoke(&self, name: &str, input: ToolInput, cancel: CancellationToken)
    -> ToolOutcome;
}

/// Type alias for a shared dispatcher
pub type SharedDispatcher = Arc<dyn ToolDispatcher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_prefix() {
        assert!(ToolOutcome::classify("Error: no such file").is_error);
        assert!(!ToolOutcome::classify("fn main() {}").is_error);
        assert!(!ToolOutcome::classify("error: lowercase is content").is_error);
    }

    #[test]
    fn test_cancelled_and_failed_are_distinct() {
        let cancelled = ToolOutcome::cancelled();
        let failed = ToolOutcome::failed("connection reset");
        assert!(cancelled.is_error && failed.is_error);
        assert!(cancelled.text.contains("cancelled"));
        assert_eq!(failed.text, "Error: tool execution failed: connection reset");
        assert_ne!(cancelled.text, failed.text);
    }
}
