//! The tool-result envelope sent back to the model

use serde::Serialize;

use crate::conversation::PendingToolUse;

/// Single-line JSON carrying a tool result back to the model.
///
/// Field order is fixed: `type`, `tool_use_id`, `content`, `is_error`.
#[derive(Debug, Serialize)]
pub struct ToolResultEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    tool_use_id: &'a str,
    content: &'a str,
    is_error: bool,
}

impl<'a> ToolResultEnvelope<'a> {
    pub fn new(tool_use_id: &'a str, content: &'a str, is_error: bool) -> Self {
        Self {
            kind: "tool_result",
            tool_use_id,
            content,
            is_error,
        }
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl<'a> From<&'a PendingToolUse> for ToolResultEnvelope<'a> {
    fn from(pending: &'a PendingToolUse) -> Self {
        Self::new(&pending.tool_use_id, &pending.result_text, pending.is_error)
    }
}
