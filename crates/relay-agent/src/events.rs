//! Session event types

use relay_ai::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::PendingToolUse;

/// Events emitted while a session runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message was added to the log
    MessageAppended { message: Message },

    /// Text was appended to an existing message
    TextDelta { message_id: Uuid, delta: String },

    /// A model response started streaming
    StreamStarted,

    /// The model response ended
    StreamEnded { cancelled: bool },

    /// A tool began executing
    ToolStarted {
        tool_use_id: String,
        tool_name: String,
    },

    /// A tool call was logged but not executed because another is outstanding
    ToolSkipped {
        tool_use_id: String,
        tool_name: String,
    },

    /// A tool result is waiting for approval
    ApprovalRequested { pending: PendingToolUse },

    /// An approved result was added to the log as its envelope
    ResultApproved { message: Message },

    /// An executing or pending tool was cancelled
    ToolCancelled { tool_use_id: String },

    /// Error occurred
    Error { message: String },
}
