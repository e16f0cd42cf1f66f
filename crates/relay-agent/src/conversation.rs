//! Conversation state: messages, streaming status, and the pending tool result.

use relay_ai::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text appended to a response the user cancelled
pub const CANCELLED_MARKER: &str = "[Response cancelled by user]";

/// A finished tool result waiting for the user's decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingToolUse {
    pub tool_use_id: String,
    pub tool_name: String,
    pub result_text: String,
    pub is_error: bool,
}

/// Coarse session state, derived from the flags in [`Conversation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Streaming,
    /// A tool is executing or its result awaits approval
    ToolsPending,
}

/// Conversation state owned by a session
#[derive(Debug, Default)]
pub struct Conversation {
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Whether a response is streaming
    pub streaming: bool,
    /// Whether a tool is executing
    pub tool_running: bool,
    /// Result waiting for approval
    pub pending_tool_use: Option<PendingToolUse>,
    /// Last error
    pub error_message: Option<String>,
    /// Message receiving streamed text
    active: Option<Uuid>,
}

impl Conversation {
    pub fn waiting_for_approval(&self) -> bool {
        self.pending_tool_use.is_some()
    }

    pub fn phase(&self) -> Phase {
        if self.streaming {
            Phase::Streaming
        } else if self.tool_running || self.waiting_for_approval() {
            Phase::ToolsPending
        } else {
            Phase::Idle
        }
    }

    /// Append a message, returning its id
    pub fn push(&mut self, message: Message) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Append an empty assistant message and make it receive streamed text
    pub fn begin_response(&mut self) -> Uuid {
        let id = self.push(Message::assistant_empty());
        self.active = Some(id);
        id
    }

    /// Stop routing streamed text to the active message
    pub fn end_response(&mut self) {
        self.active = None;
    }

    /// The message receiving streamed text
    pub fn active_message(&self) -> Option<&Message> {
        let id = self.active?;
        self.get(id)
    }

    /// Get a message by id
    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Append streamed text.
    ///
    /// Text that follows a tool entry starts a new assistant message so the
    /// log keeps conversation order. Returns the id of the message written
    /// and, if one was created, the new message.
    pub fn append_text(&mut self, text: &str) -> (Uuid, Option<Message>) {
        if let (Some(id), Some(last)) = (self.active, self.messages.last_mut()) {
            if last.id == id {
                last.content.push_str(text);
                return (id, None);
            }
        }

        let message = Message::assistant(text);
        self.active = Some(message.id);
        let id = self.push(message.clone());
        (id, Some(message))
    }

    /// Mark the active message as cancelled, returning its id and the text added
    pub fn mark_cancelled(&mut self) -> Option<(Uuid, String)> {
        let id = self.active.take()?;
        let message = self.get_mut(id)?;
        let delta = if message.content.is_empty() {
            CANCELLED_MARKER.to_string()
        } else {
            format!("\n\n{}", CANCELLED_MARKER)
        };
        message.content.push_str(&delta);
        Some((id, delta))
    }
}
