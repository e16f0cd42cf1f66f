//! Core types for conversations and model requests

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of an entry in the conversation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// A tool invocation requested by the model, rendered for display
    ToolUse,
    /// The text returned by executing a tool
    ToolResult,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolUse => "tool_use",
            Role::ToolResult => "tool_result",
        }
    }

    /// The role this entry takes in an upstream request.
    ///
    /// Tool turns fold into the assistant role so the upstream sees a strict
    /// user/assistant alternation.
    pub fn upstream(&self) -> ApiRole {
        match self {
            Role::User => ApiRole::User,
            Role::Assistant | Role::ToolUse | Role::ToolResult => ApiRole::Assistant,
        }
    }
}

/// One entry in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Create a message with a fresh id
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create an empty assistant message for a response that is about to stream
    pub fn assistant_empty() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    /// Create a tool-use log entry
    pub fn tool_use(text: impl Into<String>) -> Self {
        Self::new(Role::ToolUse, text)
    }

    /// Create a tool-result log entry
    pub fn tool_result(text: impl Into<String>) -> Self {
        Self::new(Role::ToolResult, text)
    }
}

/// Roles understood by the upstream API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiRole {
    User,
    Assistant,
}

/// A message in the shape the upstream API expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: ApiRole,
    pub content: String,
}

/// Convert the conversation log into upstream messages.
///
/// Entries with blank content are skipped and consecutive entries that map
/// to the same upstream role are merged.
pub fn to_upstream(messages: &[Message]) -> Vec<ApiMessage> {
    let mut result: Vec<ApiMessage> = vec![];

    for message in messages {
        if message.content.trim().is_empty() {
            continue;
        }
        let role = message.role.upstream();
        match result.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => result.push(ApiMessage {
                role,
                content: message.content.clone(),
            }),
        }
    }

    result
}

/// A tool advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the input
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    /// Create a descriptor with an open object schema
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description,
            input_schema: default_input_schema(),
        }
    }

    /// Replace the input schema
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "claude-sonnet-4-5-20250929")
    pub id: String,
    /// Base URL for API calls
    pub base_url: String,
    /// Maximum output tokens per response
    pub max_tokens: u32,
}

impl Model {
    /// An Anthropic model served from the public API
    pub fn anthropic(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
        }
    }
}

/// A complete request for one streamed response
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: Model,
    pub system_prompt: Option<String>,
    pub messages: Vec<ApiMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub temperature: Option<f32>,
}
