//! relay-agent: conversation state machine with gated tool execution
//!
//! This crate drives a streaming model conversation: it turns tool calls
//! reassembled by `relay-ai` into dispatcher invocations, holds each result
//! until the user approves it, and keeps every step cancellable.

pub mod approval;
pub mod backend;
pub mod conversation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod events;
pub mod fallback;
pub mod intercept;
pub mod mcp;
pub mod render;
pub mod session;

pub use approval::{ApprovalPolicy, AutoApprove, ManualApproval};
pub use backend::{BackendError, BackendHandle, BackendStatus, RoutingDispatcher, ToolBackend};
pub use conversation::{Conversation, PendingToolUse, Phase};
pub use dispatch::{SharedDispatcher, ToolDispatcher, ToolInput, ToolOutcome};
pub use envelope::ToolResultEnvelope;
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use fallback::LocalFallback;
pub use intercept::InterceptingDispatcher;
pub use mcp::McpBackend;
pub use session::{Session, SessionConfig};
