//! relay-ai: model streaming protocol and tool-call reassembly
//!
//! This crate decodes the Anthropic Messages event stream, reassembles
//! fragmented tool-call arguments into [`Value`]s, and defines the message
//! model shared with `relay-agent`.

pub mod accumulator;
pub mod error;
pub mod interpreter;
pub mod providers;
pub mod stream;
pub mod types;
pub mod value;

pub use accumulator::{DeltaAccumulator, ToolCall, ToolInputError};
pub use error::{Error, Result};
pub use interpreter::{Action, StreamInterpreter};
pub use providers::ModelClient;
pub use stream::{ApiError, BlockDelta, BlockStart, StreamEvent, StreamEventStream};
pub use types::*;
pub use value::{Value, ValueError};
