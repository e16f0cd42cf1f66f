//! Streaming event types and SSE decoding

use crate::error::{Error, Result};
use serde::Deserialize;
use std::pin::Pin;
use tokio_stream::Stream;

/// Content block type that marks a tool invocation
pub const TOOL_USE_BLOCK: &str = "tool_use";

/// Delta type tags that carry tool-argument JSON fragments.
///
/// The upstream API has used several names for the same thing.
pub const TOOL_ARGUMENT_DELTA_TYPES: &[&str] =
    &["input_json_delta", "tool_use_delta", "tool_input_delta"];

/// Events received while a response streams
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Response started
    MessageStart,
    /// A content block opened at `index`
    ContentBlockStart { index: usize, block: BlockStart },
    /// A fragment for the content block at `index`
    ContentBlockDelta { index: usize, delta: BlockDelta },
    /// The content block at `index` is complete
    ContentBlockStop { index: usize },
    /// Message-level update, optionally with trailing text
    MessageDelta {
        text: Option<String>,
        stop_reason: Option<String>,
    },
    /// Response complete
    MessageStop,
    /// The upstream reported an error
    Error { error: ApiError },
}

impl StreamEvent {
    /// Check if this event ends the response
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::MessageStop | StreamEvent::Error { .. })
    }

    /// Decode one server-sent event.
    ///
    /// The kind comes from the payload's `type` field, falling back to the SSE
    /// event name. An `error` object anywhere at the top level wins over the
    /// kind. Unknown kinds and malformed payloads decode to `None`.
    pub fn decode(event_name: &str, data: &str) -> Option<StreamEvent> {
        match Self::parse(event_name, data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping malformed {} event: {}", event_name, e);
                None
            }
        }
    }

    fn parse(event_name: &str, data: &str) -> Result<Option<StreamEvent>> {
        let raw: RawEvent = serde_json::from_str(data)?;

        if let Some(error) = raw.error {
            return Ok(Some(StreamEvent::Error { error }));
        }

        let kind = raw
            .kind
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(event_name);

        let event = match kind {
            "message_start" => StreamEvent::MessageStart,
            "content_block_start" => {
                let index = require_index(raw.index, kind)?;
                let block = raw.content_block.ok_or_else(|| {
                    Error::UnexpectedResponse("content_block_start without content_block".into())
                })?;
                StreamEvent::ContentBlockStart { index, block }
            }
            "content_block_delta" => {
                let index = require_index(raw.index, kind)?;
                let delta = match raw.delta {
                    Some(delta) => serde_json::from_value(delta)?,
                    None => {
                        return Err(Error::UnexpectedResponse(
                            "content_block_delta without delta".into(),
                        ));
                    }
                };
                StreamEvent::ContentBlockDelta { index, delta }
            }
            "content_block_stop" => StreamEvent::ContentBlockStop {
                index: require_index(raw.index, kind)?,
            },
            "message_delta" => {
                let delta: MessageDeltaInfo = match raw.delta {
                    Some(delta) => serde_json::from_value(delta)?,
                    None => MessageDeltaInfo::default(),
                };
                StreamEvent::MessageDelta {
                    text: delta.text,
                    stop_reason: delta.stop_reason,
                }
            }
            "message_stop" => StreamEvent::MessageStop,
            other => {
                tracing::debug!("Ignoring stream event: {}", other);
                return Ok(None);
            }
        };

        Ok(Some(event))
    }
}

fn require_index(index: Option<usize>, kind: &str) -> Result<usize> {
    index.ok_or_else(|| Error::UnexpectedResponse(format!("{} without index", kind)))
}

/// Header of a content block
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BlockStart {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub text: Option<String>,
}

impl BlockStart {
    /// A text block
    pub fn text() -> Self {
        Self {
            kind: "text".to_string(),
            ..Default::default()
        }
    }

    /// A tool invocation block
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: TOOL_USE_BLOCK.to_string(),
            id: Some(id.into()),
            name: Some(name.into()),
            text: None,
        }
    }

    /// Whether this block is a tool invocation
    pub fn is_tool_use(&self) -> bool {
        self.kind == TOOL_USE_BLOCK
    }
}

/// A fragment of a content block
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BlockDelta {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub text: Option<String>,
    pub partial_json: Option<String>,
}

impl BlockDelta {
    /// A plain text fragment
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text_delta".to_string(),
            text: Some(text.into()),
            partial_json: None,
        }
    }

    /// A tool-argument JSON fragment
    pub fn input_json(fragment: impl Into<String>) -> Self {
        Self {
            kind: "input_json_delta".to_string(),
            text: None,
            partial_json: Some(fragment.into()),
        }
    }

    /// Whether this delta carries tool-argument JSON
    pub fn is_tool_argument(&self) -> bool {
        TOOL_ARGUMENT_DELTA_TYPES.contains(&self.kind.as_str())
    }
}

/// Error payload reported by the upstream API
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        Error::api(e.error_type, e.message)
    }
}

/// A stream of decoded events; transport failures arrive as `Err`
pub type StreamEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    index: Option<usize>,
    content_block: Option<BlockStart>,
    delta: Option<serde_json::Value>,
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaInfo {
    text: Option<String>,
    stop_reason: Option<String>,
}
