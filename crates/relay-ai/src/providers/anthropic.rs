//! Anthropic Messages API provider

use super::ModelClient;
use crate::{
    error::{Error, Result},
    stream::{StreamEvent, StreamEventStream},
    types::{ApiMessage, ChatRequest, ToolDescriptor},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::Serialize;

const API_VERSION: &str = "2023-06-01";

/// Anthropic API client
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.api_key).map_err(|_| Error::InvalidApiKey)?;
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert("accept", HeaderValue::from_static("text/event-stream"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl ModelClient for AnthropicProvider {
    async fn stream(&self, request: &ChatRequest) -> Result<StreamEventStream> {
        let body = build_request(request);
        let url = format!("{}/v1/messages", request.model.base_url.trim_end_matches('/'));

        tracing::debug!(
            "Anthropic API URL: {} ({} messages, {} tools)",
            url,
            body.messages.len(),
            body.tools.as_ref().map_or(0, Vec::len)
        );

        let request_builder = self.client.post(&url).headers(self.headers()?).json(&body);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

/// Decode SSE messages until the response ends
fn create_stream(
    mut event_source: EventSource,
) -> impl futures::Stream<Item = Result<StreamEvent>> {
    stream! {
        while let Some(event_result) = event_source.next().await {
            match event_result {
                Ok(Event::Open) => {
                    tracing::debug!("Event stream opened");
                }
                Ok(Event::Message(message)) => {
                    if let Some(event) = StreamEvent::decode(&message.event, &message.data) {
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            break;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    yield Err(Error::Sse(e.to_string()));
                    break;
                }
            }
        }

        event_source.close();
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool<'a>>>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    input_schema: serde_json::Value,
}

fn build_request(request: &ChatRequest) -> AnthropicRequest<'_> {
    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(request.tools.iter().map(convert_tool).collect())
    };

    AnthropicRequest {
        model: &request.model.id,
        messages: &request.messages,
        max_tokens: request.model.max_tokens,
        stream: true,
        system: request.system_prompt.as_deref().filter(|s| !s.is_empty()),
        temperature: request.temperature,
        tools,
    }
}

fn convert_tool(tool: &ToolDescriptor) -> AnthropicTool<'_> {
    let input_schema = if tool.input_schema.is_object() {
        let mut schema = tool.input_schema.clone();
        if let Some(obj) = schema.as_object_mut() {
            obj.entry("type").or_insert(serde_json::json!("object"));
        }
        schema
    } else {
        serde_json::json!({ "type": "object" })
    };

    AnthropicTool {
        name: &tool.name,
        description: tool.description.as_deref(),
        input_schema,
    }
}
