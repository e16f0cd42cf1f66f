//! Model API clients

pub mod anthropic;

use crate::{ChatRequest, Error, Result, StreamEventStream};
use async_trait::async_trait;

/// A streaming model API
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Issue `request` and stream back the decoded response events
    async fn stream(&self, request: &ChatRequest) -> Result<StreamEventStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or(Error::InvalidApiKey)
}
