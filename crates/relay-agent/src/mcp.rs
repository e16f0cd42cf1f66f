//! MCP server as a tool backend
//!
//! The server runs as a child process speaking MCP over stdio.

use async_trait::async_trait;
use relay_ai::ToolDescriptor;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParams, CallToolResult, Tool},
    service::{RoleClient, RunningService},
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use tokio::process::Command;

use crate::backend::{BackendError, ToolBackend};
use crate::dispatch::ToolInput;

/// A tool backend connected to an MCP server process
pub struct McpBackend {
    command: String,
    service: RunningService<RoleClient, ()>,
}

impl McpBackend {
    /// Spawn an MCP server and connect to it.
    pub async fn spawn(
        command: impl AsRef<str>,
        args: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, BackendError> {
        let command_str = command.as_ref().to_string();
        let args_vec: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();

        tracing::debug!("Spawning MCP server: {} {:?}", command_str, args_vec);

        let transport = TokioChildProcess::new(Command::new(&command_str).configure(|cmd| {
            for arg in &args_vec {
                cmd.arg(arg);
            }
        }))
        .map_err(|e| BackendError::Unavailable(format!("{}: {}", command_str, e)))?;

        let service = ()
            .serve(transport)
            .await
            .map_err(|e| BackendError::Unavailable(format!("{}: {}", command_str, e)))?;

        Ok(Self {
            command: command_str,
            service,
        })
    }
}

#[async_trait]
impl ToolBackend for McpBackend {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BackendError> {
        let response = self
            .service
            .list_tools(Default::default())
            .await
            .map_err(|e| BackendError::Unavailable(format!("{}: {}", self.command, e)))?;
        Ok(response.tools.into_iter().map(descriptor_from).collect())
    }

    async fn call_tool(&self, name: &str, input: ToolInput) -> Result<String, BackendError> {
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments: Some(input),
            meta: None,
            task: None,
        };

        let result = self
            .service
            .call_tool(params)
            .await
            .map_err(|e| BackendError::NoResult {
                tool: name.to_string(),
                reason: e.to_string(),
            })?;

        result_text(name, result)
    }
}

fn descriptor_from(tool: Tool) -> ToolDescriptor {
    ToolDescriptor::new(tool.name, tool.description.map(|d| d.into_owned()))
        .with_schema(serde_json::Value::Object((*tool.input_schema).clone()))
}

/// Flatten a call result into text; a flagged error yields no result
fn result_text(name: &str, result: CallToolResult) -> Result<String, BackendError> {
    let text = result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.clone()))
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error.unwrap_or(false) {
        return Err(BackendError::NoResult {
            tool: name.to_string(),
            reason: if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text
            },
        });
    }

    Ok(text)
}
