//! Route selected tool names to a different dispatcher

use async_trait::async_trait;
use relay_ai::ToolDescriptor;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{SharedDispatcher, ToolDispatcher, ToolInput, ToolOutcome};
use crate::error::Result;

/// Sends a fixed set of tool names to an override dispatcher and everything
/// else to the inner one.
pub struct InterceptingDispatcher {
    names: HashSet<String>,
    overrides: SharedDispatcher,
    inner: SharedDispatcher,
}

impl InterceptingDispatcher {
    pub fn new(
        names: impl IntoIterator<Item = impl Into<String>>,
        overrides: SharedDispatcher,
        inner: SharedDispatcher,
    ) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            overrides,
            inner,
        }
    }

    /// Whether calls to `name` go to the override dispatcher
    pub fn intercepts(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[async_trait]
impl ToolDispatcher for InterceptingDispatcher {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = self.inner.list_tools().await?;
        let overrides: Vec<ToolDescriptor> = self
            .overrides
            .list_tools()
            .await?
            .into_iter()
            .filter(|t| self.intercepts(&t.name))
            .collect();

        for tool in overrides {
            match tools.iter_mut().find(|t| t.name == tool.name) {
                Some(existing) => *existing = tool,
                None => tools.push(tool),
            }
        }

        Ok(tools)
    }

    async fn invoke(&self, name: &str, input: ToolInput, cancel: CancellationToken) -> ToolOutcome {
        if self.intercepts(name) {
            tracing::debug!("Intercepting tool call: {}", name);
            self.overrides.invoke(name, input, cancel).await
        } else {
            self.inner.invoke(name, input, cancel).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Named {
        label: &'static str,
        tools: Vec<&'static str>,
    }

    #[async_trait]
    impl ToolDispatcher for Named {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(self
                .tools
                .iter()
                .map(|name| ToolDescriptor::new(*name, Some(self.label.to_string())))
                .collect())
        }

        async fn invoke(&self, name: &str, _input: ToolInput, _cancel: CancellationToken) -> ToolOutcome {
            ToolOutcome::text(format!("{}:{}", self.label, name))
        }
    }

    fn dispatcher() -> InterceptingDispatcher {
        InterceptingDispatcher::new(
            ["view", "edit"],
            Arc::new(Named {
                label: "local",
                tools: vec!["view", "edit", "secret"],
            }),
            Arc::new(Named {
                label: "remote",
                tools: vec!["LS", "view"],
            }),
        )
    }

    #[tokio::test]
    async fn test_routes_by_name() {
        let d = dispatcher();
        let view = d.invoke("view", ToolInput::new(), CancellationToken::new()).await;
        let ls = d.invoke("LS", ToolInput::new(), CancellationToken::new()).await;
        assert_eq!(view.text, "local:view");
        assert_eq!(ls.text, "remote:LS");
    }

    #[tokio::test]
    async fn test_catalogue_is_merged() {
        let tools = dispatcher().list_tools().await.unwrap();
        let summary: Vec<(String, Option<String>)> = tools
            .into_iter()
            .map(|t| (t.name, t.description))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("LS".to_string(), Some("remote".to_string())),
                ("view".to_string(), Some("local".to_string())),
                ("edit".to_string(), Some("local".to_string())),
            ]
        );
    }
}
