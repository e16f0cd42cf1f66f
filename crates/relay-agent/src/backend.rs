//! Remote tool backends and late-bound routing
//!
//! A [`BackendHandle`] starts out pending and is resolved exactly once, either
//! with a live [`ToolBackend`] or with the reason none is available. The
//! [`RoutingDispatcher`] sends calls to the backend once it is live and to the
//! local fallback otherwise.

use async_trait::async_trait;
use relay_ai::ToolDescriptor;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{ToolDispatcher, ToolInput, ToolOutcome};
use crate::error::{Error, Result};
use crate::fallback::LocalFallback;

/// Errors reported by a tool backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached or started
    #[error("Tool backend unavailable: {0}")]
    Unavailable(String),

    /// The backend produced no result for a call
    #[error("No result from {tool}: {reason}")]
    NoResult { tool: String, reason: String },
}

/// An external tool-execution service
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// The tools the backend offers
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDescriptor>, BackendError>;

    /// Run a tool. `Err` means there is no result to show.
    async fn call_tool(
        &self,
        name: &str,
        input: ToolInput,
    ) -> std::result::Result<String, BackendError>;
}

/// Observable state of a [`BackendHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Pending,
    Ready,
    Unavailable(String),
}

#[derive(Clone)]
enum BackendState {
    Pending,
    Ready(Arc<dyn ToolBackend>),
    Unavailable(String),
}

impl BackendState {
    fn is_pending(&self) -> bool {
        matches!(self, BackendState::Pending)
    }
}

/// A cloneable, resolve-once slot for a tool backend.
#[derive(Clone)]
pub struct BackendHandle {
    tx: Arc<watch::Sender<BackendState>>,
    rx: watch::Receiver<BackendState>,
}

impl BackendHandle {
    /// A handle that will be resolved later
    pub fn pending() -> Self {
        Self::with_state(BackendState::Pending)
    }

    /// A handle that is already live
    pub fn ready(backend: Arc<dyn ToolBackend>) -> Self {
        Self::with_state(BackendState::Ready(backend))
    }

    /// A handle that will never be live
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::with_state(BackendState::Unavailable(reason.into()))
    }

    fn with_state(state: BackendState) -> Self {
        let (tx, rx) = watch::channel(state);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Resolve with a live backend
    pub fn resolve(&self, backend: Arc<dyn ToolBackend>) -> Result<()> {
        self.settle(BackendState::Ready(backend))
    }

    /// Resolve as unavailable
    pub fn fail(&self, reason: impl Into<String>) -> Result<()> {
        self.settle(BackendState::Unavailable(reason.into()))
    }

    fn settle(&self, next: BackendState) -> Result<()> {
        let mut next = Some(next);
        let changed = self.tx.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            match next.take() {
                Some(next) => {
                    *state = next;
                    true
                }
                None => false,
            }
        });

        if changed {
            tracing::debug!("Tool backend resolved: {:?}", self.status());
            Ok(())
        } else {
            Err(Error::AlreadyResolved)
        }
    }

    /// Current state
    pub fn status(&self) -> BackendStatus {
        match &*self.rx.borrow() {
            BackendState::Pending => BackendStatus::Pending,
            BackendState::Ready(_) => BackendStatus::Ready,
            BackendState::Unavailable(reason) => BackendStatus::Unavailable(reason.clone()),
        }
    }

    /// The live backend, if resolved
    pub fn current(&self) -> Option<Arc<dyn ToolBackend>> {
        match &*self.rx.borrow() {
            BackendState::Ready(backend) => Some(Arc::clone(backend)),
            _ => None,
        }
    }

    /// Wait until the handle is resolved. Returns whether a backend is live.
    pub async fn settled(&self) -> bool {
        let mut rx = self.rx.clone();
        match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => matches!(&*state, BackendState::Ready(_)),
            Err(_) => false,
        }
    }
}

/// Sends tool calls to the live backend, or to the local fallback
pub struct RoutingDispatcher {
    backend: BackendHandle,
    fallback: Arc<LocalFallback>,
}

impl RoutingDispatcher {
    pub fn new(backend: BackendHandle, fallback: Arc<LocalFallback>) -> Self {
        Self { backend, fallback }
    }
}

#[async_trait]
impl ToolDispatcher for RoutingDispatcher {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        if !self.backend.settled().await {
            tracing::debug!("No tool backend, offering local tools");
            return self.fallback.list_tools().await;
        }
        match self.backend.current() {
            Some(backend) => Ok(backend.list_tools().await?),
            None => self.fallback.list_tools().await,
        }
    }

    async fn invoke(&self, name: &str, input: ToolInput, cancel: CancellationToken) -> ToolOutcome {
        let live = tokio::select! {
            _ = cancel.cancelled() => return ToolOutcome::cancelled(),
            live = self.backend.settled() => live,
        };
        let Some(backend) = self.backend.current().filter(|_| live) else {
            return self.fallback.invoke(name, input, cancel).await;
        };

        tokio::select! {
            _ = cancel.cancelled() => ToolOutcome::cancelled(),
            result = backend.call_tool(name, input) => match result {
                Ok(text) => ToolOutcome::classify(text),
                Err(e) => {
                    tracing::warn!("Tool {} failed: {}", name, e);
                    ToolOutcome::failed(e)
                }
            },
        }
    }
}
