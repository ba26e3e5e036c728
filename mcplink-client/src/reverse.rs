//! Handling the tool invocations the server pushes to us.
//!
//! The reader puts each reverse call on a [`ReverseCallQueue`] in the order it was decoded.  A
//! [`ReverseCallDispatcher`] takes them off, runs the handler registered for the tool in a
//! [`ToolRouter`], and POSTs the handler's [`ToolResult`] back to the server.
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use mcplink_core::models::{ReverseCallEnvelope, ToolResult};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::client::RpcClient;

/// Reverse calls received on the event stream, waiting to be handled.
///
/// Cloning gives another handle on the same queue.  Any number of consumers can take calls off
/// it; they get them in the order the server sent them.
#[derive(Clone, Debug)]
pub struct ReverseCallQueue {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<ReverseCallEnvelope>>>,
}

impl ReverseCallQueue {
    pub(crate) fn new() -> (mpsc::UnboundedSender<ReverseCallEnvelope>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                receiver: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Wait for the next reverse call.
    ///
    /// Returns `None` once the event stream has closed and every call received on it has been
    /// taken.
    pub async fn recv(&self) -> Option<ReverseCallEnvelope> {
        self.receiver.lock().await.recv().await
    }

    /// Take the next reverse call if one is waiting right now.
    pub fn try_recv(&self) -> Option<ReverseCallEnvelope> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }
}

/// Implementation of a tool the server can invoke through a reverse call.
///
/// Any `Fn(JsonValue) -> impl Future<Output = ToolResult>` closure is a handler.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Run the tool on the `input` of a reverse call.
    ///
    /// Failures are reported by returning [`ToolResult::error`]; there's no other way to tell the
    /// server about them.
    async fn call(&self, input: JsonValue) -> ToolResult;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    async fn call(&self, input: JsonValue) -> ToolResult {
        (self)(input).await
    }
}

/// Maps tool names to their handlers.
///
/// Cheap to clone; clones share the same handlers, so a handler registered through one clone is
/// visible to all of them.
#[derive(Clone, Default)]
pub struct ToolRouter {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn ToolHandler>>>>,
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter").field("tools", &self.tool_names()).finish()
    }
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tool`, replacing any handler already registered for it.
    pub fn register(&self, tool: impl Into<String>, handler: impl ToolHandler) {
        let tool = tool.into();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(tool.clone(), Arc::new(handler)).is_some() {
            tracing::warn!(%tool, "Replaced existing handler for tool");
        }
    }

    pub fn with_handler(self, tool: impl Into<String>, handler: impl ToolHandler) -> Self {
        self.register(tool, handler);
        self
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(tool)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Run the handler for this call's tool and return the result to send back.
    ///
    /// This always produces a result: an unknown tool or a handler that panics is turned into an
    /// error result.
    pub async fn dispatch(&self, call: &ReverseCallEnvelope) -> ToolResult {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&call.tool)
            .cloned();

        let Some(handler) = handler else {
            tracing::warn!(tool = %call.tool, call_id = %call.call_id, "Reverse call for unknown tool");
            return ToolResult::unknown_tool(&call.tool);
        };

        match AssertUnwindSafe(handler.call(call.input.clone()))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(tool = %call.tool, call_id = %call.call_id, "Tool handler panicked");
                ToolResult::error(format!("Tool '{}' failed unexpectedly", call.tool))
            }
        }
    }
}

/// Takes reverse calls off a queue, runs them, and sends back the results.
#[derive(Clone, Debug)]
pub struct ReverseCallDispatcher {
    client: RpcClient,
    router: ToolRouter,
}

impl ReverseCallDispatcher {
    pub fn new(client: RpcClient, router: ToolRouter) -> Self {
        Self { client, router }
    }

    pub fn router(&self) -> &ToolRouter {
        &self.router
    }

    /// Handle one reverse call: run it and POST the result as the reply.
    #[tracing::instrument(skip_all, fields(tool = %call.tool, call_id = %call.call_id))]
    pub async fn handle(&self, call: ReverseCallEnvelope) -> Result<()> {
        let result = self.router.dispatch(&call).await;
        self.client.reply_to_reverse_call(&call.call_id, result).await
    }

    /// Handle reverse calls one at a time, in the order they were received, until the queue is
    /// closed or `cancellation_token` is cancelled.
    ///
    /// A failure to send a reply is logged and doesn't stop the loop.  Returns the number of
    /// calls handled.
    pub async fn run(&self, queue: ReverseCallQueue, cancellation_token: CancellationToken) -> usize {
        let mut handled = 0;

        loop {
            let call = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                call = queue.recv() => match call {
                    Some(call) => call,
                    None => break,
                },
            };

            let call_id = call.call_id.clone();
            if let Err(e) = self.handle(call).await {
                tracing::error!(%call_id, error = %e, "Failed to reply to reverse call");
            }
            handled += 1;
        }

        tracing::debug!(handled, "Reverse call dispatcher stopped");
        handled
    }

    /// Like [`Self::run`], but each call runs in its own task as soon as it's taken off the
    /// queue, so a slow tool doesn't hold up the others.
    ///
    /// Calls still running when the loop stops are allowed to finish before this returns.
    pub async fn run_concurrent(&self, queue: ReverseCallQueue, cancellation_token: CancellationToken) -> usize {
        let mut tasks = tokio::task::JoinSet::new();
        let mut handled = 0;

        loop {
            let call = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        tracing::error!(error = %e, "Reverse call task failed");
                    }
                    continue;
                }
                call = queue.recv() => match call {
                    Some(call) => call,
                    None => break,
                },
            };

            let dispatcher = self.clone();
            tasks.spawn(async move {
                let call_id = call.call_id.clone();
                if let Err(e) = dispatcher.handle(call).await {
                    tracing::error!(%call_id, error = %e, "Failed to reply to reverse call");
                }
            });
            handled += 1;
        }

        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                tracing::error!(error = %e, "Reverse call task failed");
            }
        }

        tracing::debug!(handled, "Reverse call dispatcher stopped");
        handled
    }
}
