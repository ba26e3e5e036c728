//! Making our tools known to the server.
//!
//! An MCP-Link server only offers tools provided by clients after they've been registered through
//! its `remote` tool.  Once registered, invocations of a tool arrive on the event stream as reverse
//! calls.
use std::time::Duration;

use mcplink_core::models::{self, ListToolsResult, Method, ToolRegistration};
use serde_json::{Value as JsonValue, json};

use crate::client::RpcClient;
use crate::{McpLinkError, Result};

impl RpcClient {
    /// List the tools the server offers.
    pub async fn list_tools(&self, timeout: Duration) -> Result<ListToolsResult> {
        self.call_with_params(Method::ToolsList.as_str(), json!({}), timeout)
            .await
    }

    /// Fail with [`McpLinkError::RemoteToolMissing`] unless the server offers the tool needed to
    /// register tools.
    pub async fn require_remote_tool(&self, timeout: Duration) -> Result<ListToolsResult> {
        let tools = self.list_tools(timeout).await?;
        if !tools.has_remote_tool() {
            return Err(McpLinkError::RemoteToolMissing);
        }
        Ok(tools)
    }

    /// Register a tool with the server.
    ///
    /// The server reports the outcome as the text of a tool result rather than as a JSON-RPC
    /// error, so a registration only counts as successful if that text says so.
    #[tracing::instrument(skip_all, fields(tool_name = %registration.tool_name))]
    pub async fn register_tool(&self, registration: &ToolRegistration, timeout: Duration) -> Result<()> {
        let result = self
            .call(Method::ToolsCall.as_str(), registration.to_call_params(), timeout)
            .await?;

        if registration_succeeded(&result) {
            tracing::info!("Tool registered");
            Ok(())
        } else {
            tracing::error!(%result, "Server rejected tool registration");
            Err(McpLinkError::RegistrationRejected {
                tool_name: registration.tool_name.clone(),
                response: result,
            })
        }
    }
}

fn registration_succeeded(result: &JsonValue) -> bool {
    result
        .get("content")
        .and_then(|content| content.get(0))
        .and_then(|item| item.get("text"))
        .and_then(JsonValue::as_str)
        .is_some_and(|text| text.contains(models::REGISTRATION_SUCCESS_MARKER))
}
