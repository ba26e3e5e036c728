//! Sending requests to the server and waiting for their replies.
use std::time::Duration;

use mcplink_core::models::{self, Method, ToolResult};
use mcplink_jsonrpc::{self as jsonrpc, CorrelationTable, JsonValue};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::{McpLinkError, Result};

/// Handle for making JSON-RPC calls over an open connection.
///
/// Each request is POSTed to the session's reply path, where the server only acknowledges it with
/// `202 Accepted`.  The actual reply arrives later on the event stream, where the connection's
/// reader hands it to the [`CorrelationTable`] this client registered the request in.
///
/// Cheap to clone; all clones share the same HTTP client and correlation table.
#[derive(Clone, Debug)]
pub struct RpcClient {
    http: reqwest::Client,
    reply_url: Url,
    authorization: String,
    table: CorrelationTable,
    post_timeout: Duration,
    default_call_timeout: Duration,
}

impl RpcClient {
    pub(crate) fn new(
        http: reqwest::Client,
        reply_url: Url,
        authorization: String,
        table: CorrelationTable,
        post_timeout: Duration,
        default_call_timeout: Duration,
    ) -> Self {
        Self {
            http,
            reply_url,
            authorization,
            table,
            post_timeout,
            default_call_timeout,
        }
    }

    /// The session-scoped URL every request is POSTed to
    pub fn reply_url(&self) -> &Url {
        &self.reply_url
    }

    /// Timeout used by the convenience methods that don't take one
    pub fn default_call_timeout(&self) -> Duration {
        self.default_call_timeout
    }

    /// Number of requests currently waiting for their reply
    pub fn pending_requests(&self) -> usize {
        self.table.len()
    }

    /// Invoke `method` on the server and wait up to `timeout` for its result.
    ///
    /// Fails immediately if the POST fails or is answered with anything but `202 Accepted`.  If
    /// the server replies with a JSON-RPC error, that is [`McpLinkError::MethodError`].  However
    /// this returns, the request is no longer pending afterwards, so a late reply is dropped.
    #[tracing::instrument(skip(self, params), fields(request_id))]
    pub async fn call(&self, method: &str, params: JsonValue, timeout: Duration) -> Result<JsonValue> {
        let id = jsonrpc::Id::random();
        tracing::Span::current().record("request_id", tracing::field::display(&id));

        let pending = self.table.register(id.clone())?;
        let request = jsonrpc::Request::new(id, method, params);

        self.post(&request).await?;
        tracing::trace!("Request accepted; waiting for reply");

        let payload = pending.wait(timeout).await.map_err(|e| match e {
            jsonrpc::JsonRpcError::TimedOut { id } => McpLinkError::TimedOut {
                method: method.to_string(),
                id,
                timeout,
            },
            other => other.into(),
        })?;

        payload.into_result().map_err(|error| McpLinkError::MethodError {
            method: method.to_string(),
            error,
        })
    }

    /// Typed wrapper around [`Self::call`].
    pub async fn call_with_params<Req, Resp>(&self, method: &str, params: Req, timeout: Duration) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| jsonrpc::JsonRpcError::SerRequest {
            source: e,
            type_name: std::any::type_name::<Req>(),
        })?;

        let result = self.call(method, params, timeout).await?;

        serde_json::from_value(result.clone()).map_err(|e| McpLinkError::DeserResult {
            method: method.to_string(),
            type_name: std::any::type_name::<Resp>(),
            source: e,
            result,
        })
    }

    /// Send the result of a reverse call back to the server.
    ///
    /// The server doesn't reply to this on the event stream, so this returns as soon as the POST
    /// has been accepted.
    #[tracing::instrument(skip(self, result), fields(is_error = result.is_error))]
    pub async fn reply_to_reverse_call(&self, call_id: &str, result: ToolResult) -> Result<()> {
        let params = serde_json::to_value(models::ToolReplyParams { result }).map_err(|e| {
            jsonrpc::JsonRpcError::SerRequest {
                source: e,
                type_name: std::any::type_name::<models::ToolReplyParams>(),
            }
        })?;

        let request = jsonrpc::Request::new(jsonrpc::Id::from(call_id), Method::ToolsReply.as_str(), params);
        self.post(&request).await
    }

    /// POST one request to the reply path; only `202 Accepted` is success.
    async fn post(&self, request: &jsonrpc::Request) -> Result<()> {
        let body = request.to_json_string()?;

        let response = self
            .http
            .post(self.reply_url.clone())
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.post_timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| McpLinkError::Transport {
                method: request.method.clone(),
                url: self.reply_url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(method = %request.method, %status, %body, "Server did not accept request");
            return Err(McpLinkError::UnexpectedStatus {
                method: request.method.clone(),
                status,
                body,
            });
        }

        Ok(())
    }
}
