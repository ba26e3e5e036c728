use std::path::PathBuf;
use std::time::Duration;

use mcplink_core::models;
use mcplink_jsonrpc as jsonrpc;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::connection::ConnectionState;
use crate::transport::SseCodecError;

pub type Result<T, E = McpLinkError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum McpLinkError {
    #[error("Error building the HTTP client")]
    HttpClient { source: reqwest::Error },

    #[error("Invalid MCP-Link server URL '{url}'")]
    InvalidUrl { url: String, source: url::ParseError },

    #[error("Handshake with the event stream at '{url}' failed")]
    Handshake { url: String, source: HandshakeError },

    #[error("Error sending '{method}' to '{url}'")]
    Transport {
        method: String,
        url: String,
        source: reqwest::Error,
    },

    #[error("Server answered '{method}' with HTTP status {status} instead of 202 Accepted")]
    UnexpectedStatus {
        method: String,
        status: StatusCode,
        body: String,
    },

    #[error("Timed out after {timeout:?} waiting for the reply to '{method}' (request {id})")]
    TimedOut {
        method: String,
        id: jsonrpc::Id,
        timeout: Duration,
    },

    #[error("Server returned an error for '{method}': {error}")]
    MethodError {
        method: String,
        error: jsonrpc::ErrorDetails,
    },

    #[error("Error deserializing the reply to '{method}' into {type_name}")]
    DeserResult {
        method: String,
        type_name: &'static str,
        source: serde_json::Error,
        result: JsonValue,
    },

    #[error(transparent)]
    JsonRpc {
        #[from]
        source: jsonrpc::JsonRpcError,
    },

    #[error("Connection is {actual} but this operation requires it to be {expected}")]
    InvalidState {
        expected: ConnectionState,
        actual: ConnectionState,
    },

    #[error("Server does not offer the '{}' tool, so tools cannot be registered", models::REMOTE_TOOL_NAME)]
    RemoteToolMissing,

    #[error("Server did not accept the registration of tool '{tool_name}'")]
    RegistrationRejected { tool_name: String, response: JsonValue },

    #[error(transparent)]
    Discovery {
        #[from]
        source: DiscoveryError,
    },
}

impl McpLinkError {
    /// Whether this failure happened while moving the request to the server (as opposed to
    /// waiting for or interpreting its reply).
    pub fn is_transport(&self) -> bool {
        matches!(self, McpLinkError::Transport { .. } | McpLinkError::UnexpectedStatus { .. })
    }
}

/// Ways the opening of the event stream can fail.  All of them leave the connection closed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Error sending the event stream request")]
    Request { source: reqwest::Error },

    #[error("Server responded to the event stream request with HTTP status {status}")]
    Status { status: StatusCode },

    #[error("Error reading the event stream")]
    Read { source: SseCodecError },

    #[error("Event stream ended before the endpoint event arrived")]
    StreamEnded,

    #[error("Expected the first event to be 'endpoint' but got '{event}'")]
    UnexpectedEvent { event: String, data: String },

    #[error("No endpoint event within the first {max_lines} lines of the event stream")]
    TooManyLines { max_lines: usize },

    #[error("No endpoint event within {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("Endpoint '{endpoint}' is not a valid URL or path")]
    InvalidEndpoint { endpoint: String, source: url::ParseError },

    #[error("Endpoint '{endpoint}' does not carry a session_id")]
    MissingSessionId { endpoint: String },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("No native messaging manifest found; searched {}",
        .searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    ManifestNotFound { searched: Vec<PathBuf> },

    #[error("Error reading native messaging manifest '{}'", .path.display())]
    ReadManifest { path: PathBuf, source: std::io::Error },

    #[error("Native messaging manifest '{}' is not valid JSON", .path.display())]
    ParseManifest { path: PathBuf, source: serde_json::Error },

    #[error("Native messaging manifest '{}' does not point to an existing helper program", .manifest.display())]
    HelperMissing {
        manifest: PathBuf,
        helper: Option<PathBuf>,
    },

    #[error("Error spawning helper '{program}' with args [{args}] as child process",
        args = .args.join(" ")
    )]
    SpawnHelper {
        source: std::io::Error,
        program: String,
        args: Vec<String>,
    },

    #[error("Error reading output of the helper")]
    ReadHelper { source: std::io::Error },

    #[error("Helper did not print its configuration within {timeout:?}")]
    HelperTimedOut { timeout: Duration },

    #[error("Helper exited without printing a complete JSON object")]
    HelperExited { output: String },

    #[error("Helper printed a configuration that could not be understood")]
    InvalidHelperOutput { source: serde_json::Error, output: JsonValue },

    #[error("Helper configuration has no MCP server with a URL")]
    NoServer,

    #[error("MCP server '{server}' has no Authorization header in the helper configuration")]
    NoAuthorization { server: String },

    #[error("MCP server '{server}' has an invalid URL '{url}'")]
    InvalidServerUrl {
        server: String,
        url: String,
        source: url::ParseError,
    },
}
