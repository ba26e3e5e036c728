//! Client for MCP-Link servers, which speak JSON-RPC over a split transport: every request is an
//! HTTP POST answered only with `202 Accepted`, while replies, and calls the server makes into
//! this process, are pushed over a long-lived Server-Sent Events stream.
//!
//! A [`Connection`] owns that stream.  Requests are made through the [`RpcClient`] it hands out,
//! which correlates each reply with the request that is waiting for it.  Calls from the server to
//! tools provided by this process arrive on a [`ReverseCallQueue`], and a
//! [`ReverseCallDispatcher`] answers them with the handlers in a [`ToolRouter`].
//!
//! ```no_run
//! # async fn example() -> mcplink_client::Result<()> {
//! use mcplink_client::{Connection, ConnectionConfig, NativeMessagingDiscovery, ToolRouter};
//! use mcplink_core::models::ToolResult;
//!
//! let endpoint = NativeMessagingDiscovery::default().discover().await?;
//! let connection = Connection::connect(endpoint, ConnectionConfig::default()).await?;
//!
//! let router = ToolRouter::new().with_handler("echo", |input: serde_json::Value| async move {
//!     ToolResult::text(input.to_string())
//! });
//! let dispatcher = connection.dispatcher(router)?;
//! dispatcher
//!     .run(connection.reverse_calls()?, connection.cancellation_token())
//!     .await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod connection;
mod discovery;
mod error;
mod reader;
mod registration;
mod reverse;
#[cfg(test)]
mod testing;
pub mod transport;

pub use client::RpcClient;
pub use config::{ConnectionConfig, DiscoveryConfig};
pub use connection::{Connection, ConnectionState};
pub use discovery::{
    Endpoint, EndpointSource, HelperConfig, MANIFEST_FILE_NAME, NativeMessagingDiscovery, NativeMessagingManifest,
    manifest_search_paths,
};
pub use error::{DiscoveryError, HandshakeError, McpLinkError, Result};
pub use reader::{DecodeError, InboundFrame, ReaderExit};
pub use reverse::{ReverseCallDispatcher, ReverseCallQueue, ToolHandler, ToolRouter};
