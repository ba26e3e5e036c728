//! Provide tools to the AI behind an MCP-Link server from a Rust program.
//!
//! This crate only re-exports the pieces that make up `mcplink`:
//!
//! - [`models`]: the payloads exchanged with the server (tool results, reverse calls, tool
//!   registrations)
//! - [`jsonrpc`]: the JSON-RPC envelopes, and the table that matches replies with requests
//! - with the `client` feature (on by default), everything in `mcplink-client`: connections,
//!   discovery of the server, and dispatch of reverse calls to tool handlers
pub use mcplink_core::models;
pub use mcplink_jsonrpc as jsonrpc;

#[cfg(feature = "client")]
pub use mcplink_client::*;
