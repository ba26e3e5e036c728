//! Protocol models shared by everything that talks to an MCP-Link server.
//!
//! These are the shapes of the payloads carried inside the JSON-RPC envelopes: tool results,
//! reverse-call envelopes pushed by the server, the tool list, and the registration request for
//! the server's `remote` tool.  None of this knows anything about how the envelopes are
//! transported.
pub mod models;
