//! The JSON-RPC 2.0 layer of `mcplink`.
//!
//! An MCP-Link server speaks plain JSON-RPC, but over an unusual pair of transports: requests are
//! sent as HTTP POSTs and their responses are pushed back, asynchronously, over a Server-Sent
//! Events stream.  This crate holds the parts of that which don't care about HTTP or SSE at all:
//! the message types, and the [`CorrelationTable`] that matches responses to the requests waiting
//! for them.
//!
//! The transports themselves, and everything MCP-specific, live in `mcplink-client`.

mod correlation;
mod error;
#[cfg(test)]
pub mod testing;
mod types;

pub use correlation::{CorrelationTable, PendingCall};
pub use error::{JsonRpcError, Result};
pub use types::{
    ErrorCode, ErrorDetails, ErrorResponse, Id, JsonValue, Request, Response, ResponsePayload, SuccessResponse,
    TwoPointZero,
};
