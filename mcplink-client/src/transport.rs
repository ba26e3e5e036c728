//! The byte-level transports this client reads from.
//!
//! The MCP-Link server pushes everything to us as Server-Sent Events, decoded by [`SseCodec`].
//! Discovery of the server also involves reading the output of a helper program launched as a
//! child process.

pub(crate) mod child_process;
mod sse;

pub use sse::*;
