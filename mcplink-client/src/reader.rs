//! The task that owns the event stream once the connection is open.
//!
//! The data of every event pushed by the server, whatever its event type, is classified into an
//! [`InboundFrame`] and routed: replies to
//! the [`CorrelationTable`], reverse calls to the reverse-call queue.  Nothing the server sends
//! can make this task fail except the stream itself breaking; frames that can't be decoded are
//! logged and dropped.
use futures::StreamExt;
use mcplink_core::models::{ReverseCallEnvelope, ReverseCallFrame};
use mcplink_jsonrpc::{self as jsonrpc, CorrelationTable};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::{EventStream, SseCodecError, SseEvent};

/// Name of the event that carries the reply path, which is only meaningful as the first event
pub(crate) const ENDPOINT_EVENT: &str = "endpoint";

/// A decoded message pushed by the server
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// The reply to a request this client made
    Reply {
        id: jsonrpc::Id,
        payload: jsonrpc::ResponsePayload,
    },
    /// The server wants one of our tools invoked
    ReverseCall(ReverseCallEnvelope),
    /// Valid JSON, but nothing this client knows how to handle
    Unrecognized(JsonValue),
}

/// Why an event's data could not be decoded into an [`InboundFrame`]
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Event data is not valid JSON")]
    Json { source: serde_json::Error },

    #[error("Malformed reverse call")]
    ReverseCall { source: serde_json::Error },

    #[error("Malformed reply")]
    Reply { source: jsonrpc::JsonRpcError },
}

impl InboundFrame {
    /// Classify the data of one event.
    ///
    /// Anything with a `reverse` key is a reverse call, even if it also has an `id`.  Otherwise
    /// anything with an `id` must be a reply.
    pub fn decode(data: &str) -> Result<Self, DecodeError> {
        let value: JsonValue = serde_json::from_str(data).map_err(|e| DecodeError::Json { source: e })?;

        if value.get("reverse").is_some() {
            let frame: ReverseCallFrame =
                serde_json::from_value(value).map_err(|e| DecodeError::ReverseCall { source: e })?;
            Ok(InboundFrame::ReverseCall(frame.reverse))
        } else if value.get("id").is_some() {
            let response = jsonrpc::Response::from_json(value).map_err(|e| DecodeError::Reply { source: e })?;
            Ok(InboundFrame::Reply {
                id: response.id,
                payload: response.payload,
            })
        } else {
            Ok(InboundFrame::Unrecognized(value))
        }
    }
}

/// Why the reader stopped
#[derive(Debug)]
pub enum ReaderExit {
    /// The connection asked it to stop
    Stopped,
    /// The server closed the stream
    StreamEnded,
    /// The stream broke
    Failed(SseCodecError),
}

pub(crate) struct StreamReader {
    events: EventStream,
    table: CorrelationTable,
    reverse_calls: mpsc::UnboundedSender<ReverseCallEnvelope>,
    cancellation_token: CancellationToken,
}

impl StreamReader {
    pub(crate) fn new(
        events: EventStream,
        table: CorrelationTable,
        reverse_calls: mpsc::UnboundedSender<ReverseCallEnvelope>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            events,
            table,
            reverse_calls,
            cancellation_token,
        }
    }

    /// Read and dispatch events until the stream ends, breaks, or the cancellation token fires.
    ///
    /// The event stream is dropped, closing the HTTP response, when this returns.
    pub(crate) async fn run(mut self) -> ReaderExit {
        tracing::debug!("Event stream reader starting");

        let exit = loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    tracing::debug!("Stop requested; event stream reader exiting");
                    break ReaderExit::Stopped;
                }

                next = self.events.next() => {
                    match next {
                        Some(Ok(event)) => self.dispatch(event),
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Event stream failed; event stream reader exiting");
                            break ReaderExit::Failed(e);
                        }
                        None => {
                            tracing::debug!("Server closed the event stream; event stream reader exiting");
                            break ReaderExit::StreamEnded;
                        }
                    }
                }
            }
        };

        tracing::debug!(
            lines_read = self.events.decoder().lines_read(),
            pending_requests = self.table.len(),
            "Event stream reader stopped"
        );

        exit
    }

    fn dispatch(&self, event: SseEvent) {
        // The reply path is fixed by the handshake; the server announcing it again changes nothing
        if event.event_type() == ENDPOINT_EVENT {
            tracing::warn!(data = %event.data, "Ignoring endpoint event after the handshake");
            return;
        }

        match InboundFrame::decode(&event.data) {
            Ok(InboundFrame::Reply { id, payload }) => {
                if self.table.fulfill(&id, payload) {
                    tracing::trace!(request_id = %id, "Delivered reply");
                } else {
                    tracing::warn!(
                        request_id = %id,
                        "Dropping reply to a request that isn't pending; it may have already timed out"
                    );
                }
            }
            Ok(InboundFrame::ReverseCall(call)) => {
                tracing::debug!(tool = %call.tool, call_id = %call.call_id, "Received reverse call");
                if let Err(mpsc::error::SendError(call)) = self.reverse_calls.send(call) {
                    tracing::warn!(
                        tool = %call.tool,
                        call_id = %call.call_id,
                        "Reverse call queue has been dropped; dropping reverse call"
                    );
                }
            }
            Ok(InboundFrame::Unrecognized(value)) => {
                tracing::debug!(%value, "Dropping unrecognized frame");
            }
            Err(e) => {
                tracing::warn!(error = %e, data = %event.data, "Dropping frame that could not be decoded");
            }
        }
    }
}
