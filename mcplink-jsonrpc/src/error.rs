use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::types;

pub type Result<T, E = JsonRpcError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum JsonRpcError {
    #[error("Error serializing request {type_name} to JSON")]
    SerRequest {
        source: serde_json::Error,
        type_name: &'static str,
    },

    #[error("Error deserializing response into {type_name}")]
    DeserResponse {
        source: serde_json::Error,
        type_name: &'static str,
        response: JsonValue,
    },

    #[error("Request id {id} is already pending a response")]
    DuplicateId { id: types::Id },

    #[error("Timed out waiting for the response to request {id}")]
    TimedOut { id: types::Id },

    /// The slot for a pending request was torn down without ever being fulfilled.
    ///
    /// The only way this can happen is if someone removed the entry from the correlation table
    /// out from under the caller that registered it.
    #[error("Pending request {id} was removed before a response arrived")]
    PendingRequestRemoved { id: types::Id },
}
