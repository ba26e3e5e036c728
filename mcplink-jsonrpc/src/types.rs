//! Rust struct definitions that ser/de to/from the JSON-RPC envelopes exchanged with an MCP-Link
//! server.
//!
//! Requests always leave this process as the body of an HTTP POST, and responses always arrive as
//! the `data` of a Server-Sent Event.  The envelopes themselves are plain JSON-RPC 2.0 though, so
//! nothing in here knows about either transport.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{JsonRpcError, Result};
/// Re-export the structs and enums that are part of the JSON-RPC protocol
///
/// No need to re-invent this wheel.  The Request and Response types are not suitable for our use
/// case but other basic types are exactly what we would declare ourselves so we can just
/// re-export.
pub use jsonrpsee_types::{error::ErrorCode, params::TwoPointZero};
pub use serde_json::Value as JsonValue;

/// Request Id
///
/// Ids that this crate generates are always [`Id::Str`], but the peer is free to use any valid
/// JSON-RPC id in the messages it pushes to us, so all three forms are accepted.
#[derive(Debug, PartialEq, Clone, Hash, Eq, Deserialize, Serialize, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
pub enum Id {
    /// Null
    Null,
    /// Numeric id
    Number(u64),
    /// String id
    Str(String),
}

impl Id {
    /// Generate a fresh random request id.
    ///
    /// These are v4 UUIDs, so there are enough random bits that a pending id is never re-issued
    /// while it's still waiting for its reply.
    pub fn random() -> Self {
        Id::Str(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Number(n) => write!(f, "{n}"),
            Id::Str(s) => f.write_str(s),
        }
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Str(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

/// Serializable [JSON-RPC request object](https://www.jsonrpc.org/specification#request-object).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Request ID
    pub id: Id,
    /// Name of the method to be invoked.
    pub method: String,
    /// Parameter values of the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl Request {
    /// Create a serializable JSON-RPC method call.
    pub fn new(id: Id, method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            id,
            method: method.into(),
            params: params.into(),
        }
    }

    /// Serialize this request into the JSON text of an HTTP request body.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| JsonRpcError::SerRequest {
            source: e,
            type_name: std::any::type_name::<Self>(),
        })
    }
}

/// JSON-RPC response object as defined in the [spec](https://www.jsonrpc.org/specification#response_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Payload which can be result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Request ID
    pub id: Id,
}

impl Response {
    /// Create a owned successful response
    pub fn success(id: Id, result: JsonValue) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            payload: ResponsePayload::Success(SuccessResponse { result }),
            id,
        }
    }

    /// Create an error response
    pub fn error(id: Id, error: ErrorDetails) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            payload: ResponsePayload::Error(error.into()),
            id,
        }
    }

    /// Decode a response from an already-parsed JSON value
    pub fn from_json(value: JsonValue) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| JsonRpcError::DeserResponse {
            source: e,
            type_name: std::any::type_name::<Self>(),
            response: value,
        })
    }
}

/// Possible payloads of a JSON RPC response
///
/// This is an `untagged` enum so that serde will try to deserialize into each variant in order
/// until one succeeds.  This works because successs responses should have `result` and error
/// responses should have `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Corresponds to failed JSON-RPC response with a error object with the field `error.
    Error(ErrorResponse),
    /// Corresponds to successful JSON-RPC response with the field `result`.
    Success(SuccessResponse),
}

impl ResponsePayload {
    /// Create a successful response payload
    pub fn success(result: JsonValue) -> Self {
        ResponsePayload::Success(SuccessResponse { result })
    }

    /// Convert into the successful result, or the error details the peer reported
    pub fn into_result(self) -> std::result::Result<JsonValue, ErrorDetails> {
        match self {
            ResponsePayload::Success(success) => Ok(success.result),
            ResponsePayload::Error(error) => Err(error.error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub result: JsonValue,
}

/// [Failed JSON-RPC response object](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

impl From<ErrorDetails> for ErrorResponse {
    fn from(error: ErrorDetails) -> Self {
        Self { error }
    }
}

/// [JSON-RPC failed response error details](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Code
    pub code: ErrorCode,
    /// Message
    pub message: String,
    /// Optional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    pub fn method_not_found(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message, data)
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code.code())
    }
}
