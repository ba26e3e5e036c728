use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};

/// Name of the tool an MCP-Link server exposes for registering tools provided by remote clients
pub const REMOTE_TOOL_NAME: &str = "remote";

/// Text the server includes in its response to a successful tool registration
pub const REGISTRATION_SUCCESS_MARKER: &str = "Successfully registered tool";

/// The JSON-RPC methods this client sends to the server.
///
/// Using an enum this way avoid excessively stringly-typed code elsewhere.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum Method {
    /// List the tools the server currently offers
    #[strum(serialize = "tools/list")]
    ToolsList,
    /// Invoke one of the server's tools; tool registration goes through this too
    #[strum(serialize = "tools/call")]
    ToolsCall,
    /// Deliver the result of a reverse call back to the server
    #[strum(serialize = "tools/reply")]
    ToolsReply,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A single item of content in a [`ToolResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    /// Binary image data, base64-encoded
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// The result of a tool call, in either direction.
///
/// This is the only payload shape that is ever sent as the reply to a reverse call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result consisting of a single text item
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A failed result, with the error message as a single text item
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: message.into() }],
            is_error: true,
        }
    }

    /// A successful result consisting of a single image
    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Image {
                data: data.into(),
                mime_type: mime_type.into(),
            }],
            is_error: false,
        }
    }

    /// The error result sent back when the server invokes a tool that has no handler here
    pub fn unknown_tool(tool: &str) -> Self {
        Self::error(format!("Unknown tool: {tool}"))
    }

    /// The text of the first content item, if it is text
    pub fn first_text(&self) -> Option<&str> {
        match self.content.first() {
            Some(Content::Text { text }) => Some(text),
            _ => None,
        }
    }
}

/// An invocation of one of our tools, pushed to us by the server.
///
/// `call_id` is generated by the server and must be echoed back unchanged in the reply.  It has
/// nothing to do with the IDs of requests this client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseCallEnvelope {
    pub tool: String,
    pub call_id: String,
    #[serde(default)]
    pub input: JsonValue,
}

impl ReverseCallEnvelope {
    /// The arguments the AI passed to the tool.
    ///
    /// The server forwards the original `tools/call` request as the input, so these live at
    /// `input.params.arguments`.
    pub fn arguments(&self) -> Option<&Map<String, JsonValue>> {
        self.input.get("params")?.get("arguments")?.as_object()
    }

    /// A single named argument, see [`Self::arguments`]
    pub fn argument(&self, name: &str) -> Option<&JsonValue> {
        self.arguments()?.get(name)
    }
}

/// Wire form of a reverse call as it appears on the event stream: `{"reverse": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseCallFrame {
    pub reverse: ReverseCallEnvelope,
}

/// Params of a `tools/reply` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReplyParams {
    pub result: ToolResult,
}

/// A tool as reported in the `tools/list` response.  Only the name is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(flatten)]
    pub other: Map<String, JsonValue>,
}

/// Result of `tools/list`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
}

impl ListToolsResult {
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name == name)
    }

    /// Whether the server offers the `remote` tool needed to register our own tools
    pub fn has_remote_tool(&self) -> bool {
        self.has_tool(REMOTE_TOOL_NAME)
    }
}

/// Description of a tool to register with the server's `remote` tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRegistration {
    /// Unique name of the tool
    pub tool_name: String,
    /// Short summary telling the AI when to use the tool
    pub readme: String,
    /// Full documentation of what the tool does and how to call it
    pub description: String,
    /// JSON schema of the tool's input parameters
    pub parameters: JsonValue,
    /// Identifier the server uses to route calls back to this client
    pub callback_endpoint: String,
    pub tool_api_key: String,
}

impl ToolRegistration {
    /// Build the params of the `tools/call` request that registers this tool
    pub fn to_call_params(&self) -> JsonValue {
        json!({
            "name": REMOTE_TOOL_NAME,
            "arguments": {
                "input": {
                    "operation": "register",
                    "tool_name": self.tool_name,
                    "readme": self.readme,
                    "description": self.description,
                    "parameters": self.parameters,
                    "callback_endpoint": self.callback_endpoint,
                    "TOOL_API_KEY": self.tool_api_key,
                }
            }
        })
    }
}
