//! A complete tool provider: registers a `demo_tool_rust` tool with an MCP-Link server and answers
//! every call to it with `Echo: <message>`, until interrupted with Ctrl+C.
//!
//! By default the server is found through the MCP-Link native messaging host.  To connect to a
//! known server instead:
//!
//! ```text
//! cargo run --example demo_tool -- --url https://127.0.0.1:31173/sse --auth "Bearer ..." --insecure
//! ```
use anyhow::Context;
use clap::Parser;
use mcplink_client::{Connection, ConnectionConfig, Endpoint, NativeMessagingDiscovery, ToolRouter};
use mcplink_core::models::{ToolRegistration, ToolResult};
use serde_json::{Value as JsonValue, json};
use tracing_subscriber::EnvFilter;

const TOOL_NAME: &str = "demo_tool_rust";

#[derive(Parser, Debug)]
#[command(name = "demo_tool")]
#[command(about = "Provide an echo tool to an MCP-Link server")]
struct Args {
    /// URL of the server's event stream; found through the native messaging host if omitted
    #[arg(long, requires = "auth")]
    url: Option<String>,

    /// Value of the Authorization header, e.g. "Bearer ..."
    #[arg(long, requires = "url")]
    auth: Option<String>,

    /// Accept the server's TLS certificate without verifying it
    #[arg(long)]
    insecure: bool,
}

fn registration() -> ToolRegistration {
    ToolRegistration {
        tool_name: TOOL_NAME.to_string(),
        readme: "Demo tool that echoes messages back.\n\
            - Use this to test the remote tool system and verify bidirectional communication."
            .to_string(),
        description: "Demo tool (Rust implementation) for testing remote tool registration and end-to-end \
            MCP communication.  It echoes back any message sent to it, which shows that registration \
            worked, that calls from the server reach this client, and that the client's replies reach the \
            server.  Call it with a 'message' parameter and it returns 'Echo: <your message>'.  \
            Example: {\"message\": \"test\"} returns {\"content\": [{\"type\": \"text\", \"text\": \"Echo: test\"}]}."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo back"
                }
            },
            "required": ["message"]
        }),
        callback_endpoint: "rust-client://demo-tool-callback".to_string(),
        tool_api_key: "rust_demo_tool_auth_key_12345".to_string(),
    }
}

async fn echo(input: JsonValue) -> ToolResult {
    // The server forwards the whole tools/call request; the arguments are inside it
    let message = input
        .pointer("/params/arguments/message")
        .or_else(|| input.get("message"))
        .and_then(JsonValue::as_str);

    match message {
        Some(message) => ToolResult::text(format!("Echo: {message}")),
        None => ToolResult::error("Missing required parameter 'message'"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let endpoint = match (args.url, args.auth) {
        (Some(url), Some(auth)) => Endpoint::new(&url, auth)?,
        _ => NativeMessagingDiscovery::default()
            .discover()
            .await
            .context("Could not find the MCP-Link server; pass --url and --auth to name it")?,
    };

    let config = ConnectionConfig {
        accept_invalid_certs: args.insecure,
        ..Default::default()
    };
    let mut connection = Connection::connect(endpoint, config).await?;
    let client = connection.client()?;
    let timeout = client.default_call_timeout();

    client.require_remote_tool(timeout).await?;
    client.register_tool(&registration(), timeout).await?;
    tracing::info!(tool = TOOL_NAME, "Tool registered; waiting for calls (Ctrl+C to stop)");

    let dispatcher = connection.dispatcher(ToolRouter::new().with_handler(TOOL_NAME, echo))?;
    let queue = connection.reverse_calls()?;
    let token = connection.cancellation_token();
    let dispatch = tokio::spawn(async move { dispatcher.run(queue, token).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted; shutting down"),
        _ = connection.closed() => tracing::warn!("Server closed the event stream"),
    }

    connection.stop().await;
    let handled = dispatch.await?;
    tracing::info!(handled, "Done");

    Ok(())
}
