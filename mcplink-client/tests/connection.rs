//! End-to-end tests of the client against a fake MCP-Link server, over real HTTP.

/// The `testing` module is only compiled in `test` config, which integration tests like this one
/// don't get, so include the same file here.
#[path = "../src/testing.rs"]
mod test_helpers;
mod fake_server;

use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use fake_server::{FakeServer, SESSION_ID, error_reply_to, reply_to};
use mcplink_client::{
    Connection, ConnectionConfig, ConnectionState, HandshakeError, McpLinkError, ReaderExit, ToolRouter,
};
use mcplink_core::models::{ToolRegistration, ToolResult};
use mcplink_jsonrpc::{ErrorCode, ErrorDetails};
use serde_json::{Value as JsonValue, json};
use test_helpers::init_test_logging;

async fn open(server: &FakeServer) -> Connection {
    init_test_logging();
    Connection::connect(server.endpoint(), FakeServer::config())
        .await
        .unwrap()
}

#[tokio::test]
async fn handshake_learns_session() {
    let server = FakeServer::start().await;
    let mut connection = open(&server).await;

    assert_eq!(connection.state(), ConnectionState::Streaming);
    assert_eq!(connection.session_id(), Some(SESSION_ID));
    let reply_url = connection.reply_url().unwrap();
    assert_eq!(reply_url.path(), "/messages/");
    assert_eq!(reply_url.query(), Some(format!("session_id={SESSION_ID}").as_str()));

    assert_matches!(connection.stop().await, Some(ReaderExit::Stopped));
    assert_eq!(connection.state(), ConnectionState::Closed);

    // Closed is final
    assert_matches!(
        connection.open().await,
        Err(McpLinkError::InvalidState {
            expected: ConnectionState::Idle,
            actual: ConnectionState::Closed
        })
    );
}

#[tokio::test]
async fn tools_list_reply_arrives_on_stream() {
    let server = FakeServer::start().await;
    server.set_responder(|request| {
        (request["method"] == "tools/list").then(|| reply_to(request, json!({"tools": [{"name": "remote"}]})))
    });
    let connection = open(&server).await;
    let client = connection.client().unwrap();

    let result = client
        .call("tools/list", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, json!({"tools": [{"name": "remote"}]}));
    assert_eq!(client.pending_requests(), 0);

    let posts = server.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["jsonrpc"], json!("2.0"));
    assert_eq!(posts[0]["method"], json!("tools/list"));
    assert_eq!(posts[0]["params"], json!({}));
    assert!(posts[0]["id"].is_string());

    let tools = client.list_tools(Duration::from_secs(5)).await.unwrap();
    assert!(tools.has_remote_tool());
}

#[tokio::test]
async fn reply_with_unknown_id_is_dropped() {
    let server = FakeServer::start().await;
    let connection = open(&server).await;
    let client = connection.client().unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("tools/list", json!({}), Duration::from_secs(5)).await }
    });

    let posts = server.wait_for_posts(1).await;
    server.push_frame(json!({"jsonrpc": "2.0", "id": "nobody-asked", "result": "wrong"}));
    server.push_raw(": keep-alive\n\n");
    server.push_raw("data: {this is not json\n\n");
    server.push_frame(reply_to(&posts[0], json!("right")));

    assert_eq!(call.await.unwrap().unwrap(), json!("right"));
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(connection.state(), ConnectionState::Streaming);
}

#[tokio::test]
async fn concurrent_calls_get_their_own_replies() {
    let server = FakeServer::start().await;
    server.set_responder(|request| Some(reply_to(request, request["params"].clone())));
    let connection = open(&server).await;
    let client = connection.client().unwrap();

    let mut calls = tokio::task::JoinSet::new();
    for i in 0..20 {
        let client = client.clone();
        calls.spawn(async move {
            let result = client
                .call("echo", json!({"n": i}), Duration::from_secs(5))
                .await
                .unwrap();
            (i, result)
        });
    }

    while let Some(result) = calls.join_next().await {
        let (i, result) = result.unwrap();
        assert_eq!(result, json!({"n": i}));
    }
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn call_times_out_and_leaves_no_pending_request() {
    let server = FakeServer::start().await;
    let connection = open(&server).await;
    let client = connection.client().unwrap();
    let before = client.pending_requests();

    let started = tokio::time::Instant::now();
    let result = client
        .call("tools/list", json!({}), Duration::from_millis(300))
        .await;

    assert_matches!(result, Err(McpLinkError::TimedOut { method, timeout, .. }) => {
        assert_eq!(method, "tools/list");
        assert_eq!(timeout, Duration::from_millis(300));
    });
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(client.pending_requests(), before);

    // The reply finally shows up, goes nowhere, and the connection carries on
    let posts = server.posts();
    server.push_frame(reply_to(&posts[0], json!("late")));

    server.set_responder(|request| Some(reply_to(request, json!("prompt"))));
    let result = client
        .call("tools/list", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, json!("prompt"));
}

#[tokio::test]
async fn server_error_reply_is_method_error() {
    let server = FakeServer::start().await;
    server.set_responder(|request| {
        Some(error_reply_to(
            request,
            ErrorDetails::method_not_found("Method not found", None),
        ))
    });
    let connection = open(&server).await;
    let client = connection.client().unwrap();

    assert_matches!(
        client.call("bogus", json!({}), Duration::from_secs(5)).await,
        Err(McpLinkError::MethodError { method, error }) => {
            assert_eq!(method, "bogus");
            assert_eq!(error.code, ErrorCode::MethodNotFound);
            assert_eq!(error.message, "Method not found");
        }
    );
}

#[tokio::test]
async fn rejected_post_fails_immediately() {
    let server = FakeServer::start().await;
    server.set_post_status(StatusCode::INTERNAL_SERVER_ERROR);
    let connection = open(&server).await;
    let client = connection.client().unwrap();

    // The call timeout is long; the failure must not wait for it
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.call("tools/list", json!({}), Duration::from_secs(60)),
    )
    .await
    .expect("A rejected POST must fail right away");

    let error = result.unwrap_err();
    assert!(error.is_transport());
    assert_matches!(
        error,
        McpLinkError::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn reverse_call_is_answered_with_tools_reply() {
    let server = FakeServer::start().await;
    let mut connection = open(&server).await;

    let router = ToolRouter::new().with_handler("demo_tool", |input: JsonValue| async move {
        ToolResult::text(format!("Echo: {}", input["message"].as_str().unwrap_or_default()))
    });
    let dispatcher = connection.dispatcher(router).unwrap();
    let queue = connection.reverse_calls().unwrap();
    let token = connection.cancellation_token();
    let dispatch = tokio::spawn(async move { dispatcher.run(queue, token).await });

    server.push_frame(json!({"reverse": {"tool": "demo_tool", "call_id": "abc123", "input": {"message": "hi"}}}));

    let posts = server.wait_for_posts(1).await;
    assert_eq!(
        posts[0],
        json!({
            "jsonrpc": "2.0",
            "id": "abc123",
            "method": "tools/reply",
            "params": {"result": {"content": [{"type": "text", "text": "Echo: hi"}], "isError": false}}
        })
    );

    connection.stop().await;
    assert_eq!(dispatch.await.unwrap(), 1);
}

#[tokio::test]
async fn reverse_call_for_unknown_tool_gets_error_result() {
    let server = FakeServer::start().await;
    let connection = open(&server).await;

    let dispatcher = connection.dispatcher(ToolRouter::new()).unwrap();
    let queue = connection.reverse_calls().unwrap();
    tokio::spawn(async move { dispatcher.run_concurrent(queue, Default::default()).await });

    server.push_frame(json!({"reverse": {"tool": "mystery", "call_id": "c-9", "input": {}}}));

    let posts = server.wait_for_posts(1).await;
    assert_eq!(posts[0]["id"], json!("c-9"));
    assert_eq!(posts[0]["method"], json!("tools/reply"));
    assert_eq!(
        posts[0]["params"]["result"],
        json!({"content": [{"type": "text", "text": "Unknown tool: mystery"}], "isError": true})
    );
}

#[tokio::test]
async fn reverse_calls_dequeue_in_arrival_order() {
    let server = FakeServer::start().await;
    let mut connection = open(&server).await;
    let queue = connection.reverse_calls().unwrap();

    for i in 0..5 {
        server.push_frame(json!({"reverse": {"tool": "t", "call_id": format!("call-{i}"), "input": {"n": i}}}));
    }
    server.close_stream();
    connection.closed().await;

    let mut call_ids = Vec::new();
    while let Some(call) = queue.recv().await {
        call_ids.push(call.call_id);
    }
    assert_eq!(call_ids, ["call-0", "call-1", "call-2", "call-3", "call-4"]);

    assert_matches!(connection.stop().await, Some(ReaderExit::StreamEnded));
}

#[tokio::test]
async fn stream_end_closes_connection() {
    let server = FakeServer::start().await;
    let connection = open(&server).await;
    let mut state = connection.watch_state();

    server.close_stream();
    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .expect("Connection should close when the stream ends");

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
}

#[tokio::test]
async fn tool_registration() {
    let server = FakeServer::start().await;
    server.set_responder(|request| {
        let tool_name = request["params"]["arguments"]["input"]["tool_name"].as_str()?;
        let text = if tool_name == "taken" {
            "Tool name already in use".to_string()
        } else {
            format!("Successfully registered tool '{tool_name}'")
        };
        Some(reply_to(request, json!({"content": [{"type": "text", "text": text}]})))
    });
    let connection = open(&server).await;
    let client = connection.client().unwrap();

    let mut registration = ToolRegistration {
        tool_name: "demo_tool_rust".into(),
        readme: "Demo tool".into(),
        description: "Echoes its input".into(),
        parameters: json!({"type": "object"}),
        callback_endpoint: "rust-client://demo".into(),
        tool_api_key: "key".into(),
    };
    client
        .register_tool(&registration, Duration::from_secs(5))
        .await
        .unwrap();

    let posts = server.posts();
    assert_eq!(posts[0]["method"], json!("tools/call"));
    assert_eq!(posts[0]["params"]["name"], json!("remote"));

    registration.tool_name = "taken".into();
    assert_matches!(
        client.register_tool(&registration, Duration::from_secs(5)).await,
        Err(McpLinkError::RegistrationRejected { tool_name, .. }) if tool_name == "taken"
    );
}

#[tokio::test]
async fn missing_remote_tool() {
    let server = FakeServer::start().await;
    server.set_responder(|request| Some(reply_to(request, json!({"tools": [{"name": "sqlite"}]}))));
    let connection = open(&server).await;

    assert_matches!(
        connection
            .client()
            .unwrap()
            .require_remote_tool(Duration::from_secs(5))
            .await,
        Err(McpLinkError::RemoteToolMissing)
    );
}

async fn failed_handshake(server: &FakeServer, config: ConnectionConfig) -> HandshakeError {
    init_test_logging();
    let mut connection = Connection::new(server.endpoint(), config).unwrap();
    let error = connection.open().await.unwrap_err();
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_matches!(connection.client(), Err(McpLinkError::InvalidState { .. }));

    match error {
        McpLinkError::Handshake { source, .. } => source,
        other => panic!("Expected a handshake error, got {other:?}"),
    }
}

#[tokio::test]
async fn handshake_rejects_bad_credentials() {
    init_test_logging();
    let server = FakeServer::start().await;
    let mut connection =
        Connection::new(server.endpoint_with_authorization("Bearer wrong"), FakeServer::config()).unwrap();

    assert_matches!(
        connection.open().await,
        Err(McpLinkError::Handshake {
            source: HandshakeError::Status { status },
            ..
        }) if status == StatusCode::UNAUTHORIZED
    );
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn handshake_requires_endpoint_first() {
    let server = FakeServer::start_with_preamble("event: message\ndata: {}\n\n", false).await;
    assert_matches!(
        failed_handshake(&server, FakeServer::config()).await,
        HandshakeError::UnexpectedEvent { event, .. } if event == "message"
    );
}

#[tokio::test]
async fn handshake_requires_session_id() {
    let server = FakeServer::start_with_preamble("event: endpoint\ndata: /messages/\n\n", false).await;
    assert_matches!(
        failed_handshake(&server, FakeServer::config()).await,
        HandshakeError::MissingSessionId { .. }
    );
}

#[tokio::test]
async fn handshake_line_limit() {
    let server = FakeServer::start_with_preamble(": ping\n".repeat(20), false).await;
    assert_matches!(
        failed_handshake(&server, FakeServer::config()).await,
        HandshakeError::TooManyLines { max_lines: 10 }
    );
}

#[tokio::test]
async fn handshake_stream_ends_early() {
    let server = FakeServer::start_with_preamble(": hello\n\n", true).await;
    assert_matches!(
        failed_handshake(&server, FakeServer::config()).await,
        HandshakeError::StreamEnded
    );
}

#[tokio::test]
async fn handshake_times_out() {
    let server = FakeServer::start_with_preamble(": still thinking\n", false).await;
    let config = ConnectionConfig {
        handshake_timeout: Duration::from_millis(300),
        ..FakeServer::config()
    };
    assert_matches!(
        failed_handshake(&server, config).await,
        HandshakeError::TimedOut { timeout } if timeout == Duration::from_millis(300)
    );
}
