//! Session tests against an in-process stub MCP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcpilot_mcp::protocol::methods;
use mcpilot_mcp::{
    decode, ClientInfo, McpError, McpSession, Outcome, Phase, SessionState, StdioTransport,
    Transport, TransportError,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Notify;

/// What the stub does with a request.
enum Reply {
    Result(Value),
    Error(i32, String),
    /// Read the request but never answer it.
    Silent,
    /// Drop the connection.
    Hangup,
}

type Received = Arc<Mutex<Vec<Value>>>;

fn stub_session<F>(handler: F) -> (McpSession, Received)
where
    F: Fn(&str, &Value) -> Reply + Send + 'static,
{
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let transport = StdioTransport::from_streams(client_read, client_write);

    let received = Received::default();
    tokio::spawn(serve(server, handler, Arc::clone(&received)));

    (McpSession::new("stub", Arc::new(transport)), received)
}

async fn serve<F>(stream: DuplexStream, handler: F, received: Received)
where
    F: Fn(&str, &Value) -> Reply,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let message: Value = serde_json::from_str(&line).unwrap();
        received.lock().unwrap().push(message.clone());

        let (Some(id), Some(method)) = (message.get("id"), message["method"].as_str()) else {
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let reply = match handler(method, &params) {
            Reply::Result(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Reply::Error(code, message) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message}
            }),
            Reply::Silent => continue,
            Reply::Hangup => return,
        };
        write
            .write_all(format!("{}\n", reply).as_bytes())
            .await
            .unwrap();
    }
}

fn initialize_result(version: &str) -> Value {
    json!({
        "protocolVersion": version,
        "capabilities": {"tools": {}},
        "serverInfo": {"name": "fetchkit", "version": "0.1.0"}
    })
}

fn fetchkit_server(method: &str, params: &Value) -> Reply {
    match method {
        "initialize" => Reply::Result(initialize_result("2024-11-05")),
        "tools/list" => Reply::Result(json!({
            "tools": [{
                "name": "fetchkit",
                "description": "Fetch a URL and return its content",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "url": {"type": "string"},
                        "as_markdown": {"type": "boolean"}
                    },
                    "required": ["url"]
                }
            }]
        })),
        "tools/call" => match params["arguments"]["url"].as_str() {
            Some("https://example.com") => Reply::Result(json!({
                "content": [{
                    "type": "text",
                    "text": "{\"status_code\":200,\"format\":\"markdown\",\"content\":\"hi\"}"
                }]
            })),
            Some("https://slow.example.com") => Reply::Result(json!({
                "content": [{"type": "text", "text": "timeout"}],
                "isError": true
            })),
            Some("https://gone.example.com") => Reply::Hangup,
            _ => Reply::Error(-32602, "Missing required parameter: url".to_string()),
        },
        other => Reply::Error(-32601, format!("Method not found: {}", other)),
    }
}

fn test_client() -> ClientInfo {
    ClientInfo::new("test", "1.0.0")
}

#[tokio::test]
async fn test_handshake_and_discovery() {
    let (session, received) = stub_session(fetchkit_server);
    assert_eq!(session.state().await, SessionState::Unstarted);

    let server = session.initialize(test_client()).await.unwrap();
    assert!(!server.protocol_version.is_empty());
    assert_eq!(server.server_info.name, "fetchkit");
    assert_eq!(session.state().await, SessionState::Ready);

    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "fetchkit");
    assert_eq!(tools[0].required_arguments(), vec!["url"]);

    let received = received.lock().unwrap().clone();
    let sequence: Vec<&str> = received.iter().filter_map(|m| m["method"].as_str()).collect();
    assert_eq!(
        sequence,
        vec![methods::INITIALIZE, methods::INITIALIZED, methods::TOOLS_LIST]
    );

    let initialize = &received[0];
    assert_eq!(initialize["params"]["protocolVersion"], "2024-11-05");
    assert_eq!(
        initialize["params"]["clientInfo"],
        json!({"name": "test", "version": "1.0.0"})
    );
    assert!(received[1].get("id").is_none());
    assert_eq!(received[2]["params"], json!({}));
}

#[tokio::test]
async fn test_tool_list_is_cached() {
    let (session, received) = stub_session(fetchkit_server);
    session.initialize(test_client()).await.unwrap();

    let first = session.list_tools().await.unwrap();
    let second = session.list_tools().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(session.tools().await, first);

    let list_requests = received
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m["method"] == methods::TOOLS_LIST)
        .count();
    assert_eq!(list_requests, 1);
}

#[tokio::test]
async fn test_tool_list_pagination() {
    let (session, received) = stub_session(|method, params| match method {
        "initialize" => Reply::Result(initialize_result("2025-03-26")),
        "tools/list" => match params.get("cursor").and_then(|c| c.as_str()) {
            None => Reply::Result(json!({
                "tools": [{"name": "fetchkit"}],
                "nextCursor": "page-2"
            })),
            Some("page-2") => Reply::Result(json!({"tools": [{"name": "fetchkit_md"}]})),
            Some(other) => Reply::Error(-32602, format!("bad cursor {}", other)),
        },
        _ => Reply::Error(-32601, "Method not found".to_string()),
    });
    session.initialize(test_client()).await.unwrap();

    let names: Vec<String> = session
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["fetchkit", "fetchkit_md"]);

    let received = received.lock().unwrap();
    assert_eq!(received.last().unwrap()["params"], json!({"cursor": "page-2"}));
}

#[tokio::test]
async fn test_call_tool_structured_success() {
    let (session, _) = stub_session(fetchkit_server);
    session.initialize(test_client()).await.unwrap();

    let result = session
        .call_tool(
            "fetchkit",
            json!({"url": "https://example.com", "as_markdown": true}),
        )
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(
        decode(&result),
        Outcome::Success(json!({"status_code": 200, "format": "markdown", "content": "hi"}))
    );
}

#[tokio::test]
async fn test_call_tool_flagged_failure_is_not_an_error() {
    let (session, _) = stub_session(fetchkit_server);
    session.initialize(test_client()).await.unwrap();

    let result = session
        .call_tool("fetchkit", json!({"url": "https://slow.example.com"}))
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(decode(&result), Outcome::Failure("timeout".to_string()));
    assert_eq!(session.state().await, SessionState::Ready);
}

#[tokio::test]
async fn test_call_tool_error_response() {
    let (session, _) = stub_session(fetchkit_server);
    session.initialize(test_client()).await.unwrap();

    let err = session.call_tool("fetchkit", json!({})).await.unwrap_err();
    match &err {
        McpError::ToolCall { name, cause } => {
            assert_eq!(name, "fetchkit");
            assert_eq!(cause.code, -32602);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!err.is_fatal());
    assert_eq!(session.state().await, SessionState::Ready);
}

#[tokio::test]
async fn test_server_hangup_closes_session() {
    let (session, _) = stub_session(fetchkit_server);
    session.initialize(test_client()).await.unwrap();

    let err = session
        .call_tool("fetchkit", json!({"url": "https://gone.example.com"}))
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.phase(), Some(Phase::Call));
    assert!(matches!(
        err,
        McpError::Transport {
            source: TransportError::EndOfStream,
            ..
        }
    ));
    assert_eq!(session.state().await, SessionState::Closed);

    let err = session.list_tools().await.unwrap_err();
    assert!(matches!(err, McpError::NotReady { .. }));
}

#[tokio::test]
async fn test_unsupported_protocol_version() {
    let (session, _) = stub_session(|method, _| match method {
        "initialize" => Reply::Result(initialize_result("1999-01-01")),
        _ => Reply::Error(-32601, "Method not found".to_string()),
    });

    let err = session.initialize(test_client()).await.unwrap_err();
    assert!(matches!(err, McpError::Handshake(_)));
    assert!(err.to_string().contains("1999-01-01"));
    assert_eq!(session.state().await, SessionState::Closed);
}

#[tokio::test]
async fn test_initialize_error_response() {
    let (session, received) = stub_session(|_, _| Reply::Error(-32603, "boom".to_string()));

    let err = session.initialize(test_client()).await.unwrap_err();
    assert!(matches!(err, McpError::Handshake(_)));
    assert_eq!(session.state().await, SessionState::Closed);

    // No initialized notification after a failed handshake
    let received = received.lock().unwrap();
    assert!(received.iter().all(|m| m["method"] != methods::INITIALIZED));
}

#[tokio::test]
async fn test_list_tools_rejected_while_initializing() {
    let seen_initialize = Arc::new(Notify::new());
    let notify = Arc::clone(&seen_initialize);
    let (session, _) = stub_session(move |method, _| {
        if method == "initialize" {
            notify.notify_one();
        }
        Reply::Silent
    });
    let session = Arc::new(session);

    let initializing = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.initialize(test_client()).await })
    };
    seen_initialize.notified().await;

    assert_eq!(session.state().await, SessionState::Initializing);
    let err = session.list_tools().await.unwrap_err();
    match err {
        McpError::NotReady { state } => assert_eq!(state, "initializing"),
        other => panic!("unexpected error: {:?}", other),
    }

    initializing.abort();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_initialize_twice() {
    let (session, _) = stub_session(fetchkit_server);
    session.initialize(test_client()).await.unwrap();

    let err = session.initialize(test_client()).await.unwrap_err();
    assert!(matches!(err, McpError::InvalidState { .. }));
    assert_eq!(session.state().await, SessionState::Ready);

    session.close().await.unwrap();
    assert_eq!(session.state().await, SessionState::Closed);
    assert!(!session.transport().is_connected());
}

#[tokio::test]
async fn test_abandoned_initialize_closes_session() {
    let (session, _) = stub_session(|_, _| Reply::Silent);

    let result = tokio::time::timeout(
        Duration::from_millis(100),
        session.initialize(test_client()),
    )
    .await;
    assert!(result.is_err());
    assert_eq!(session.state().await, SessionState::Closed);

    // The transport is closed by a background task.
    for _ in 0..50 {
        if !session.transport().is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!session.transport().is_connected());

    let err = session.initialize(test_client()).await.unwrap_err();
    assert!(matches!(err, McpError::InvalidState { .. }));
    let err = session.list_tools().await.unwrap_err();
    assert!(matches!(err, McpError::NotReady { .. }));
}
