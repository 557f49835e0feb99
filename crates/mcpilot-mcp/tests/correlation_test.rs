//! Response correlation over the stdio transport.

use std::time::Duration;

use mcpilot_mcp::protocol::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId};
use mcpilot_mcp::transport::INCOMING_QUEUE_CAPACITY;
use mcpilot_mcp::{StdioTransport, Transport, TransportError};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

fn connect() -> (StdioTransport, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(client);
    (StdioTransport::from_streams(read, write), server)
}

/// Read `count` requests, then answer them last-first.
async fn answer_in_reverse(server: DuplexStream, count: usize) {
    let (read, mut write) = tokio::io::split(server);
    let mut lines = BufReader::new(read).lines();

    let mut requests = Vec::new();
    while requests.len() < count {
        let line = lines.next_line().await.unwrap().unwrap();
        requests.push(serde_json::from_str::<Value>(&line).unwrap());
    }

    for request in requests.iter().rev() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": {"echo": request["params"]["name"]}
        });
        write
            .write_all(format!("{}\n", response).as_bytes())
            .await
            .unwrap();
    }

    // Keep the connection open until the client is done.
    let _ = lines.next_line().await;
}

#[tokio::test]
async fn test_out_of_order_responses() {
    let (transport, server) = connect();
    tokio::spawn(answer_in_reverse(server, 3));

    let call = |id: RequestId, name: &str| {
        transport.call(JsonRpcRequest::new(
            id,
            "tools/call",
            Some(json!({"name": name, "arguments": {}})),
        ))
    };

    let (a, b, c) = tokio::join!(
        call(RequestId::from("1"), "first"),
        call(RequestId::Number(2), "second"),
        call(RequestId::from("3"), "third"),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    let c = c.unwrap();
    assert_eq!(a.id, RequestId::from("1"));
    assert_eq!(a.into_result().unwrap(), json!({"echo": "first"}));
    assert_eq!(b.id, RequestId::Number(2));
    assert_eq!(b.into_result().unwrap(), json!({"echo": "second"}));
    assert_eq!(c.into_result().unwrap(), json!({"echo": "third"}));

    assert_eq!(transport.pending_requests(), 0);
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_outstanding_id_is_rejected() {
    let (transport, server) = connect();
    let transport = transport.with_request_timeout(Some(Duration::from_millis(200)));
    tokio::spawn(answer_in_reverse(server, 2));

    let request = JsonRpcRequest::new(7i64, "tools/list", None);
    let (first, second) = tokio::join!(transport.call(request.clone()), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.call(request.clone()).await
    });

    // The first call still waits for its own answer; the stub needs two
    // requests before replying, so it times out.
    assert!(matches!(first, Err(TransportError::Timeout { .. })));
    assert!(matches!(second, Err(TransportError::DuplicateId(RequestId::Number(7)))));
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_dropped_call_forgets_its_request() {
    let (transport, server) = connect();
    let (read, _write) = tokio::io::split(server);
    let mut lines = BufReader::new(read).lines();

    let request = JsonRpcRequest::new(1i64, "tools/list", None);
    let pending = transport.call(request);
    tokio::select! {
        _ = pending => panic!("nobody answers"),
        line = lines.next_line() => assert!(line.unwrap().is_some()),
    }

    assert_eq!(transport.pending_requests(), 0);
    assert!(transport.is_connected());
}

#[tokio::test]
async fn test_server_messages_are_received() {
    let (transport, server) = connect();
    let (read, mut write) = tokio::io::split(server);

    let lines = [
        "",
        r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#,
        r#"{"jsonrpc":"2.0","id":99,"result":{}}"#,
        r#"{"unrelated":true}"#,
        r#"{"jsonrpc":"2.0","id":"s1","method":"ping"}"#,
    ];
    for line in lines {
        write
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    // Blank lines, unmatched responses and non-messages are skipped.
    let first = transport.receive().await.unwrap();
    assert_eq!(first.method(), Some("notifications/tools/list_changed"));
    let second = transport.receive().await.unwrap();
    assert!(matches!(second, JsonRpcMessage::Request(ref r) if r.method == "ping"));

    // The client can still answer a server request.
    let pong = JsonRpcMessage::from(JsonRpcResponse::success("s1", json!({})));
    transport.send(&pong).await.unwrap();
    let mut lines = BufReader::new(read).lines();
    let written: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(written, json!({"jsonrpc": "2.0", "id": "s1", "result": {}}));

    // Invalid JSON is fatal.
    write.write_all(b"{not json\n").await.unwrap();
    let err = transport.receive().await.unwrap_err();
    assert!(matches!(err, TransportError::Protocol(_)));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_close_fails_outstanding_calls() {
    let (transport, _server) = connect();
    let transport = std::sync::Arc::new(transport);

    let waiting = {
        let transport = std::sync::Arc::clone(&transport);
        tokio::spawn(async move {
            transport
                .call(JsonRpcRequest::new(1i64, "tools/list", None))
                .await
        })
    };
    while transport.pending_requests() == 0 {
        tokio::task::yield_now().await;
    }

    transport.close().await.unwrap();
    let result = waiting.await.unwrap();
    assert!(matches!(result, Err(TransportError::Closed)));
}

#[tokio::test]
async fn test_server_message_queue_is_bounded() {
    let (transport, server) = connect();
    let transport = std::sync::Arc::new(transport);
    let (_read, mut write) = tokio::io::split(server);

    let waiting = {
        let transport = std::sync::Arc::clone(&transport);
        tokio::spawn(async move {
            transport
                .call(JsonRpcRequest::new(1i64, "tools/list", None))
                .await
        })
    };
    while transport.pending_requests() == 0 {
        tokio::task::yield_now().await;
    }

    // A chatty server logs far more than anyone reads.
    let mut burst = String::new();
    for n in 0..INCOMING_QUEUE_CAPACITY + 100 {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/message",
            "params": {"level": "info", "data": n}
        });
        burst.push_str(&format!("{}\n", notification));
    }
    burst.push_str("{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n");
    write.write_all(burst.as_bytes()).await.unwrap();

    // The response comes after the burst, so the reader has seen all of it.
    let response = waiting.await.unwrap().unwrap();
    assert_eq!(response.id, RequestId::from(1i64));

    let mut queued = 0;
    while let Ok(message) =
        tokio::time::timeout(Duration::from_millis(50), transport.receive()).await
    {
        let message = message.unwrap();
        assert_eq!(message.method(), Some("notifications/message"));
        queued += 1;
    }
    assert_eq!(queued, INCOMING_QUEUE_CAPACITY);
    assert!(transport.is_connected());
}
