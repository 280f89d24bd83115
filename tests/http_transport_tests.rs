//! Integration tests for HttpTransport against a local mock server

use futures::StreamExt;
use parley::{
    ApiKey, ChatConnection, ChatParameters, HttpTransport, Model, StreamAccumulator,
    UnboundedMemory, build_http_client,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMPLETIONS: &str = "/v1/chat/completions";

fn connection_to(endpoint: String) -> ChatConnection {
    let client = build_http_client(Some(Duration::from_secs(2))).unwrap();
    let transport =
        HttpTransport::new(client, ApiKey::new("sk-test").unwrap()).with_endpoint(endpoint);
    ChatConnection::new(Arc::new(transport), Box::new(UnboundedMemory::new()))
}

fn connection(server: &MockServer) -> ChatConnection {
    connection_to(format!("{}{COMPLETIONS}", server.uri()))
}

async fn chat(conn: &mut ChatConnection, content: &str) -> parley::Outcome<parley::ResponseBody> {
    conn.complete_chat(
        content,
        &CancellationToken::new(),
        Model::Gpt4,
        &ChatParameters::new().with_max_tokens(64),
    )
    .await
}

#[tokio::test]
async fn posts_authenticated_json_and_records_the_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": 64
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-42",
            "object": "chat.completion",
            "created": 1690000000,
            "model": "gpt-4-0613",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "pong"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut conn = connection(&server);
    let body = chat(&mut conn, "ping").await.success().expect("success");

    assert_eq!(body.first_content(), Some("pong"));
    assert_eq!(body.usage.map(|u| u.total_tokens), Some(6));
    assert_eq!(conn.history().len(), 2);
}

#[tokio::test]
async fn status_codes_are_classified() {
    for (status, retryable) in [(429u16, true), (503, true), (400, false), (401, false)] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS))
            .respond_with(ResponseTemplate::new(status).set_body_string("{\"error\":{}}"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = chat(&mut connection(&server), "ping").await;

        assert_eq!(outcome.is_retryable(), retryable, "status {status}");
        assert_eq!(outcome.is_permanent(), !retryable, "status {status}");
    }
}

#[tokio::test]
async fn refused_connections_are_retryable() {
    let server = MockServer::start().await;
    let endpoint = format!("{}{COMPLETIONS}", server.uri());
    drop(server);

    let outcome = chat(&mut connection_to(endpoint), "ping").await;

    assert!(outcome.is_retryable());
}

#[tokio::test]
async fn streams_server_sent_events() {
    let sse = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"po\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ng\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut conn = connection(&server);
    let mut stream = conn
        .complete_chat_as_stream(
            "ping",
            &CancellationToken::new(),
            Model::Gpt35Turbo,
            &ChatParameters::new(),
        )
        .await
        .success()
        .expect("stream");

    let mut acc = StreamAccumulator::new();
    while let Some(item) = stream.next().await {
        acc.push(&item.success().expect("chunk"));
    }

    assert_eq!(acc.content(), "pong");
    assert_eq!(conn.history().len(), 1);
}

#[tokio::test]
async fn rejected_streams_report_the_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let outcome = connection(&server)
        .complete_chat_as_stream(
            "ping",
            &CancellationToken::new(),
            Model::Gpt35Turbo,
            &ChatParameters::new(),
        )
        .await;

    assert!(outcome.is_retryable());
    assert!(outcome.trace().unwrap().contains("slow down"));
}

/// Reads one request: headers, then as many body bytes as `content-length` says.
async fn read_request(socket: &mut TcpStream) {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        received.extend_from_slice(&buf[..n]);
        let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&received[..end]).to_ascii_lowercase();
        let length: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);
        if received.len() >= end + 4 + length {
            return;
        }
    }
}

/// Serves one response that promises 5000 body bytes, sends `partial`, then
/// hangs up.
async fn truncating_server(content_type: &'static str, partial: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\ncontent-length: 5000\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(partial.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        socket.shutdown().await.unwrap();
    });
    format!("http://{addr}{COMPLETIONS}")
}

#[tokio::test]
async fn connection_dropped_mid_body_is_retryable() {
    let endpoint = truncating_server("application/json", "{\"choices\": [").await;
    let mut conn = connection_to(endpoint);

    let outcome = chat(&mut conn, "ping").await;

    assert!(outcome.is_retryable(), "{:?}", outcome.trace());
    assert_eq!(conn.history().len(), 1);
}

#[tokio::test]
async fn connection_dropped_mid_stream_is_retryable() {
    let endpoint = truncating_server(
        "text/event-stream",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"po\"}}]}\n\n",
    )
    .await;
    let mut conn = connection_to(endpoint);

    let stream = conn
        .complete_chat_as_stream(
            "ping",
            &CancellationToken::new(),
            Model::Gpt35Turbo,
            &ChatParameters::new(),
        )
        .await
        .success()
        .expect("stream");
    let items: Vec<_> = stream.collect().await;

    let failure = items
        .iter()
        .find(|item| !item.is_success())
        .expect("a failure after the connection dropped");
    assert!(failure.is_retryable(), "{:?}", failure.trace());
    assert!(items[0].is_success());
}
