use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cabinet::gateway::chat_completions::{ChatCompletionsAdapter, ChatProvider};
use cabinet::gateway::usage::{CallStatus, ProviderCallRecord};
use cabinet::gateway::{
    Attribution, ChatRequest, ErrorClass, FinishReason, GatewayConfig, Message, NoopUsageSink,
    ProviderError, ProviderGateway, UsageSink,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> ChatCompletionsAdapter {
    ChatCompletionsAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap()
}

fn request(model: &str) -> ChatRequest {
    ChatRequest::new(model, vec![Message::user("hi")], Attribution::new("test"))
}

fn ok_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 5 }
    })
}

fn fast_config(max_retries: u32) -> GatewayConfig {
    GatewayConfig {
        max_retries,
        retry_base_delay: Duration::ZERO,
        max_jitter: Duration::ZERO,
        max_retry_after: Duration::from_millis(50),
    }
}

/// Read one HTTP/1.1 request (headers plus `content-length` body).
async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < end + 4 + body_len {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return;
        }
    }
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<ProviderCallRecord>>,
}

#[async_trait]
impl UsageSink for CollectingSink {
    async fn record(&self, record: ProviderCallRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[tokio::test]
async fn adapter_sends_model_and_messages_and_parses_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [{ "role": "user", "content": "hi" }],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("hello")))
        .mount(&server)
        .await;

    let resp = adapter(&server).chat(&request("gpt-4o-mini")).await.unwrap();
    assert_eq!(resp.content, "hello");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 3);
    assert_eq!(resp.output_tokens, 5);
}

#[tokio::test]
async fn adapter_maps_404_to_not_found_with_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("x-request-id", "req-9")
                .set_body_json(json!({
                    "error": { "message": "no such model", "code": "model_not_found" }
                })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).chat(&request("ghost-model")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
    match err {
        ProviderError::NotFound {
            model,
            message,
            context,
        } => {
            assert_eq!(model, "ghost-model");
            assert_eq!(message, "no such model");
            let ctx = context.expect("expected error context");
            assert_eq!(ctx.http_status, Some(404));
            assert_eq!(ctx.provider_code.as_deref(), Some("model_not_found"));
            assert_eq!(ctx.request_id.as_deref(), Some("req-9"));
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn adapter_reads_retry_after_on_429() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "2")
                .set_body_json(json!({ "error": { "message": "slow down" } })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).chat(&request("m")).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.class(), ErrorClass::Transient);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
}

#[tokio::test]
async fn adapter_treats_400_as_unclassified() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let err = adapter(&server).chat(&request("m")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unclassified);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn gateway_does_not_retry_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(adapter(&server), Arc::new(NoopUsageSink), fast_config(3));
    let err = gateway.chat(request("missing")).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound { .. }));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn gateway_retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first: ResponseTemplate::new(503).set_body_json(json!({
                "error": { "message": "overloaded", "code": 503 }
            })),
            second: ResponseTemplate::new(200).set_body_json(ok_body("ok")),
        })
        .mount(&server)
        .await;

    let sink = Arc::new(CollectingSink::default());
    let gateway = ProviderGateway::with_config(adapter(&server), Arc::clone(&sink), fast_config(1));

    let resp = gateway.chat(request("m")).await.unwrap();
    assert_eq!(resp.content, "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].attempt, 1);
    assert_eq!(records[0].status, CallStatus::Error);
    assert_eq!(records[1].attempt, 2);
    assert_eq!(records[1].status, CallStatus::Success);
    assert_eq!(records[1].caller, "test");
}

#[tokio::test]
async fn gateway_honours_retry_after_on_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first: ResponseTemplate::new(429).insert_header("retry-after", "0"),
            second: ResponseTemplate::new(200).set_body_json(ok_body("after wait")),
        })
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(adapter(&server), Arc::new(NoopUsageSink), fast_config(2));
    let resp = gateway.chat(request("m")).await.unwrap();
    assert_eq!(resp.content, "after wait");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn gateway_gives_up_after_retry_budget() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(adapter(&server), Arc::new(NoopUsageSink), fast_config(2));
    let err = gateway.chat(request("m")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn gateway_retries_network_failures() {
    // Nothing listens on the discard port.
    let adapter =
        ChatCompletionsAdapter::with_config("sk-test", "http://127.0.0.1:9", Duration::from_secs(2))
            .unwrap();
    let sink = Arc::new(CollectingSink::default());
    let gateway = ProviderGateway::with_config(adapter, Arc::clone(&sink), fast_config(1));

    let err = gateway.chat(request("m")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Network);
    assert_eq!(sink.records.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn adapter_survives_unbounded_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("retry-after", "99999999999999999999999"),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).chat(&request("m")).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));
    assert_eq!(err.class(), ErrorClass::Transient);
    assert_eq!(err.retry_after(), Some(Duration::MAX));
}

#[tokio::test]
async fn gateway_caps_huge_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first: ResponseTemplate::new(429).insert_header("retry-after", "3600000"),
            second: ResponseTemplate::new(200).set_body_json(ok_body("capped")),
        })
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(adapter(&server), Arc::new(NoopUsageSink), fast_config(1));
    let resp = tokio::time::timeout(Duration::from_secs(5), gateway.chat(request("m")))
        .await
        .expect("retry delay was not capped")
        .unwrap();
    assert_eq!(resp.content, "capped");
}

#[tokio::test]
async fn gateway_counts_transient_and_network_retries_separately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // 503, then a dropped connection, then success.
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        write_response(
            &mut stream,
            "503 Service Unavailable",
            r#"{"error": {"message": "overloaded"}}"#,
        )
        .await;

        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        drop(stream);

        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        write_response(&mut stream, "200 OK", &ok_body("third time").to_string()).await;
    });

    let adapter =
        ChatCompletionsAdapter::with_config("sk-test", format!("http://{addr}"), Duration::from_secs(5))
            .unwrap();
    let sink = Arc::new(CollectingSink::default());
    let gateway = ProviderGateway::with_config(adapter, Arc::clone(&sink), fast_config(1));

    let resp = gateway.chat(request("m")).await.unwrap();
    assert_eq!(resp.content, "third time");
    server.await.unwrap();

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, CallStatus::Error);
    assert_eq!(records[1].status, CallStatus::Error);
    assert_eq!(records[1].error_code.as_deref(), Some("network_error"));
    assert_eq!(records[2].attempt, 3);
    assert_eq!(records[2].status, CallStatus::Success);
}
