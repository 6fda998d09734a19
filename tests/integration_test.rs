use async_trait::async_trait;
use axum::http::header;
use axum::routing::get;
use axum::Router;
use bedrock_proxy::image::resolve_image;
use bedrock_proxy::translate::bedrock_types::*;
use bedrock_proxy::{
    build_router, AppState, ConverseClient, ConverseEventStream, HttpImageFetcher, ProxyConfig,
    ProxyError, Result,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

// ────────────────────────────────────────────────────────────────
// Test doubles
// ────────────────────────────────────────────────────────────────

/// Scripted Bedrock. `None` in `events` is a provider failure at that point.
#[derive(Default)]
struct MockBedrock {
    response: ConverseResponse,
    events: Vec<Option<ConverseStreamEvent>>,
    fail_stream_open: bool,
    embed_body: Vec<u8>,
    last_request: Mutex<Option<ConverseRequest>>,
    last_invoke: Mutex<Option<(String, serde_json::Value)>>,
}

impl MockBedrock {
    fn last_request(&self) -> ConverseRequest {
        self.last_request
            .lock()
            .unwrap()
            .clone()
            .expect("no converse call recorded")
    }
}

#[async_trait]
impl ConverseClient for MockBedrock {
    async fn converse(&self, req: ConverseRequest) -> Result<ConverseResponse> {
        *self.last_request.lock().unwrap() = Some(req);
        Ok(self.response.clone())
    }

    async fn converse_stream(&self, req: ConverseRequest) -> Result<ConverseEventStream> {
        *self.last_request.lock().unwrap() = Some(req);
        if self.fail_stream_open {
            return Err(ProxyError::provider("AccessDeniedException"));
        }

        let items: Vec<Result<ConverseStreamEvent>> = self
            .events
            .iter()
            .cloned()
            .map(|e| e.ok_or_else(|| ProxyError::provider("stream interrupted")))
            .collect();
        Ok(Box::pin(tokio_stream::iter(items)))
    }

    async fn invoke_model(&self, model_id: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let json: serde_json::Value = serde_json::from_slice(&body)?;
        *self.last_invoke.lock().unwrap() = Some((model_id.to_string(), json));
        Ok(self.embed_body.clone())
    }
}

fn event(value: serde_json::Value) -> Option<ConverseStreamEvent> {
    Some(serde_json::from_value(value).unwrap())
}

fn text_response(text: &str, stop_reason: &str) -> ConverseResponse {
    ConverseResponse {
        output: Some(ConverseOutput::Message(Message::new(
            ConversationRole::Assistant,
            vec![ContentBlock::Text(text.to_string())],
        ))),
        stop_reason: Some(stop_reason.to_string()),
        usage: Some(TokenUsage {
            input_tokens: Some(5),
            output_tokens: Some(3),
            total_tokens: Some(8),
        }),
    }
}

async fn spawn_proxy(mock: Arc<MockBedrock>) -> SocketAddr {
    spawn_proxy_with(ProxyConfig::default(), mock).await
}

async fn spawn_proxy_with(config: ProxyConfig, mock: Arc<MockBedrock>) -> SocketAddr {
    let state = Arc::new(AppState::new(
        config,
        mock,
        Arc::new(HttpImageFetcher::default()),
    ));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn spawn_image_server() -> SocketAddr {
    let app = Router::new()
        .route(
            "/cat.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, 0x50, 0x4e, 0x47]) }),
        )
        .route("/raw", get(|| async { vec![1u8, 2, 3] }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn post_json(addr: SocketAddr, path: &str, body: &serde_json::Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .json(body)
        .send()
        .await
        .unwrap()
}

/// Payloads of the `data:` lines of an SSE body, in order.
fn parse_sse_data(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

fn chunks(data: &[String]) -> Vec<serde_json::Value> {
    data.iter()
        .filter(|d| d.as_str() != "[DONE]")
        .map(|d| serde_json::from_str(d).unwrap())
        .collect()
}

// ────────────────────────────────────────────────────────────────
// Chat completions
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_non_streaming_roundtrip() {
    let mock = Arc::new(MockBedrock {
        response: text_response("hello", "end_turn"),
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock.clone()).await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "anthropic.x");
    assert_eq!(body["system_fingerprint"], "fp");
    assert_eq!(body["choices"][0]["index"], 0);
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "hello");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 8);

    let native = mock.last_request();
    assert_eq!(native.model_id, "anthropic.x");
    assert_eq!(native.messages.len(), 1);
    assert_eq!(
        native.messages[0].content,
        vec![ContentBlock::Text("hi".to_string())]
    );
}

#[tokio::test]
async fn test_tool_use_response_over_http() {
    let mock = Arc::new(MockBedrock {
        response: ConverseResponse {
            output: Some(ConverseOutput::Message(Message::new(
                ConversationRole::Assistant,
                vec![ContentBlock::ToolUse(ToolUseBlock {
                    tool_use_id: "tooluse_1".to_string(),
                    name: "get_weather".to_string(),
                    input: serde_json::json!({"city": "London"}),
                })],
            ))),
            stop_reason: Some("tool_use".to_string()),
            usage: None,
        },
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock.clone()).await;

    let resp = post_json(
        addr,
        "/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "messages": [{"role": "user", "content": "Weather in London?"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
                }
            }],
            "tool_choice": "required"
        }),
    )
    .await;

    let body: serde_json::Value = resp.json().await.unwrap();
    let message = &body["choices"][0]["message"];
    assert!(message["content"].is_null());
    assert_eq!(message["tool_calls"][0]["id"], "tooluse_1");
    assert_eq!(message["tool_calls"][0]["function"]["name"], "get_weather");
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    assert_eq!(body["usage"]["prompt_tokens"], 0);

    let tool_config = mock.last_request().tool_config.unwrap();
    assert_eq!(tool_config.tools.len(), 1);
    assert_eq!(tool_config.tool_choice, Some(ToolChoice::Any(AnyToolChoice {})));
}

#[tokio::test]
async fn test_streaming_roundtrip() {
    let mock = Arc::new(MockBedrock {
        events: vec![
            event(serde_json::json!({"messageStart": {"role": "assistant"}})),
            event(serde_json::json!({
                "contentBlockDelta": {"contentBlockIndex": 0, "delta": {"text": "Hel"}}
            })),
            event(serde_json::json!({
                "contentBlockDelta": {"contentBlockIndex": 0, "delta": {"text": "lo"}}
            })),
            event(serde_json::json!({"contentBlockStop": {"contentBlockIndex": 0}})),
            event(serde_json::json!({"messageStop": {"stopReason": "end_turn"}})),
            event(serde_json::json!({
                "metadata": {"usage": {"inputTokens": 4, "outputTokens": 2, "totalTokens": 6}}
            })),
        ],
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock).await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let data = parse_sse_data(&resp.text().await.unwrap());
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(data.iter().filter(|d| d.as_str() == "[DONE]").count(), 1);

    let chunks = chunks(&data);
    assert_eq!(chunks.len(), 5);
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert!(chunks
        .iter()
        .all(|c| c["object"] == "chat.completion.chunk" && c["system_fingerprint"] == "fp"));

    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Hello");

    assert_eq!(chunks[3]["choices"][0]["finish_reason"], "stop");
    assert_eq!(chunks[4]["choices"], serde_json::json!([]));
    assert_eq!(chunks[4]["usage"]["prompt_tokens"], 4);
}

#[tokio::test]
async fn test_streaming_tool_call_indices() {
    let mock = Arc::new(MockBedrock {
        events: vec![
            event(serde_json::json!({"messageStart": {"role": "assistant"}})),
            event(serde_json::json!({
                "contentBlockStart": {
                    "contentBlockIndex": 2,
                    "start": {"toolUse": {"toolUseId": "tooluse_1", "name": "lookup"}}
                }
            })),
            event(serde_json::json!({
                "contentBlockDelta": {"contentBlockIndex": 2, "delta": {"toolUse": {"input": "{\"q\":"}}}
            })),
            event(serde_json::json!({
                "contentBlockDelta": {"contentBlockIndex": 2, "delta": {"toolUse": {"input": "\"rust\"}"}}}
            })),
            event(serde_json::json!({"messageStop": {"stopReason": "tool_use"}})),
        ],
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock).await;

    let resp = post_json(
        addr,
        "/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "stream": true,
            "messages": [{"role": "user", "content": "search"}]
        }),
    )
    .await;

    let data = parse_sse_data(&resp.text().await.unwrap());
    let chunks = chunks(&data);

    let start = &chunks[1]["choices"][0]["delta"]["tool_calls"][0];
    assert_eq!(start["index"], 1);
    assert_eq!(start["id"], "tooluse_1");
    assert_eq!(start["function"]["name"], "lookup");

    let arguments: String = chunks[2..4]
        .iter()
        .map(|c| {
            let call = &c["choices"][0]["delta"]["tool_calls"][0];
            assert_eq!(call["index"], 1);
            call["function"]["arguments"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(arguments, "{\"q\":\"rust\"}");

    assert_eq!(chunks[4]["choices"][0]["finish_reason"], "tool_calls");
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn test_streaming_failure_midway_still_terminates() {
    let mock = Arc::new(MockBedrock {
        events: vec![
            event(serde_json::json!({"messageStart": {"role": "assistant"}})),
            None,
            event(serde_json::json!({"messageStop": {"stopReason": "end_turn"}})),
        ],
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock).await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let data = parse_sse_data(&resp.text().await.unwrap());
    assert_eq!(data.len(), 2);
    assert_eq!(data[1], "[DONE]");
}

#[tokio::test]
async fn test_empty_stream_only_terminates() {
    let addr = spawn_proxy(Arc::new(MockBedrock::default())).await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;

    assert_eq!(resp.text().await.unwrap(), "data: [DONE]\n\n");
}

#[tokio::test]
async fn test_stream_open_failure_is_provider_error() {
    let mock = Arc::new(MockBedrock {
        fail_stream_open: true,
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock).await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 502);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "api_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Provider error:"));
}

// ────────────────────────────────────────────────────────────────
// Validation and unsupported input
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_body_is_validation_failed() {
    let addr = spawn_proxy(Arc::new(MockBedrock::default())).await;
    let client = reqwest::Client::new();

    for body in ["{not json", r#"{"model": "anthropic.x"}"#, r#"{"messages": "hi"}"#] {
        let resp = client
            .post(format!("http://{addr}/v1/chat/completions"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200, "body: {body}");
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json, serde_json::json!({"message": "Validation failed"}));
    }
}

#[tokio::test]
async fn test_unsupported_content_part_is_rejected() {
    let mock = Arc::new(MockBedrock::default());
    let addr = spawn_proxy(mock.clone()).await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "messages": [{
                "role": "user",
                "content": [{"type": "input_audio", "input_audio": {"data": "", "format": "wav"}}]
            }]
        }),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(mock.last_request.lock().unwrap().is_none());
}

// ────────────────────────────────────────────────────────────────
// Images
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_image_fetcher_against_local_server() {
    let addr = spawn_image_server().await;
    let fetcher = HttpImageFetcher::default();

    let png = tokio_test::assert_ok!(resolve_image(&format!("http://{addr}/cat.png"), &fetcher).await);
    assert_eq!(png.format, "png");
    assert_eq!(png.source, ImageSource::Bytes(vec![0x89, 0x50, 0x4e, 0x47]));

    let raw = tokio_test::assert_ok!(resolve_image(&format!("http://{addr}/raw"), &fetcher).await);
    assert_eq!(raw.format, "jpeg");

    let missing = tokio_test::assert_err!(
        resolve_image(&format!("http://{addr}/missing.png"), &fetcher).await
    );
    assert!(matches!(missing, ProxyError::ImageFetch { .. }));
}

#[tokio::test]
async fn test_image_url_is_fetched_into_native_block() {
    let images = spawn_image_server().await;
    let mock = Arc::new(MockBedrock {
        response: text_response("a cat", "end_turn"),
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock.clone()).await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "What is this?"},
                    {"type": "image_url", "image_url": {"url": format!("http://{images}/cat.png")}}
                ]
            }]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let native = mock.last_request();
    let content = &native.messages[0].content;
    assert_eq!(content.len(), 2);
    match &content[1] {
        ContentBlock::Image(image) => assert_eq!(image.format, "png"),
        other => panic!("Expected image block, got {other:?}"),
    }
}

fn inline_image_request(base64_len: usize) -> serde_json::Value {
    serde_json::json!({
        "model": "anthropic.x",
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": "Describe it"},
                {"type": "image_url", "image_url": {
                    "url": format!("data:image/png;base64,{}", "A".repeat(base64_len))
                }}
            ]
        }]
    })
}

#[tokio::test]
async fn test_large_inline_image_is_accepted() {
    let mock = Arc::new(MockBedrock {
        response: text_response("ok", "end_turn"),
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock.clone()).await;

    // 3 MiB of base64, above axum's built-in 2 MiB body limit.
    let resp = post_json(addr, "/v1/chat/completions", &inline_image_request(3 * 1024 * 1024)).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "ok");

    let native = mock.last_request();
    match &native.messages[0].content[1] {
        ContentBlock::Image(image) => {
            assert_eq!(image.format, "png");
            let ImageSource::Bytes(bytes) = &image.source;
            assert_eq!(bytes.len(), 3 * 1024 * 1024 / 4 * 3);
        }
        other => panic!("Expected image block, got {other:?}"),
    }
}

#[tokio::test]
async fn test_body_over_configured_limit_is_rejected() {
    let config = ProxyConfig {
        max_body_bytes: 64 * 1024,
        ..ProxyConfig::default()
    };
    let mock = Arc::new(MockBedrock::default());
    let addr = spawn_proxy_with(config, mock.clone()).await;

    let resp = post_json(addr, "/v1/chat/completions", &inline_image_request(128 * 1024)).await;
    assert_eq!(resp.status(), 413);
    assert!(mock.last_request.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_image_is_rejected() {
    let images = spawn_image_server().await;
    let addr = spawn_proxy(Arc::new(MockBedrock::default())).await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": "anthropic.x",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": format!("http://{images}/missing.png")}}
                ]
            }]
        }),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Unable to access the image URL"));
}

// ────────────────────────────────────────────────────────────────
// Embeddings and misc routes
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_embeddings_roundtrip() {
    let mock = Arc::new(MockBedrock {
        embed_body: br#"{"id": "e-1", "embeddings": [[0.25, -0.5, 1.0]], "texts": ["abc"]}"#.to_vec(),
        ..MockBedrock::default()
    });
    let addr = spawn_proxy(mock.clone()).await;

    let resp = post_json(
        addr,
        "/v1/embeddings",
        &serde_json::json!({"input": "abc", "model": "cohere.x", "encoding_format": "float"}),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "list");
    assert_eq!(body["model"], "cohere.x");
    assert_eq!(body["data"][0]["object"], "embedding");
    assert_eq!(body["data"][0]["index"], 0);
    assert_eq!(body["data"][0]["embedding"], serde_json::json!([0.25, -0.5, 1.0]));
    assert_eq!(body["usage"]["total_tokens"], 0);

    let (model_id, native) = mock.last_invoke.lock().unwrap().clone().unwrap();
    assert_eq!(model_id, "cohere.x");
    assert_eq!(
        native,
        serde_json::json!({"texts": ["abc"], "input_type": "search_document", "truncate": "END"})
    );
}

#[tokio::test]
async fn test_root_and_health() {
    let addr = spawn_proxy(Arc::new(MockBedrock::default())).await;
    let client = reqwest::Client::new();

    let root = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(root.status(), 200);
    assert_eq!(root.text().await.unwrap(), "ok");

    let health: serde_json::Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());
}

// ────────────────────────────────────────────────────────────────
// Live tests (need AWS credentials with Bedrock model access)
// ────────────────────────────────────────────────────────────────

fn live_model() -> String {
    std::env::var("BEDROCK_TEST_MODEL")
        .unwrap_or_else(|_| "anthropic.claude-3-haiku-20240307-v1:0".to_string())
}

async fn spawn_live_proxy() -> SocketAddr {
    let config = ProxyConfig::default();
    let client = bedrock_proxy::BedrockClient::from_config(&config.bedrock).await;
    let state = Arc::new(AppState::new(
        config,
        Arc::new(client),
        Arc::new(HttpImageFetcher::default()),
    ));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

#[tokio::test]
#[ignore = "requires AWS credentials with Bedrock access"]
async fn test_live_non_streaming() {
    let addr = spawn_live_proxy().await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": live_model(),
            "max_tokens": 30,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": "Respond very briefly."},
                {"role": "user", "content": "Say 'pong'"}
            ]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    println!("Live response: {body}");
    assert!(body["choices"][0]["message"]["content"].is_string());
    assert!(body["usage"]["prompt_tokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
#[ignore = "requires AWS credentials with Bedrock access"]
async fn test_live_streaming() {
    let addr = spawn_live_proxy().await;

    let resp = post_json(
        addr,
        "/v1/chat/completions",
        &serde_json::json!({
            "model": live_model(),
            "max_tokens": 50,
            "stream": true,
            "messages": [{"role": "user", "content": "Count from 1 to 5."}]
        }),
    )
    .await;

    let data = parse_sse_data(&resp.text().await.unwrap());
    println!("Live stream frames: {}", data.len());
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
    assert!(chunks(&data)
        .iter()
        .any(|c| c["choices"][0]["finish_reason"].is_string()));
}
