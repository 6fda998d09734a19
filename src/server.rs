use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::image::ImageFetcher;
use crate::provider::ConverseClient;
use crate::proxy::{self, ChatBackends, SseStream};
use crate::translate::openai_types::{ChatRequest, EmbeddingRequest};
use crate::translate::request::ToolChoicePolicy;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Process-wide state, read-only after start-up.
#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: Arc<dyn ConverseClient>,
    pub images: Arc<dyn ImageFetcher>,
    pub tool_choice: ToolChoicePolicy,
}

impl AppState {
    pub fn new(
        config: ProxyConfig,
        client: Arc<dyn ConverseClient>,
        images: Arc<dyn ImageFetcher>,
    ) -> Self {
        let tool_choice = config.tool_choice_policy();
        Self {
            config,
            client,
            images,
            tool_choice,
        }
    }

    fn chat_backends(&self) -> ChatBackends<'_> {
        ChatBackends {
            client: self.client.as_ref(),
            images: self.images.as_ref(),
            tool_choice: &self.tool_choice,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/chat/completions", post(handle_chat))
        .route("/v1/chat/completions", post(handle_chat))
        .route("/embeddings", post(handle_embeddings))
        .route("/v1/embeddings", post(handle_embeddings))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bodies are parsed by hand so malformed JSON answers with the
/// `Validation failed` contract instead of axum's rejection.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ProxyError> {
    serde_json::from_slice(body).map_err(|e| ProxyError::validation(e.to_string()))
}

async fn handle_chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let is_streaming = req.is_streaming();

    info!(
        model = %req.model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "Chat request"
    );

    let backends = state.chat_backends();
    if is_streaming {
        match proxy::chat_completion_stream(&req, backends).await {
            Ok(stream) => sse_response(stream),
            Err(e) => e.into_response(),
        }
    } else {
        match proxy::chat_completion(&req, backends).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

fn sse_response(stream: SseStream) -> Response {
    let event_stream = stream.map(|frame| -> Result<Event, Infallible> {
        Ok(Event::default().data(frame.data))
    });

    Sse::new(event_stream).into_response()
}

async fn handle_embeddings(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: EmbeddingRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    info!(model = %req.model, "Embedding request");

    match proxy::embeddings(&req, state.client.as_ref()).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_root() -> &'static str {
    "ok"
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
