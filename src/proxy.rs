use crate::error::Result;
use crate::image::ImageFetcher;
use crate::provider::{ConverseClient, ConverseEventStream};
use crate::translate::embedding::{cohere_to_openai, openai_to_cohere};
use crate::translate::openai_types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse};
use crate::translate::request::{openai_to_converse, ToolChoicePolicy};
use crate::translate::response::converse_to_openai;
use crate::translate::streaming::{should_emit, SseFrame, StreamTranslator};

use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use tracing::{debug, info, warn};

/// Outcome of a streaming request: SSE frames, always ending with `[DONE]`.
pub type SseStream = Pin<Box<dyn Stream<Item = SseFrame> + Send>>;

/// Everything a chat request needs besides the request itself.
#[derive(Clone, Copy)]
pub struct ChatBackends<'a> {
    pub client: &'a dyn ConverseClient,
    pub images: &'a dyn ImageFetcher,
    pub tool_choice: &'a ToolChoicePolicy,
}

/// Translate, call `Converse` once and assemble a single response.
pub async fn chat_completion(req: &ChatRequest, backends: ChatBackends<'_>) -> Result<ChatResponse> {
    let created = chrono::Utc::now().timestamp();
    let native = openai_to_converse(req, backends.images, backends.tool_choice).await?;

    let native_resp = backends.client.converse(native).await?;
    let resp = converse_to_openai(&req.model, &native_resp, created);

    info!(
        model = %req.model,
        prompt_tokens = resp.usage.prompt_tokens,
        completion_tokens = resp.usage.completion_tokens,
        "Completed"
    );

    Ok(resp)
}

/// Translate and open a `ConverseStream` call. Failures before the first
/// event are returned as errors; later failures end the stream early.
pub async fn chat_completion_stream(
    req: &ChatRequest,
    backends: ChatBackends<'_>,
) -> Result<SseStream> {
    let native = openai_to_converse(req, backends.images, backends.tool_choice).await?;
    let events = backends.client.converse_stream(native).await?;

    let translator = StreamTranslator::new(&req.model);
    Ok(Box::pin(sse_translate_stream(
        events,
        translator,
        req.include_usage(),
    )))
}

/// Reduce native events into SSE frames, one event at a time.
fn sse_translate_stream(
    mut events: ConverseEventStream,
    translator: StreamTranslator,
    include_usage: bool,
) -> impl Stream<Item = SseFrame> + Send + 'static {
    async_stream::stream! {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "Provider stream failed, closing stream");
                    break;
                }
            };

            let Some(chunk) = translator.process_event(&event) else {
                continue;
            };

            if let Some(usage) = &chunk.usage {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Stream usage"
                );
            }

            if !should_emit(&chunk, include_usage) {
                continue;
            }

            match SseFrame::chunk(&chunk) {
                Ok(frame) => yield frame,
                Err(e) => warn!(error = %e, "Skipping unserializable chunk"),
            }
        }

        yield SseFrame::done();
        debug!("Stream completed");
    }
}

/// Translate to the Cohere body, call `InvokeModel` and wrap the vector.
pub async fn embeddings(
    req: &EmbeddingRequest,
    client: &dyn ConverseClient,
) -> Result<EmbeddingResponse> {
    let native = openai_to_cohere(req)?;
    let body = serde_json::to_vec(&native)?;

    let raw = client.invoke_model(&req.model, body).await?;
    let resp = cohere_to_openai(&raw, &req.model)?;

    info!(model = %req.model, texts = native.texts.len(), "Embedded");
    Ok(resp)
}
