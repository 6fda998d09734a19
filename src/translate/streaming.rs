//! Translation of Bedrock ConverseStream events into `OpenAI` streaming chunks.
//!
//! The [`StreamTranslator`] maps each native event on its own: the content
//! block index travels on the event, so no state is carried between calls.
//! Each emitted chunk becomes the payload of one [`SseFrame`].

use super::bedrock_types::{
    ContentBlockDelta, ContentBlockDeltaEvent, ContentBlockStart, ContentBlockStartEvent,
    ConverseStreamEvent, MessageStopEvent, MetadataEvent,
};
use super::openai_types::{
    ChatStreamResponse, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
    CHAT_COMPLETION_CHUNK_OBJECT, SYSTEM_FINGERPRINT,
};
use super::response::{normalize_finish_reason, usage_from_native};

/// Payload of the frame that terminates every stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Translates native stream events into `OpenAI` chunks.
///
/// Usage:
///   let translator = StreamTranslator::new("anthropic.claude-3-haiku");
///   for event in events {
///       if let Some(chunk) = translator.process_event(&event) {
///           // send chunk as SSE
///       }
///   }
///   // then send SseFrame::done()
#[derive(Debug, Clone)]
pub struct StreamTranslator {
    model: String,
    created: i64,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self::with_created(model, chrono::Utc::now().timestamp())
    }

    pub fn with_created(model: &str, created: i64) -> Self {
        Self {
            model: model.to_string(),
            created,
        }
    }

    /// Map one native event to at most one chunk.
    pub fn process_event(&self, event: &ConverseStreamEvent) -> Option<ChatStreamResponse> {
        match event {
            ConverseStreamEvent::MessageStart(_) => Some(self.make_chunk(
                ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: Some(String::new()),
                    tool_calls: None,
                },
                None,
            )),
            ConverseStreamEvent::ContentBlockStart(ContentBlockStartEvent {
                content_block_index,
                start: Some(ContentBlockStart::ToolUse(tool_use)),
            }) => Some(self.make_chunk(
                ChunkDelta {
                    tool_calls: Some(vec![ChunkToolCall {
                        index: tool_call_index(*content_block_index),
                        id: Some(tool_use.tool_use_id.clone()),
                        call_type: Some("function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: Some(tool_use.name.clone()),
                            arguments: Some(String::new()),
                        }),
                    }]),
                    ..ChunkDelta::default()
                },
                None,
            )),
            ConverseStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
                content_block_index,
                delta: Some(delta),
            }) => {
                let delta = match delta {
                    ContentBlockDelta::Text(text) => ChunkDelta {
                        content: Some(text.clone()),
                        ..ChunkDelta::default()
                    },
                    // Partial JSON; clients concatenate fragments per index.
                    ContentBlockDelta::ToolUse(tool_use) => ChunkDelta {
                        tool_calls: Some(vec![ChunkToolCall {
                            index: tool_call_index(*content_block_index),
                            id: None,
                            call_type: None,
                            function: Some(ChunkToolCallFunction {
                                name: None,
                                arguments: Some(tool_use.input.clone()),
                            }),
                        }]),
                        ..ChunkDelta::default()
                    },
                };
                Some(self.make_chunk(delta, None))
            }
            ConverseStreamEvent::MessageStop(MessageStopEvent { stop_reason }) => Some(
                self.make_chunk(
                    ChunkDelta::default(),
                    Some(normalize_finish_reason(stop_reason.as_deref())),
                ),
            ),
            ConverseStreamEvent::Metadata(MetadataEvent { usage: Some(usage) })
                if usage.input_tokens.is_some() =>
            {
                Some(ChatStreamResponse {
                    choices: Vec::new(),
                    usage: Some(usage_from_native(Some(usage))),
                    ..self.make_chunk(ChunkDelta::default(), None)
                })
            }
            ConverseStreamEvent::ContentBlockStart(_)
            | ConverseStreamEvent::ContentBlockDelta(_)
            | ConverseStreamEvent::ContentBlockStop(_)
            | ConverseStreamEvent::Metadata(_) => None,
        }
    }

    fn make_chunk(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> ChatStreamResponse {
        ChatStreamResponse {
            id: String::new(),
            object: CHAT_COMPLETION_CHUNK_OBJECT.to_string(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: SYSTEM_FINGERPRINT.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(String::from),
            }],
            usage: None,
        }
    }
}

/// Bedrock counts the leading text block as index 0; `OpenAI` tool call
/// indices start after it.
fn tool_call_index(content_block_index: i32) -> i32 {
    content_block_index - 1
}

/// Whether a chunk is written to the client. Usage-only chunks always are;
/// other chunks need a choice unless the client asked for usage.
pub fn should_emit(chunk: &ChatStreamResponse, include_usage: bool) -> bool {
    let usage_only = chunk.choices.is_empty() && chunk.usage.is_some();
    usage_only || !chunk.choices.is_empty() || include_usage
}

/// Payload of one Server-Sent Events frame. The `data: <payload>\n\n`
/// framing is written by `axum::response::sse::Event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub data: String,
}

impl SseFrame {
    pub fn chunk(chunk: &ChatStreamResponse) -> serde_json::Result<Self> {
        Ok(Self {
            data: serde_json::to_string(chunk)?,
        })
    }

    pub fn done() -> Self {
        Self {
            data: DONE_SENTINEL.to_string(),
        }
    }
}
