//! [`ConverseClient`] backed by `aws-sdk-bedrockruntime`.
//!
//! The proxy's own native types ([`crate::translate::bedrock_types`]) are
//! mapped onto SDK builders on the way out and back on the way in.

use std::collections::HashMap;
use std::fmt::Display;

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types as sdk;
use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::{Document, Number};
use futures::stream;
use tracing::debug;

use crate::config::BedrockConfig;
use crate::error::{ProxyError, Result};
use crate::provider::{ConverseClient, ConverseEventStream};
use crate::translate::bedrock_types as native;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Bedrock runtime client created once at start-up.
#[derive(Debug, Clone)]
pub struct BedrockClient {
    client: Client,
}

impl BedrockClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the AWS default chain, with optional region and
    /// endpoint overrides.
    pub async fn from_config(config: &BedrockConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;
        Self::new(Client::new(&sdk_config))
    }
}

#[async_trait]
impl ConverseClient for BedrockClient {
    async fn converse(&self, req: native::ConverseRequest) -> Result<native::ConverseResponse> {
        let input = SdkInput::from_request(&req)?;

        let output = self
            .client
            .converse()
            .model_id(&req.model_id)
            .set_messages(Some(input.messages))
            .set_system(input.system)
            .inference_config(input.inference_config)
            .set_tool_config(input.tool_config)
            .send()
            .await
            .map_err(sdk_error)?;

        let message = output
            .output()
            .and_then(|o| o.as_message().ok())
            .map(message_from_sdk);

        Ok(native::ConverseResponse {
            output: message.map(native::ConverseOutput::Message),
            stop_reason: Some(output.stop_reason().as_str().to_string()),
            usage: output.usage().map(usage_from_sdk),
        })
    }

    async fn converse_stream(&self, req: native::ConverseRequest) -> Result<ConverseEventStream> {
        let input = SdkInput::from_request(&req)?;

        let output = self
            .client
            .converse_stream()
            .model_id(&req.model_id)
            .set_messages(Some(input.messages))
            .set_system(input.system)
            .inference_config(input.inference_config)
            .set_tool_config(input.tool_config)
            .send()
            .await
            .map_err(sdk_error)?;

        // Unmapped event kinds are skipped; the first receive error ends the stream.
        let events = stream::unfold(Some(output.stream), |receiver| async move {
            let mut receiver = receiver?;
            loop {
                match receiver.recv().await {
                    Ok(Some(output)) => {
                        if let Some(event) = event_from_sdk(output) {
                            return Some((Ok(event), Some(receiver)));
                        }
                    }
                    Ok(None) => return None,
                    Err(e) => return Some((Err(sdk_error(e)), None)),
                }
            }
        });

        Ok(Box::pin(events))
    }

    async fn invoke_model(&self, model_id: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        debug!(model_id, bytes = body.len(), "InvokeModel");

        let output = self
            .client
            .invoke_model()
            .model_id(model_id)
            .content_type(JSON_CONTENT_TYPE)
            .accept(JSON_CONTENT_TYPE)
            .body(Blob::new(body))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(output.body.into_inner())
    }
}

fn sdk_error<E: std::error::Error>(err: E) -> ProxyError {
    ProxyError::provider(DisplayErrorContext(&err).to_string())
}

fn invalid(err: impl Display) -> ProxyError {
    ProxyError::provider(format!("invalid native request: {err}"))
}

/// Converse inputs in SDK form, shared by both entry points.
struct SdkInput {
    messages: Vec<sdk::Message>,
    system: Option<Vec<sdk::SystemContentBlock>>,
    inference_config: sdk::InferenceConfiguration,
    tool_config: Option<sdk::ToolConfiguration>,
}

impl SdkInput {
    fn from_request(req: &native::ConverseRequest) -> Result<Self> {
        let messages = req
            .messages
            .iter()
            .map(message_to_sdk)
            .collect::<Result<Vec<_>>>()?;

        let system: Vec<sdk::SystemContentBlock> = req
            .system
            .iter()
            .map(|native::SystemContentBlock::Text(text)| sdk::SystemContentBlock::Text(text.clone()))
            .collect();

        let tool_config = req.tool_config.as_ref().map(tool_config_to_sdk).transpose()?;

        Ok(Self {
            messages,
            system: (!system.is_empty()).then_some(system),
            inference_config: inference_to_sdk(&req.inference_config),
            tool_config,
        })
    }
}

fn role_to_sdk(role: native::ConversationRole) -> sdk::ConversationRole {
    match role {
        native::ConversationRole::User => sdk::ConversationRole::User,
        native::ConversationRole::Assistant => sdk::ConversationRole::Assistant,
    }
}

fn role_from_sdk(role: &sdk::ConversationRole) -> native::ConversationRole {
    match role {
        sdk::ConversationRole::User => native::ConversationRole::User,
        _ => native::ConversationRole::Assistant,
    }
}

fn message_to_sdk(message: &native::Message) -> Result<sdk::Message> {
    let content = message
        .content
        .iter()
        .map(block_to_sdk)
        .collect::<Result<Vec<_>>>()?;

    sdk::Message::builder()
        .role(role_to_sdk(message.role))
        .set_content(Some(content))
        .build()
        .map_err(invalid)
}

fn block_to_sdk(block: &native::ContentBlock) -> Result<sdk::ContentBlock> {
    match block {
        native::ContentBlock::Text(text) => Ok(sdk::ContentBlock::Text(text.clone())),
        native::ContentBlock::Image(image) => {
            let native::ImageSource::Bytes(bytes) = &image.source;
            sdk::ImageBlock::builder()
                .format(sdk::ImageFormat::from(image.format.as_str()))
                .source(sdk::ImageSource::Bytes(Blob::new(bytes.clone())))
                .build()
                .map(sdk::ContentBlock::Image)
                .map_err(invalid)
        }
        native::ContentBlock::ToolUse(tool_use) => sdk::ToolUseBlock::builder()
            .tool_use_id(&tool_use.tool_use_id)
            .name(&tool_use.name)
            .input(value_to_document(&tool_use.input))
            .build()
            .map(sdk::ContentBlock::ToolUse)
            .map_err(invalid),
        native::ContentBlock::ToolResult(result) => {
            let mut builder = sdk::ToolResultBlock::builder().tool_use_id(&result.tool_use_id);
            for native::ToolResultContentBlock::Text(text) in &result.content {
                builder = builder.content(sdk::ToolResultContentBlock::Text(text.clone()));
            }
            builder
                .build()
                .map(sdk::ContentBlock::ToolResult)
                .map_err(invalid)
        }
    }
}

fn inference_to_sdk(config: &native::InferenceConfig) -> sdk::InferenceConfiguration {
    sdk::InferenceConfiguration::builder()
        .set_max_tokens(
            config
                .max_tokens
                .map(|t| i32::try_from(t).unwrap_or(i32::MAX)),
        )
        .set_temperature(config.temperature)
        .set_top_p(config.top_p)
        .build()
}

fn tool_config_to_sdk(config: &native::ToolConfig) -> Result<sdk::ToolConfiguration> {
    let mut builder = sdk::ToolConfiguration::builder();

    for native::Tool::ToolSpec(spec) in &config.tools {
        let native::ToolInputSchema::Json(schema) = &spec.input_schema;
        let spec = sdk::ToolSpecification::builder()
            .name(&spec.name)
            .set_description(spec.description.clone())
            .input_schema(sdk::ToolInputSchema::Json(value_to_document(schema)))
            .build()
            .map_err(invalid)?;
        builder = builder.tools(sdk::Tool::ToolSpec(spec));
    }

    if let Some(choice) = &config.tool_choice {
        builder = builder.tool_choice(tool_choice_to_sdk(choice)?);
    }

    builder.build().map_err(invalid)
}

fn tool_choice_to_sdk(choice: &native::ToolChoice) -> Result<sdk::ToolChoice> {
    Ok(match choice {
        native::ToolChoice::Auto(_) => sdk::ToolChoice::Auto(sdk::AutoToolChoice::builder().build()),
        native::ToolChoice::Any(_) => sdk::ToolChoice::Any(sdk::AnyToolChoice::builder().build()),
        native::ToolChoice::Tool(tool) => sdk::ToolChoice::Tool(
            sdk::SpecificToolChoice::builder()
                .name(&tool.name)
                .build()
                .map_err(invalid)?,
        ),
    })
}

fn message_from_sdk(message: &sdk::Message) -> native::Message {
    let content = message
        .content()
        .iter()
        .filter_map(|block| match block {
            sdk::ContentBlock::Text(text) => Some(native::ContentBlock::Text(text.clone())),
            sdk::ContentBlock::ToolUse(tool_use) => {
                Some(native::ContentBlock::ToolUse(native::ToolUseBlock {
                    tool_use_id: tool_use.tool_use_id().to_string(),
                    name: tool_use.name().to_string(),
                    input: document_to_value(tool_use.input()),
                }))
            }
            _ => None,
        })
        .collect();

    native::Message::new(role_from_sdk(message.role()), content)
}

fn usage_from_sdk(usage: &sdk::TokenUsage) -> native::TokenUsage {
    native::TokenUsage {
        input_tokens: u32::try_from(usage.input_tokens()).ok(),
        output_tokens: u32::try_from(usage.output_tokens()).ok(),
        total_tokens: u32::try_from(usage.total_tokens()).ok(),
    }
}

fn event_from_sdk(output: sdk::ConverseStreamOutput) -> Option<native::ConverseStreamEvent> {
    use native::ConverseStreamEvent as Event;
    use sdk::ConverseStreamOutput as Output;

    let event = match output {
        Output::MessageStart(e) => Event::MessageStart(native::MessageStartEvent {
            role: role_from_sdk(e.role()),
        }),
        Output::ContentBlockStart(e) => {
            let start = e
                .start()
                .and_then(|s| s.as_tool_use().ok())
                .map(|tool_use| {
                    native::ContentBlockStart::ToolUse(native::ToolUseBlockStart {
                        tool_use_id: tool_use.tool_use_id().to_string(),
                        name: tool_use.name().to_string(),
                    })
                });
            Event::ContentBlockStart(native::ContentBlockStartEvent {
                content_block_index: e.content_block_index(),
                start,
            })
        }
        Output::ContentBlockDelta(e) => {
            let delta = match e.delta() {
                Some(sdk::ContentBlockDelta::Text(text)) => {
                    Some(native::ContentBlockDelta::Text(text.clone()))
                }
                Some(sdk::ContentBlockDelta::ToolUse(tool_use)) => {
                    Some(native::ContentBlockDelta::ToolUse(native::ToolUseBlockDelta {
                        input: tool_use.input().to_string(),
                    }))
                }
                _ => None,
            };
            Event::ContentBlockDelta(native::ContentBlockDeltaEvent {
                content_block_index: e.content_block_index(),
                delta,
            })
        }
        Output::ContentBlockStop(e) => Event::ContentBlockStop(native::ContentBlockStopEvent {
            content_block_index: e.content_block_index(),
        }),
        Output::MessageStop(e) => Event::MessageStop(native::MessageStopEvent {
            stop_reason: Some(e.stop_reason().as_str().to_string()),
        }),
        Output::Metadata(e) => Event::Metadata(native::MetadataEvent {
            usage: e.usage().map(usage_from_sdk),
        }),
        _ => return None,
    };

    Some(event)
}

/// Convert a `serde_json::Value` to an AWS `Document`.
fn value_to_document(value: &serde_json::Value) -> Document {
    match value {
        serde_json::Value::Null => Document::Null,
        serde_json::Value::Bool(b) => Document::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(Number::PosInt)
            .or_else(|| n.as_i64().map(Number::NegInt))
            .or_else(|| n.as_f64().map(Number::Float))
            .map_or(Document::Null, Document::Number),
        serde_json::Value::String(s) => Document::String(s.clone()),
        serde_json::Value::Array(items) => {
            Document::Array(items.iter().map(value_to_document).collect())
        }
        serde_json::Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_document(v)))
                .collect::<HashMap<_, _>>(),
        ),
    }
}

/// Convert an AWS `Document` to a `serde_json::Value`.
fn document_to_value(doc: &Document) -> serde_json::Value {
    match doc {
        Document::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_value(v)))
                .collect(),
        ),
        Document::Array(items) => {
            serde_json::Value::Array(items.iter().map(document_to_value).collect())
        }
        Document::Number(Number::PosInt(u)) => serde_json::Value::from(*u),
        Document::Number(Number::NegInt(i)) => serde_json::Value::from(*i),
        Document::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Document::String(s) => serde_json::Value::String(s.clone()),
        Document::Bool(b) => serde_json::Value::Bool(*b),
        Document::Null => serde_json::Value::Null,
    }
}
