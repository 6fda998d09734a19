//! Translate `OpenAI` Chat Completions requests into Bedrock Converse requests.
//!
//! Handles system prompts, multi-part user content (text, images), tool results,
//! assistant tool calls and tool choice mapping. Tool results become synthetic
//! user turns because Converse has no `tool` role.

use tracing::{debug, warn};

use super::bedrock_types::{
    AnyToolChoice, AutoToolChoice, ContentBlock, ConversationRole, ConverseRequest,
    InferenceConfig, Message, SpecificToolChoice, SystemContentBlock, Tool, ToolChoice,
    ToolConfig, ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolSpecification,
    ToolUseBlock,
};
use super::openai_types::{
    ChatMessage, ChatRequest, ChatTool, ChatToolCall, ChatToolChoice, ContentPart, SystemContent,
    ToolChoiceMode, UserContent,
};
use crate::error::{ProxyError, Result};
use crate::image::{resolve_image, ImageFetcher};

/// Model-id prefixes whose Converse endpoint rejects `toolChoice`.
pub const TOOL_CHOICE_UNSUPPORTED_PREFIXES: &[&str] = &["meta.llama3-1-"];

/// Which models get `tool_choice` forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolChoicePolicy {
    unsupported_prefixes: Vec<String>,
}

impl Default for ToolChoicePolicy {
    fn default() -> Self {
        Self::new(TOOL_CHOICE_UNSUPPORTED_PREFIXES.iter().map(|p| p.to_string()))
    }
}

impl ToolChoicePolicy {
    pub fn new(prefixes: impl IntoIterator<Item = String>) -> Self {
        Self {
            unsupported_prefixes: prefixes.into_iter().collect(),
        }
    }

    pub fn supports(&self, model_id: &str) -> bool {
        !self
            .unsupported_prefixes
            .iter()
            .any(|prefix| model_id.starts_with(prefix.as_str()))
    }
}

/// Translate an `OpenAI` chat request into a Converse request.
///
/// Images referenced by URL are fetched one at a time; the first failure
/// aborts the whole translation.
pub async fn openai_to_converse(
    req: &ChatRequest,
    fetcher: &dyn ImageFetcher,
    policy: &ToolChoicePolicy,
) -> Result<ConverseRequest> {
    let system = system_prompts(&req.messages);

    let mut messages = Vec::with_capacity(req.messages.len());
    for msg in &req.messages {
        if let Some(translated) = translate_message(msg, fetcher).await? {
            messages.push(translated);
        }
    }

    let tool_config = req
        .tools
        .as_ref()
        .map(|tools| tool_config(tools, req.tool_choice.as_ref(), &req.model, policy));

    Ok(ConverseRequest {
        model_id: req.model.clone(),
        messages,
        system,
        inference_config: InferenceConfig {
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
        },
        tool_config,
    })
}

/// Plain-string system messages, in order. Structured system content is not
/// forwarded.
fn system_prompts(messages: &[ChatMessage]) -> Vec<SystemContentBlock> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            ChatMessage::System {
                content: SystemContent::Text(text),
                ..
            } => Some(SystemContentBlock::Text(text.clone())),
            ChatMessage::System {
                content: SystemContent::Parts(parts),
                ..
            } => {
                debug!(parts = parts.len(), "ignoring structured system content");
                None
            }
            _ => None,
        })
        .collect()
}

async fn translate_message(msg: &ChatMessage, fetcher: &dyn ImageFetcher) -> Result<Option<Message>> {
    match msg {
        ChatMessage::System { .. } => Ok(None),
        ChatMessage::User { content, .. } => {
            let blocks = translate_user_content(content, fetcher).await?;
            Ok(Some(Message::new(ConversationRole::User, blocks)))
        }
        ChatMessage::Tool {
            content,
            tool_call_id,
        } => {
            let result = ContentBlock::ToolResult(ToolResultBlock {
                tool_use_id: tool_call_id.clone(),
                content: vec![ToolResultContentBlock::Text(content.clone())],
            });
            Ok(Some(Message::new(ConversationRole::User, vec![result])))
        }
        ChatMessage::Assistant {
            content,
            tool_calls,
            ..
        } => translate_assistant_message(content.as_deref(), tool_calls.as_deref()),
    }
}

async fn translate_user_content(
    content: &UserContent,
    fetcher: &dyn ImageFetcher,
) -> Result<Vec<ContentBlock>> {
    let parts = match content {
        UserContent::Text(text) => return Ok(vec![ContentBlock::Text(text.clone())]),
        UserContent::Parts(parts) => parts,
    };

    let mut blocks = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            ContentPart::Text { text } => blocks.push(ContentBlock::Text(text.clone())),
            ContentPart::ImageUrl { image_url } => {
                let image = resolve_image(&image_url.url, fetcher).await?;
                blocks.push(ContentBlock::Image(image));
            }
            ContentPart::Unsupported => {
                return Err(ProxyError::unsupported(
                    "user content parts must be text or image_url",
                ));
            }
        }
    }

    Ok(blocks)
}

/// Text wins over tool calls. Only the first tool call of a turn is carried.
fn translate_assistant_message(
    content: Option<&str>,
    tool_calls: Option<&[ChatToolCall]>,
) -> Result<Option<Message>> {
    if let Some(text) = content.filter(|t| !t.is_empty()) {
        return Ok(Some(Message::new(
            ConversationRole::Assistant,
            vec![ContentBlock::Text(text.to_string())],
        )));
    }

    let Some(first) = tool_calls.and_then(<[ChatToolCall]>::first) else {
        return Ok(None);
    };

    let calls = tool_calls.map_or(0, <[ChatToolCall]>::len);
    if calls > 1 {
        warn!(
            kept = %first.id,
            dropped = calls - 1,
            "assistant turn has parallel tool calls; only the first is sent upstream"
        );
    }

    let input: serde_json::Value = serde_json::from_str(&first.function.arguments).map_err(|e| {
        ProxyError::unsupported(format!(
            "arguments of tool call '{}' are not valid JSON: {e}",
            first.id
        ))
    })?;
    if !input.is_object() {
        return Err(ProxyError::unsupported(format!(
            "arguments of tool call '{}' must be a JSON object",
            first.id
        )));
    }

    let tool_use = ContentBlock::ToolUse(ToolUseBlock {
        tool_use_id: first.id.clone(),
        name: first.function.name.clone(),
        input,
    });

    Ok(Some(Message::new(ConversationRole::Assistant, vec![tool_use])))
}

fn tool_config(
    tools: &[ChatTool],
    choice: Option<&ChatToolChoice>,
    model_id: &str,
    policy: &ToolChoicePolicy,
) -> ToolConfig {
    let tools = tools
        .iter()
        .map(|t| {
            Tool::ToolSpec(ToolSpecification {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: ToolInputSchema::Json(t.function.parameters.clone()),
            })
        })
        .collect();

    let tool_choice = match choice {
        Some(choice) if policy.supports(model_id) => Some(translate_tool_choice(choice)),
        Some(_) => {
            debug!(model = model_id, "dropping tool_choice for model without support");
            None
        }
        None => None,
    };

    ToolConfig { tools, tool_choice }
}

fn translate_tool_choice(choice: &ChatToolChoice) -> ToolChoice {
    match choice {
        ChatToolChoice::Mode(ToolChoiceMode::Required) => ToolChoice::Any(AnyToolChoice::default()),
        ChatToolChoice::Mode(ToolChoiceMode::Auto | ToolChoiceMode::None) => {
            ToolChoice::Auto(AutoToolChoice::default())
        }
        ChatToolChoice::Named(named) => ToolChoice::Tool(SpecificToolChoice {
            name: named.function.name.clone(),
        }),
    }
}
