use super::bedrock_types::{ContentBlock, ConverseResponse, TokenUsage};
use super::openai_types::{
    ChatResponse, ChatToolCall, ChatToolCallFunction, ChatUsage, Choice, ChoiceMessage,
    CHAT_COMPLETION_OBJECT, SYSTEM_FINGERPRINT,
};

/// Native stop reasons (lowercase) and the `OpenAI` finish_reason they map to.
pub const FINISH_REASONS: &[(&str, &str)] = &[
    ("tool_use", "tool_calls"),
    ("finished", "stop"),
    ("end_turn", "stop"),
    ("stop_sequence", "stop"),
    ("max_tokens", "length"),
    ("content_filtered", "content_filter"),
];

/// Finish reason used for absent or unknown stop reasons.
pub const DEFAULT_FINISH_REASON: &str = "stop";

/// Map a Bedrock stop reason to an `OpenAI` finish_reason. Case-insensitive;
/// never fails.
pub fn normalize_finish_reason(stop_reason: Option<&str>) -> &'static str {
    let Some(reason) = stop_reason else {
        return DEFAULT_FINISH_REASON;
    };

    FINISH_REASONS
        .iter()
        .find(|(native, _)| native.eq_ignore_ascii_case(reason))
        .map_or(DEFAULT_FINISH_REASON, |&(_, openai)| openai)
}

/// Translate a Converse response into an `OpenAI` chat completion.
/// Pure function: `model` is the model id the client asked for.
pub fn converse_to_openai(model: &str, resp: &ConverseResponse, created: i64) -> ChatResponse {
    let stop_reason = resp.stop_reason.as_deref();
    let content = resp.content();

    let message = if stop_reason.is_some_and(|r| r.eq_ignore_ascii_case("tool_use")) {
        let tool_calls = content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse(tool_use) => Some(ChatToolCall {
                    id: tool_use.tool_use_id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: tool_use.name.clone(),
                        arguments: tool_use.input.to_string(),
                    },
                }),
                _ => None,
            })
            .collect();

        ChoiceMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(tool_calls),
        }
    } else {
        // Only the first block is surfaced; later blocks are dropped.
        ChoiceMessage {
            role: "assistant".to_string(),
            content: content
                .first()
                .and_then(ContentBlock::as_text)
                .map(str::to_string),
            tool_calls: None,
        }
    };

    ChatResponse {
        id: String::new(),
        object: CHAT_COMPLETION_OBJECT.to_string(),
        created,
        model: model.to_string(),
        system_fingerprint: SYSTEM_FINGERPRINT.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: Some(normalize_finish_reason(stop_reason).to_string()),
        }],
        usage: usage_from_native(resp.usage.as_ref()),
    }
}

/// Token counts reported by Bedrock; missing counts are zero.
pub fn usage_from_native(usage: Option<&TokenUsage>) -> ChatUsage {
    let input = usage.and_then(|u| u.input_tokens).unwrap_or(0);
    let output = usage.and_then(|u| u.output_tokens).unwrap_or(0);
    ChatUsage::new(input, output)
}
