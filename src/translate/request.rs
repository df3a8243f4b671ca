//! Translate OpenAI Chat Completions requests into Anthropic Messages API requests.
//!
//! Handles system-message extraction, consecutive-message merging, tool schemas,
//! tool results, image parts, and cache-marker placement. A single chat message
//! can be folded into a neighboring message (consecutive same-role text merging,
//! tool results coalesced into the preceding user turn).

use std::collections::HashMap;
use std::hash::BuildHasher;

use super::anthropic_types::{
    CacheControl, ContentBlock, ImageSource, MessageContent, MessagesMessage, MessagesRequest,
    MessagesRole, MessagesTool, MessagesToolChoice, Metadata, SystemBlock,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatRole, ChatTool,
    ChatToolChoice, ContentPart,
};
use crate::error::Result;

/// Translate a Chat Completions request into a Messages API request.
/// Pure function: takes the request plus the model and max-tokens mappings,
/// returns the translated request.
pub fn chat_to_messages<S1: BuildHasher, S2: BuildHasher>(
    req: &ChatCompletionRequest,
    model_map: &HashMap<String, String, S1>,
    max_tokens_map: &HashMap<String, u64, S2>,
    max_tokens_default: Option<u64>,
) -> Result<MessagesRequest> {
    let target_model = model_map
        .get(&req.model)
        .cloned()
        .unwrap_or_else(|| req.model.clone());

    let tools = convert_tools(req.tools.as_deref().unwrap_or_default());

    let max_tokens = resolve_max_tokens(
        &target_model,
        req.max_tokens,
        max_tokens_map,
        max_tokens_default,
    );

    let normalized = normalize_messages(&req.messages);

    let mut messages: Vec<MessagesMessage> = Vec::new();
    let mut system: Vec<SystemBlock> = Vec::new();
    let mut first_message = true;

    for message in normalized {
        match message.role {
            ChatRole::System => {
                extract_system_blocks(&message, &mut system);
            }
            ChatRole::User | ChatRole::Assistant | ChatRole::Tool => {
                // The upstream requires the sequence to open with a user turn.
                if first_message {
                    first_message = false;
                    if message.role != ChatRole::User {
                        tracing::info!(
                            "first message is not user, inserting placeholder user message"
                        );
                        messages.push(MessagesMessage {
                            role: MessagesRole::User,
                            content: MessageContent::Blocks(vec![ContentBlock::Text {
                                text: "...".to_string(),
                                cache_control: None,
                            }]),
                        });
                    }
                }
                convert_message(&message, &mut messages)?;
            }
        }
    }

    if let Some(SystemBlock::Text { cache_control, .. }) = system.last_mut() {
        *cache_control = Some(CacheControl::ephemeral_1h());
        tracing::debug!("cache marker placed on final system block");
    }

    // Anchor the cache boundary just before the most recent turn, so the
    // history up to and including the last assistant reply is reusable.
    if messages.len() >= 2 {
        let index = messages.len() - 2;
        if messages[index].role == MessagesRole::Assistant {
            annotate_last_part(&mut messages[index].content);
            tracing::debug!("cache marker placed on second-to-last assistant message");
        }
    }

    let metadata = req
        .user
        .as_deref()
        .filter(|user| !user.is_empty())
        .map(|user| Metadata {
            user_id: user.to_string(),
        });

    Ok(MessagesRequest {
        model: target_model,
        max_tokens,
        messages,
        system,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(convert_tool_choice),
        metadata,
    })
}

/// Resolve the outgoing max_tokens value, in priority order: explicit request
/// value, per-model override, configured default, model-name heuristic.
pub fn resolve_max_tokens<S: BuildHasher>(
    model: &str,
    explicit: Option<u64>,
    overrides: &HashMap<String, u64, S>,
    default: Option<u64>,
) -> u64 {
    if let Some(value) = explicit.filter(|v| *v > 0) {
        return value;
    }
    if let Some(&value) = overrides.get(model) {
        return value;
    }
    if let Some(value) = default.filter(|v| *v > 0) {
        return value;
    }
    if model.contains("opus-4") {
        16384
    } else if model.contains("opus") || model.contains("sonnet") {
        8192
    } else if model.contains("haiku") {
        4096
    } else {
        8192
    }
}

fn convert_tools(chat_tools: &[ChatTool]) -> Vec<MessagesTool> {
    let mut tools = Vec::with_capacity(chat_tools.len());

    for tool in chat_tools {
        let Some(params) = tool.function.parameters.as_object() else {
            tracing::warn!(
                tool = %tool.function.name,
                "skipping tool whose parameter schema is not an object"
            );
            continue;
        };
        tools.push(convert_tool(&tool.function, params));
    }

    tools
}

fn convert_tool(
    function: &ChatFunction,
    params: &serde_json::Map<String, serde_json::Value>,
) -> MessagesTool {
    let mut input_schema = serde_json::Map::new();

    if let Some(serde_json::Value::String(type_str)) = params.get("type") {
        input_schema.insert(
            "type".to_string(),
            serde_json::Value::String(type_str.clone()),
        );
    }
    input_schema.insert(
        "properties".to_string(),
        params.get("properties").cloned().unwrap_or_default(),
    );
    input_schema.insert(
        "required".to_string(),
        params.get("required").cloned().unwrap_or_default(),
    );

    // Any remaining schema keys pass through verbatim.
    for (key, value) in params {
        if key != "type" && key != "properties" && key != "required" {
            input_schema.insert(key.clone(), value.clone());
        }
    }

    MessagesTool {
        name: function.name.clone(),
        description: function.description.clone(),
        input_schema,
    }
}

/// Merge consecutive same-role plain-string messages (tool results excluded)
/// and replace null content with a placeholder so no message is contentless.
fn normalize_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut formatted: Vec<ChatMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        let mut message = message.clone();

        if let Some(previous) = formatted.last() {
            if previous.role == message.role && message.role != ChatRole::Tool {
                if let (Some(ChatContent::Text(prev_text)), Some(ChatContent::Text(text))) =
                    (&previous.content, &message.content)
                {
                    // Join with a single space, then strip surrounding quote
                    // characters from the combined string.
                    let combined = format!("{prev_text} {text}");
                    message.content =
                        Some(ChatContent::Text(combined.trim_matches('"').to_string()));
                    formatted.pop();
                }
            }
        }

        if message.content.is_none() {
            message.content = Some(ChatContent::Text("...".to_string()));
        }

        formatted.push(message);
    }

    formatted
}

fn extract_system_blocks(message: &ChatMessage, system: &mut Vec<SystemBlock>) {
    match &message.content {
        Some(ChatContent::Text(text)) => {
            system.push(SystemBlock::Text {
                text: text.clone(),
                cache_control: None,
            });
        }
        Some(ChatContent::Parts(parts)) => {
            for part in parts {
                if let ContentPart::Text { text } = part {
                    system.push(SystemBlock::Text {
                        text: text.clone(),
                        cache_control: None,
                    });
                }
            }
        }
        None => {}
    }
}

fn convert_message(message: &ChatMessage, messages: &mut Vec<MessagesMessage>) -> Result<()> {
    // Tool results keep their correlation id and ride inside a user turn.
    if message.role == ChatRole::Tool {
        if let Some(tool_call_id) = message
            .tool_call_id
            .as_deref()
            .filter(|id| !id.is_empty())
        {
            let content = match &message.content {
                Some(content) => Some(serde_json::to_value(content)?),
                None => None,
            };
            let tool_result = ContentBlock::ToolResult {
                tool_use_id: tool_call_id.to_string(),
                content,
                cache_control: None,
            };

            // Coalesce into the preceding user turn when there is one.
            if let Some(last) = messages.last_mut() {
                if last.role == MessagesRole::User {
                    promote_to_blocks(&mut last.content);
                    if let MessageContent::Blocks(ref mut blocks) = last.content {
                        blocks.push(tool_result);
                        tracing::debug!("merged tool_result into previous user message");
                        return Ok(());
                    }
                }
            }

            messages.push(MessagesMessage {
                role: MessagesRole::User,
                content: MessageContent::Blocks(vec![tool_result]),
            });
            return Ok(());
        }
        // No correlation id to honor; the content is delivered as a plain
        // user turn below.
    }

    let role = match message.role {
        ChatRole::Assistant => MessagesRole::Assistant,
        ChatRole::User | ChatRole::Tool => MessagesRole::User,
        ChatRole::System => unreachable!("system messages are extracted before conversion"),
    };

    let no_tool_calls = message
        .tool_calls
        .as_ref()
        .map_or(true, |calls| calls.is_empty());

    // Pure unstructured text passes through as a bare string.
    if let (Some(ChatContent::Text(text)), true) = (&message.content, no_tool_calls) {
        messages.push(MessagesMessage {
            role,
            content: MessageContent::Text(text.clone()),
        });
        return Ok(());
    }

    let mut blocks: Vec<ContentBlock> = Vec::new();

    if let Some(ChatContent::Parts(parts)) = &message.content {
        for part in parts {
            match part {
                ContentPart::Text { text } => {
                    if text.is_empty() {
                        tracing::debug!("skipping empty text block");
                        continue;
                    }
                    blocks.push(ContentBlock::Text {
                        text: text.clone(),
                        cache_control: None,
                    });
                }
                ContentPart::ImageUrl { image_url } => {
                    blocks.push(ContentBlock::Image {
                        source: ImageSource {
                            source_type: "url".to_string(),
                            media_type: None,
                            data: None,
                            url: Some(image_url.url.clone()),
                        },
                        cache_control: None,
                    });
                }
                ContentPart::Unknown => {}
            }
        }
    }

    // Tool calls must survive even when everything else is dropped, or a
    // later tool_result has no tool_use to correlate with.
    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            let input = parse_tool_arguments(&call.id, &call.function.name, &call.function.arguments);
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
                cache_control: None,
            });
        }
    }

    if blocks.is_empty() {
        tracing::warn!("skipping message that converted to no content");
        return Ok(());
    }

    messages.push(MessagesMessage {
        role,
        content: MessageContent::Blocks(blocks),
    });
    Ok(())
}

/// Parse a serialized tool-argument payload. An unparseable payload degrades
/// to an empty object rather than failing the whole request.
fn parse_tool_arguments(id: &str, name: &str, arguments: &str) -> serde_json::Value {
    if arguments.is_empty() || arguments == "{}" {
        return serde_json::Value::Object(serde_json::Map::new());
    }

    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(arguments) {
        Ok(input) => serde_json::Value::Object(input),
        Err(error) => {
            tracing::error!(
                id = %id,
                name = %name,
                %error,
                "failed to parse tool call arguments, sending empty object"
            );
            serde_json::Value::Object(serde_json::Map::new())
        }
    }
}

fn promote_to_blocks(content: &mut MessageContent) {
    if let MessageContent::Text(text) = content {
        *content = MessageContent::Blocks(vec![ContentBlock::Text {
            text: std::mem::take(text),
            cache_control: None,
        }]);
    }
}

/// Attach the cache marker to the final content part, promoting a bare string
/// to a single-part list so the marker has somewhere to live.
fn annotate_last_part(content: &mut MessageContent) {
    match content {
        MessageContent::Blocks(blocks) => {
            if let Some(last) = blocks.last_mut() {
                last.set_cache_control(CacheControl::ephemeral_1h());
            }
        }
        MessageContent::Text(text) => {
            if !text.is_empty() {
                *content = MessageContent::Blocks(vec![ContentBlock::Text {
                    text: std::mem::take(text),
                    cache_control: Some(CacheControl::ephemeral_1h()),
                }]);
            }
        }
    }
}

fn convert_tool_choice(choice: &ChatToolChoice) -> Option<MessagesToolChoice> {
    match choice {
        ChatToolChoice::String(mode) => match mode.as_str() {
            "auto" => Some(MessagesToolChoice::Auto),
            "none" => Some(MessagesToolChoice::None),
            "required" => Some(MessagesToolChoice::Any),
            _ => None,
        },
        ChatToolChoice::Specific(specific) => Some(MessagesToolChoice::Tool {
            name: specific.function.name.clone(),
        }),
    }
}
