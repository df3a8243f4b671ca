use super::anthropic_types::{MessagesResponse, ResponseContentBlock};
use super::openai_types::{
    ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, ChatUsage, Choice, ChoiceMessage,
};

/// Translate a complete Messages API response into a Chat Completions response.
/// Pure mapping: text blocks collapse into one string, tool_use blocks become
/// the tool_calls list.
pub fn messages_to_chat(resp: &MessagesResponse) -> ChatCompletionResponse {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in &resp.content {
        match block {
            ResponseContentBlock::Text { text } => {
                text_parts.push(text);
            }
            ResponseContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            ResponseContentBlock::Other => {}
        }
    }

    // Any tool invocation wins over the upstream stop reason.
    let finish_reason = if tool_calls.is_empty() {
        resp.stop_reason
            .as_deref()
            .map(map_stop_reason)
            .unwrap_or_else(|| "stop".to_string())
    } else {
        "tool_calls".to_string()
    };

    let tool_calls = if tool_calls.is_empty() {
        None
    } else {
        Some(tool_calls)
    };

    let usage = ChatUsage {
        prompt_tokens: resp.usage.input_tokens,
        completion_tokens: resp.usage.output_tokens,
        total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        cache_creation_input_tokens: Some(resp.usage.cache_creation_input_tokens)
            .filter(|tokens| *tokens > 0),
        cache_read_input_tokens: Some(resp.usage.cache_read_input_tokens)
            .filter(|tokens| *tokens > 0),
    };

    ChatCompletionResponse {
        id: resp.id.clone(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: resp.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: resp.role.clone(),
                content: Some(text_parts.concat()).filter(|text| !text.is_empty()),
                tool_calls,
            },
            finish_reason: Some(finish_reason),
        }],
        usage,
    }
}

/// Map an upstream stop_reason to a Chat Completions finish_reason.
pub fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "stop_sequence" => "stop".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::MessagesUsage;

    fn make_response(
        content: Vec<ResponseContentBlock>,
        stop_reason: Option<&str>,
    ) -> MessagesResponse {
        MessagesResponse {
            id: "msg_01abc".to_string(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: "claude-sonnet-4-20250514".to_string(),
            stop_reason: stop_reason.map(String::from),
            stop_sequence: None,
            usage: MessagesUsage {
                input_tokens: 10,
                output_tokens: 20,
                cache_creation_input_tokens: 0,
                cache_read_input_tokens: 0,
            },
        }
    }

    #[test]
    fn text_blocks_concatenate() {
        let resp = make_response(
            vec![
                ResponseContentBlock::Text {
                    text: "Hello".to_string(),
                },
                ResponseContentBlock::Text {
                    text: ", world".to_string(),
                },
            ],
            Some("end_turn"),
        );

        let result = messages_to_chat(&resp);

        assert_eq!(result.id, "msg_01abc");
        assert_eq!(result.object, "chat.completion");
        assert_eq!(result.choices.len(), 1);
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("Hello, world")
        );
        assert_eq!(result.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(result.usage.prompt_tokens, 10);
        assert_eq!(result.usage.completion_tokens, 20);
        assert_eq!(result.usage.total_tokens, 30);
    }

    #[test]
    fn tool_use_forces_tool_calls_finish_reason() {
        let resp = make_response(
            vec![
                ResponseContentBlock::Text {
                    text: "Checking.".to_string(),
                },
                ResponseContentBlock::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "get_weather".to_string(),
                    input: serde_json::json!({"city": "London"}),
                },
            ],
            Some("end_turn"),
        );

        let result = messages_to_chat(&resp);

        assert_eq!(
            result.choices[0].finish_reason.as_deref(),
            Some("tool_calls")
        );
        let calls = result.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.name, "get_weather");
        let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["city"], "London");
    }

    #[test]
    fn cache_usage_copied_through() {
        let mut resp = make_response(
            vec![ResponseContentBlock::Text {
                text: "ok".to_string(),
            }],
            Some("end_turn"),
        );
        resp.usage.cache_creation_input_tokens = 7;
        resp.usage.cache_read_input_tokens = 100;

        let result = messages_to_chat(&resp);

        assert_eq!(result.usage.cache_creation_input_tokens, Some(7));
        assert_eq!(result.usage.cache_read_input_tokens, Some(100));
    }

    #[test]
    fn thinking_blocks_are_dropped() {
        let resp = make_response(
            vec![
                ResponseContentBlock::Other,
                ResponseContentBlock::Text {
                    text: "visible".to_string(),
                },
            ],
            Some("end_turn"),
        );

        let result = messages_to_chat(&resp);
        assert_eq!(result.choices[0].message.content.as_deref(), Some("visible"));
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("stop_sequence"), "stop");
        assert_eq!(map_stop_reason("tool_use"), "tool_calls");
        assert_eq!(map_stop_reason("refusal"), "refusal");
    }
}
