//! State machine for translating Messages API SSE events into Chat Completions chunks.
//!
//! The [`StreamTranslator`] processes upstream stream events one at a time —
//! single pass, no look-ahead, no buffering beyond the current event — and
//! emits at most one chunk per event, keyed by the upstream message id.

use super::anthropic_types::{MessagesUsage, StreamContentBlock, StreamDelta, StreamEvent};
use super::openai_types::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
    ChunkUsage, CompletionTokensDetails, PromptTokensDetails,
};
use super::response::map_stop_reason;

/// Translates Messages API stream events into Chat Completions chunks.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
///   for event in upstream_events {
///       if let Some(chunk) = translator.process_event(&event) {
///           // send as `data: <json>` SSE frame
///       }
///   }
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    usage: Option<MessagesUsage>,
    tool_index: u64,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            // Replaced by the upstream id at message_start; the fallback keeps
            // chunks correlated even on a malformed stream.
            msg_id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            usage: None,
            tool_index: 0,
        }
    }

    /// Process a single upstream stream event, returning the chunk to relay,
    /// if this event produces one.
    pub fn process_event(&mut self, event: &StreamEvent) -> Option<ChatCompletionChunk> {
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(ref id) = message.id {
                    self.msg_id = id.clone();
                }
                if let Some(ref usage) = message.usage {
                    self.merge_usage(usage);
                }
                // Announce the assistant turn.
                Some(self.chunk(
                    ChunkDelta {
                        role: Some("assistant".to_string()),
                        content: Some(String::new()),
                        tool_calls: None,
                    },
                    None,
                    None,
                ))
            }

            StreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                StreamContentBlock::ToolUse { id, name } => Some(self.chunk(
                    ChunkDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![ChunkToolCall {
                            index: self.tool_index,
                            id: Some(id.clone()),
                            call_type: Some("function".to_string()),
                            function: Some(ChunkToolCallFunction {
                                name: Some(name.clone()),
                                arguments: Some(String::new()),
                            }),
                        }]),
                    },
                    None,
                    None,
                )),
                // Text chunks are emitted on delta, not on start.
                StreamContentBlock::Text { .. } | StreamContentBlock::Other => None,
            },

            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                StreamDelta::TextDelta { text } => Some(self.chunk(
                    ChunkDelta {
                        role: None,
                        content: Some(text.clone()),
                        tool_calls: None,
                    },
                    None,
                    None,
                )),
                StreamDelta::InputJsonDelta { partial_json } => Some(self.chunk(
                    ChunkDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![ChunkToolCall {
                            index: self.tool_index,
                            id: None,
                            call_type: None,
                            function: Some(ChunkToolCallFunction {
                                name: None,
                                arguments: Some(partial_json.clone()),
                            }),
                        }]),
                    },
                    None,
                    None,
                )),
                StreamDelta::Other => None,
            },

            StreamEvent::ContentBlockStop { .. } => {
                // The next tool_use block gets a distinct positional index.
                self.tool_index += 1;
                None
            }

            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.merge_usage(usage);
                }
                let stop_reason = delta.stop_reason.as_deref()?;
                // The stop reason maps straight through here; unlike the
                // non-streaming path, tool activity does not force
                // "tool_calls".
                Some(self.chunk(
                    ChunkDelta::default(),
                    Some(map_stop_reason(stop_reason)),
                    self.usage.as_ref().map(final_usage),
                ))
            }

            StreamEvent::MessageStop | StreamEvent::Ping | StreamEvent::Other => None,
        }
    }

    fn merge_usage(&mut self, update: &MessagesUsage) {
        let current = self.usage.get_or_insert_with(MessagesUsage::default);
        if update.input_tokens > 0 {
            current.input_tokens = update.input_tokens;
        }
        if update.output_tokens > 0 {
            current.output_tokens = update.output_tokens;
        }
        if update.cache_creation_input_tokens > 0 {
            current.cache_creation_input_tokens = update.cache_creation_input_tokens;
        }
        if update.cache_read_input_tokens > 0 {
            current.cache_read_input_tokens = update.cache_read_input_tokens;
        }
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<String>,
        usage: Option<ChunkUsage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.msg_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}

fn final_usage(usage: &MessagesUsage) -> ChunkUsage {
    ChunkUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        prompt_tokens_details: PromptTokensDetails {
            cached_tokens: usage.cache_read_input_tokens,
            audio_tokens: 0,
        },
        completion_tokens_details: CompletionTokensDetails::default(),
    }
}
