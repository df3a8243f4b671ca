use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::request::chat_to_messages;
use crate::translate::response::messages_to_chat;
use crate::translate::streaming::StreamTranslator;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";

/// Outcome of relaying a non-streaming request.
pub enum RelayOutcome {
    Success(ChatCompletionResponse),
    /// Raw upstream error body, passed through with the upstream status code.
    UpstreamError(String, u16),
}

/// One `data:` payload per item; the final item is the literal `[DONE]`.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = std::result::Result<String, std::io::Error>> + Send>>;

/// Outcome of relaying a streaming request.
pub enum StreamOutcome {
    Stream(ChunkStream),
    UpstreamError(String, u16),
}

/// Forward a non-streaming chat request to the upstream Messages endpoint.
pub async fn forward_non_streaming(
    req: &ChatCompletionRequest,
    credential: &str,
    config: &RelayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
    request_id: u64,
) -> Result<RelayOutcome> {
    let messages_req = chat_to_messages(
        req,
        &config.models,
        &config.max_tokens,
        config.max_tokens_default,
    )?;
    let url = config.messages_url();

    logger.request(
        request_id,
        LogLevel::Info,
        "proxy",
        format!(
            "POST {url} model={} max_tokens={} messages={} system={}",
            messages_req.model,
            messages_req.max_tokens,
            messages_req.messages.len(),
            messages_req.system.len()
        ),
    );

    let response = send_upstream(client, &url, credential, &messages_req).await?;
    let status = response.status().as_u16();

    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        logger.request(
            request_id,
            LogLevel::Error,
            "proxy",
            format!("upstream status {status}: {}", truncate(&body, 500)),
        );
        return Ok(RelayOutcome::UpstreamError(body, status));
    }

    let body = response.text().await?;
    let messages_resp: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
        RelayError::upstream(format!(
            "Failed to parse upstream response: {e}. Body: {}",
            truncate(&body, 300)
        ))
    })?;

    logger.request(
        request_id,
        LogLevel::Info,
        "proxy",
        format!(
            "completed: stop_reason={} in={} out={} cache_read={} cache_creation={}",
            messages_resp.stop_reason.as_deref().unwrap_or("none"),
            messages_resp.usage.input_tokens,
            messages_resp.usage.output_tokens,
            messages_resp.usage.cache_read_input_tokens,
            messages_resp.usage.cache_creation_input_tokens,
        ),
    );

    Ok(RelayOutcome::Success(messages_to_chat(&messages_resp)))
}

/// Forward a streaming chat request, returning a stream of chunk payloads
/// re-framed into the Chat Completions shape.
pub async fn forward_streaming(
    req: &ChatCompletionRequest,
    credential: &str,
    config: &RelayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
    request_id: u64,
) -> Result<StreamOutcome> {
    let messages_req = chat_to_messages(
        req,
        &config.models,
        &config.max_tokens,
        config.max_tokens_default,
    )?;
    let url = config.messages_url();

    logger.request(
        request_id,
        LogLevel::Info,
        "proxy",
        format!(
            "POST {url} model={} max_tokens={} (streaming)",
            messages_req.model, messages_req.max_tokens
        ),
    );

    let response = send_upstream(client, &url, credential, &messages_req).await?;
    let status = response.status().as_u16();

    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        logger.request(
            request_id,
            LogLevel::Error,
            "proxy",
            format!("upstream status {status}: {}", truncate(&body, 500)),
        );
        return Ok(StreamOutcome::UpstreamError(body, status));
    }

    let model = messages_req.model.clone();
    let stream = reframe_stream(response.bytes_stream(), model, logger.clone(), request_id);

    Ok(StreamOutcome::Stream(Box::pin(stream)))
}

async fn send_upstream(
    client: &reqwest::Client,
    url: &str,
    credential: &str,
    messages_req: &MessagesRequest,
) -> Result<reqwest::Response> {
    client
        .post(url)
        .header("Content-Type", "application/json")
        .header("x-api-key", credential)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("anthropic-beta", PROMPT_CACHING_BETA)
        .json(messages_req)
        .send()
        .await
        .map_err(|e| RelayError::upstream(format!("Upstream request failed: {e}")))
}

/// Read the upstream SSE byte stream line by line and re-frame events into
/// Chat Completions chunk payloads. One malformed line is skipped, not fatal.
fn reframe_stream(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
    model: String,
    logger: SharedLogger,
    request_id: u64,
) -> impl Stream<Item = std::result::Result<String, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);
        let mut buffer = String::new();

        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let bytes = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    logger.request(
                        request_id,
                        LogLevel::Error,
                        "stream",
                        format!("byte stream error: {e}"),
                    );
                    break;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // Process complete lines
            while let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].trim().to_string();
                buffer = buffer[newline_pos + 1..].to_string();

                if line.is_empty() {
                    continue;
                }

                // Only `data:` lines carry events; event-name lines are ignored.
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }

                let event: StreamEvent = match serde_json::from_str(data) {
                    Ok(event) => event,
                    Err(e) => {
                        logger.request(
                            request_id,
                            LogLevel::Warn,
                            "stream",
                            format!("skipping unparseable event: {e}"),
                        );
                        continue;
                    }
                };

                if let Some(chunk) = translator.process_event(&event) {
                    if let Ok(json) = serde_json::to_string(&chunk) {
                        yield Ok(json);
                    }
                }
            }
        }

        logger.request(request_id, LogLevel::Info, "stream", "stream completed");
        yield Ok("[DONE]".to_string());
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
