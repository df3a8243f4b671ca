use crate::config::RelayConfig;
use crate::logging::{mask_credential, next_request_id, LogLevel, SharedLogger};
use crate::proxy::{self, RelayOutcome, StreamOutcome};
use crate::translate::openai_types::ChatCompletionRequest;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_body(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": message.into() }))
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = next_request_id();

    let credential = match extract_bearer(&headers) {
        Ok(credential) => credential,
        Err(message) => {
            state
                .logger
                .request(request_id, LogLevel::Error, "server", message);
            return (StatusCode::UNAUTHORIZED, error_body(message)).into_response();
        }
    };

    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            state.logger.request(
                request_id,
                LogLevel::Error,
                "server",
                format!("failed to parse request: {e}"),
            );
            return (
                StatusCode::BAD_REQUEST,
                error_body(format!("Invalid request body: {e}")),
            )
                .into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    state.logger.request(
        request_id,
        LogLevel::Info,
        "server",
        format!(
            "request: model={} streaming={} messages={} tools={} key={}",
            req.model,
            is_streaming,
            req.messages.len(),
            req.tools.as_ref().map_or(0, Vec::len),
            mask_credential(&credential),
        ),
    );

    if is_streaming {
        handle_streaming(state, &req, &credential, request_id).await
    } else {
        handle_non_streaming(state, &req, &credential, request_id).await
    }
}

async fn handle_non_streaming(
    state: Arc<AppState>,
    req: &ChatCompletionRequest,
    credential: &str,
    request_id: u64,
) -> Response {
    match proxy::forward_non_streaming(
        req,
        credential,
        &state.config,
        &state.client,
        &state.logger,
        request_id,
    )
    .await
    {
        Ok(RelayOutcome::Success(resp)) => Json(resp).into_response(),
        Ok(RelayOutcome::UpstreamError(body, status_code)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, error_body(body)).into_response()
        }
        Err(e) => {
            state.logger.request(
                request_id,
                LogLevel::Error,
                "server",
                format!("relay error: {e}"),
            );
            (StatusCode::BAD_GATEWAY, error_body(e.to_string())).into_response()
        }
    }
}

async fn handle_streaming(
    state: Arc<AppState>,
    req: &ChatCompletionRequest,
    credential: &str,
    request_id: u64,
) -> Response {
    let chunk_stream = match proxy::forward_streaming(
        req,
        credential,
        &state.config,
        &state.client,
        &state.logger,
        request_id,
    )
    .await
    {
        Ok(StreamOutcome::Stream(stream)) => stream,
        Ok(StreamOutcome::UpstreamError(body, status_code)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            return (status, error_body(body)).into_response();
        }
        Err(e) => {
            state.logger.request(
                request_id,
                LogLevel::Error,
                "server",
                format!("streaming setup error: {e}"),
            );
            return (StatusCode::BAD_GATEWAY, error_body(e.to_string())).into_response();
        }
    };

    let event_stream = chunk_stream.map(|result| -> std::result::Result<Event, Infallible> {
        match result {
            Ok(data) => Ok(Event::default().data(data)),
            Err(_) => Ok(Event::default().data("[DONE]")),
        }
    });

    Sse::new(event_stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response()
}

fn extract_bearer(headers: &HeaderMap) -> std::result::Result<String, &'static str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or("Missing Authorization header")?;
    let value = value.to_str().map_err(|_| "Invalid Authorization header")?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or("Invalid Authorization header format, expected: Bearer <token>")?;
    Ok(token.to_string())
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "anthropic-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "model_mapping": state.config.models,
        "max_tokens_mapping": state.config.max_tokens,
    }))
}
