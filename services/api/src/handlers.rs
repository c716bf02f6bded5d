//! Axum Handlers
//!
//! HTTP entry points for platform webhooks and chat-turn requests. Both are
//! documented with `utoipa` so the OpenAPI document stays in sync with the routes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use callrelay_core::RelayError;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{AssistantResponse, ChatCompletionRequest, ErrorResponse, WebhookEnvelope},
    sse,
    state::AppState,
    webhook::WebhookError,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
            }
            ApiError::NotFound(error) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { error })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: format!("{:#}", err),
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::SessionNotFound(_) => Self::NotFound(err.to_string()),
            other => Self::InternalServerError(other.into()),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Webhook dispatch failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Receive a call-lifecycle event from the voice-assistant platform.
#[utoipa::path(
    post,
    path = "/middleware",
    request_body = WebhookEnvelope,
    responses(
        (status = 201, description = "Assistant configuration for an assistant request", body = AssistantResponse),
        (status = 200, description = "Event handled"),
        (status = 500, description = "Unknown event type or invalid payload", body = ErrorResponse)
    )
)]
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::InvalidPayload(format!("body is not valid JSON: {}", e)))?;
    let message = body
        .get("message")
        .ok_or_else(|| WebhookError::InvalidPayload("missing `message`".to_string()))?;

    let dispatched = state.dispatcher.dispatch_message(message).await?;
    Ok((dispatched.status(), Json(dispatched.body)))
}

/// Run one chat turn and stream the model's reply as server-sent events.
///
/// Each event is `data: {"choices":[{"delta":{"content":..,"role":"assistant"}}]}` and
/// a complete reply ends with `data: [DONE]`. A body that ends without the sentinel
/// is a failed turn.
#[utoipa::path(
    post,
    path = "/chat/completions",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Streamed completion", content_type = "text/event-stream", body = String),
        (status = 400, description = "Malformed body or missing call identifier", body = ErrorResponse),
        (status = 404, description = "The call ended before the turn started", body = ErrorResponse),
        (status = 500, description = "Generation could not start", body = ErrorResponse)
    )
)]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid chat request: {}", e)))?;
    let call_id = payload
        .call_id()
        .ok_or_else(|| ApiError::BadRequest("`call_id` or `call.id` is required".to_string()))?;
    let user_text = payload.latest_user_text().map(str::to_string);
    info!(call_id, has_user_text = user_text.is_some(), "Chat turn received");

    let stream = state.relay.chat_turn(call_id, user_text).await?;

    let call_id = call_id.to_string();
    let stream = stream.inspect(move |item| {
        if let Err(e) = item {
            warn!(call_id = %call_id, error = %e, "Aborting event stream");
        }
    });

    Ok(sse::relay_sse(Box::pin(stream)).into_response())
}
