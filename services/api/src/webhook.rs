//! Webhook Event Dispatch
//!
//! Maps each platform event type to its handler. Two handlers manage the call's
//! conversation session (`assistant-request` primes it, `hang` tears it down); the
//! rest forward to [`CallEventHooks`], the extension points for business logic.

use crate::models::{AssistantConfig, AssistantResponse, EventType, FunctionCall, UnknownEventType};
use async_trait::async_trait;
use axum::http::StatusCode;
use callrelay_core::SessionStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Errors raised while dispatching a webhook event.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error(transparent)]
    UnhandledEventType(#[from] UnknownEventType),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Event hook failed: {0:#}")]
    Hook(#[from] anyhow::Error),
}

/// Business-logic hooks for the events this service does not act on itself.
///
/// Every method defaults to doing nothing and returning `null`, which is what the
/// platform receives as the response body.
#[async_trait]
pub trait CallEventHooks: Send + Sync {
    /// A tool the assistant asked to run. `call` has already been validated.
    async fn on_function_call(&self, call: FunctionCall, payload: &Value) -> anyhow::Result<Value> {
        let _ = (call, payload);
        Ok(Value::Null)
    }

    /// The call's status changed (queued, ringing, in-progress, forwarding, ended).
    async fn on_status_update(&self, payload: &Value) -> anyhow::Result<Value> {
        let _ = payload;
        Ok(Value::Null)
    }

    /// Summary, transcript and recording details once the call is over.
    async fn on_end_of_call_report(&self, payload: &Value) -> anyhow::Result<Value> {
        let _ = payload;
        Ok(Value::Null)
    }

    /// Someone started or stopped speaking.
    async fn on_speech_update(&self, payload: &Value) -> anyhow::Result<Value> {
        let _ = payload;
        Ok(Value::Null)
    }

    /// The platform committed an update to its own conversation history.
    async fn on_conversation_update(&self, payload: &Value) -> anyhow::Result<Value> {
        let _ = payload;
        Ok(Value::Null)
    }

    /// A transcript chunk became available.
    async fn on_transcript(&self, payload: &Value) -> anyhow::Result<Value> {
        let _ = payload;
        Ok(Value::Null)
    }
}

/// Hooks with no behaviour.
pub struct NoopHooks;

impl CallEventHooks for NoopHooks {}

/// The result of a successfully dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub event_type: EventType,
    pub body: Value,
}

impl Dispatched {
    /// `201 Created` for assistant requests, `200 OK` for everything else.
    pub fn status(&self) -> StatusCode {
        match self.event_type {
            EventType::AssistantRequest => StatusCode::CREATED,
            _ => StatusCode::OK,
        }
    }
}

/// Routes webhook events to their handlers.
pub struct WebhookDispatcher {
    sessions: Arc<dyn SessionStore>,
    assistant: AssistantConfig,
    hooks: Arc<dyn CallEventHooks>,
}

impl WebhookDispatcher {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        assistant: AssistantConfig,
        hooks: Arc<dyn CallEventHooks>,
    ) -> Self {
        Self {
            sessions,
            assistant,
            hooks,
        }
    }

    /// Dispatches the event inside a webhook envelope's `message` object.
    pub async fn dispatch_message(&self, message: &Value) -> Result<Dispatched, WebhookError> {
        let tag = message
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| WebhookError::InvalidPayload("missing `type`".to_string()))?;
        self.dispatch(tag, message).await
    }

    /// Looks up the handler for `tag` and runs it against `payload`.
    #[instrument(skip(self, payload))]
    pub async fn dispatch(&self, tag: &str, payload: &Value) -> Result<Dispatched, WebhookError> {
        let event_type: EventType = tag.parse()?;
        debug!(%event_type, "Dispatching webhook event");

        let body = match event_type {
            EventType::AssistantRequest => self.assistant_request(payload).await?,
            EventType::Hang => self.hang(payload).await?,
            EventType::FunctionCall => {
                let call = function_call(payload)?;
                info!(function = %call.name, "Function call requested");
                self.hooks.on_function_call(call, payload).await?
            }
            EventType::StatusUpdate => self.hooks.on_status_update(payload).await?,
            EventType::EndOfCallReport => self.hooks.on_end_of_call_report(payload).await?,
            EventType::SpeechUpdate => self.hooks.on_speech_update(payload).await?,
            EventType::ConversationUpdate => self.hooks.on_conversation_update(payload).await?,
            EventType::Transcript => self.hooks.on_transcript(payload).await?,
        };

        Ok(Dispatched { event_type, body })
    }

    async fn assistant_request(&self, payload: &Value) -> Result<Value, WebhookError> {
        let call_id = call_id(payload)?;
        self.sessions.get_or_create(call_id).await;
        info!(call_id, "Assistant requested; session primed");

        let response = AssistantResponse {
            assistant: self.assistant.clone(),
        };
        serde_json::to_value(response).map_err(|e| WebhookError::Hook(e.into()))
    }

    async fn hang(&self, payload: &Value) -> Result<Value, WebhookError> {
        let call_id = call_id(payload)?;
        let removed = self.sessions.remove(call_id).await;
        info!(call_id, removed, "Call ended");
        Ok(Value::Null)
    }
}

/// Extracts `call.id` from an event payload.
fn call_id(payload: &Value) -> Result<&str, WebhookError> {
    let call = payload
        .get("call")
        .filter(|call| call.is_object())
        .ok_or_else(|| WebhookError::InvalidPayload("missing `call`".to_string()))?;
    match call.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.as_str()),
        Some(Value::String(_)) => Err(WebhookError::InvalidPayload("empty `call.id`".to_string())),
        Some(_) => Err(WebhookError::InvalidPayload("`call.id` must be a string".to_string())),
        None => Err(WebhookError::InvalidPayload("missing `call.id`".to_string())),
    }
}

/// Extracts and validates the `functionCall` object of an event payload.
fn function_call(payload: &Value) -> Result<FunctionCall, WebhookError> {
    let raw = payload
        .get("functionCall")
        .filter(|value| !value.is_null())
        .ok_or_else(|| WebhookError::InvalidPayload("missing `functionCall`".to_string()))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| WebhookError::InvalidPayload(format!("malformed `functionCall`: {}", e)))
}
