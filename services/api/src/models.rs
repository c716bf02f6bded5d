//! API Models
//!
//! Request and response bodies exchanged with the voice-assistant platform, plus the
//! OpenAPI schemas generated for them with `utoipa`.

use crate::config::AssistantSettings;
use callrelay_core::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// The webhook event types the platform sends to `/middleware`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    FunctionCall,
    StatusUpdate,
    AssistantRequest,
    EndOfCallReport,
    SpeechUpdate,
    ConversationUpdate,
    Transcript,
    Hang,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::FunctionCall,
        EventType::StatusUpdate,
        EventType::AssistantRequest,
        EventType::EndOfCallReport,
        EventType::SpeechUpdate,
        EventType::ConversationUpdate,
        EventType::Transcript,
        EventType::Hang,
    ];

    /// The tag as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FunctionCall => "function-call",
            EventType::StatusUpdate => "status-update",
            EventType::AssistantRequest => "assistant-request",
            EventType::EndOfCallReport => "end-of-call-report",
            EventType::SpeechUpdate => "speech-update",
            EventType::ConversationUpdate => "conversation-update",
            EventType::Transcript => "transcript",
            EventType::Hang => "hang",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a tag names no known event type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unhandled message type: '{0}'")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    /// Accepts both the wire spelling (`end-of-call-report`) and the enum-style
    /// spelling (`END_OF_CALL_REPORT`).
    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let normalized = tag.to_ascii_lowercase().replace('_', "-");
        EventType::ALL
            .into_iter()
            .find(|event| event.as_str() == normalized)
            .ok_or_else(|| UnknownEventType(tag.to_string()))
    }
}

/// The `call` object attached to most webhook payloads.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct CallRef {
    pub id: String,
}

/// The `functionCall` object of a `function-call` event.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: Value,
}

/// The envelope every webhook arrives in.
#[derive(Deserialize, Serialize, Debug, ToSchema)]
pub struct WebhookEnvelope {
    /// Event payload; its `type` field selects the handler.
    #[schema(value_type = Object)]
    pub message: Value,
}

/// One message of the platform's chat-completion request.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ChatMessage {
    #[schema(example = "user")]
    pub role: String,
    /// Absent or `null` on messages that only carry tool calls.
    #[serde(default)]
    pub content: Option<String>,
}

/// Body of a chat-turn request from the platform's custom-LLM hook.
#[derive(Deserialize, Serialize, Debug, Clone, ToSchema)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub call: Option<CallRef>,
}

impl ChatCompletionRequest {
    /// The call this turn belongs to, from either `call_id` or `call.id`.
    pub fn call_id(&self) -> Option<&str> {
        self.call_id
            .as_deref()
            .or_else(|| self.call.as_ref().map(|call| call.id.as_str()))
            .filter(|id| !id.is_empty())
    }

    /// The newest message's content, if that message came from the user.
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|msg| msg.role == Role::User.to_string())
            .and_then(|msg| msg.content.as_deref())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssistantModel {
    #[schema(example = "custom-llm")]
    pub provider: String,
    pub model: String,
    pub url: String,
    pub temperature: f32,
    pub system_prompt: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssistantVoice {
    #[schema(example = "azure")]
    pub provider: String,
    pub voice_id: String,
    pub speed: f32,
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    pub name: String,
    pub model: AssistantModel,
    pub voice: AssistantVoice,
    pub first_message: String,
    pub recording_enabled: bool,
}

impl AssistantConfig {
    /// Builds the assistant description from deployment settings.
    ///
    /// The model block points the platform back at this service as a custom LLM.
    pub fn from_settings(
        settings: &AssistantSettings,
        chat_model: &str,
        temperature: f32,
        system_prompt: &str,
    ) -> Self {
        Self {
            name: settings.name.clone(),
            model: AssistantModel {
                provider: "custom-llm".to_string(),
                model: chat_model.to_string(),
                url: settings.custom_llm_url.clone(),
                temperature,
                system_prompt: system_prompt.to_string(),
            },
            voice: AssistantVoice {
                provider: settings.voice_provider.clone(),
                voice_id: settings.voice_id.clone(),
                speed: settings.voice_speed,
            },
            first_message: settings.first_message.clone(),
            recording_enabled: settings.recording_enabled,
        }
    }
}

/// Response body for an `assistant-request` event.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct AssistantResponse {
    pub assistant: AssistantConfig,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
