//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the session store and the streaming relay.

use crate::{
    config::Config,
    models::AssistantConfig,
    webhook::{CallEventHooks, WebhookDispatcher},
};
use callrelay_core::{InMemorySessionStore, SessionStore, StreamingRelay, llm_client::LLMClient};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub relay: Arc<StreamingRelay>,
    pub dispatcher: Arc<WebhookDispatcher>,
}

impl AppState {
    /// Wires the store, relay and dispatcher together around a fresh in-memory store.
    pub fn new(
        config: &Config,
        system_prompt: &str,
        llm_client: Arc<dyn LLMClient>,
        hooks: Arc<dyn CallEventHooks>,
    ) -> Self {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(system_prompt));

        let relay = StreamingRelay::new(sessions.clone(), llm_client)
            .with_fragment_timeout(config.fragment_timeout);

        let assistant = AssistantConfig::from_settings(
            &config.assistant,
            &config.chat_model,
            config.temperature,
            system_prompt,
        );
        let dispatcher = WebhookDispatcher::new(sessions.clone(), assistant, hooks);

        Self {
            sessions,
            relay: Arc::new(relay),
            dispatcher: Arc::new(dispatcher),
        }
    }
}
