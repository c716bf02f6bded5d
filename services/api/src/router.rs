//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the webhook and chat endpoints and the OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AssistantConfig, AssistantModel, AssistantResponse, AssistantVoice, CallRef,
        ChatCompletionRequest, ChatMessage, ErrorResponse, EventType, FunctionCall,
        WebhookEnvelope,
    },
    state::AppState,
};

use axum::{Router, routing::post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::webhook,
        handlers::chat_completions,
    ),
    components(
        schemas(
            WebhookEnvelope, EventType, CallRef, FunctionCall, ChatCompletionRequest, ChatMessage,
            AssistantResponse, AssistantConfig, AssistantModel, AssistantVoice, ErrorResponse
        )
    ),
    tags(
        (name = "Call Relay API", description = "Voice-assistant webhooks and streamed chat turns")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/middleware", post(handlers::webhook))
        .route("/chat/completions", post(handlers::chat_completions))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
        .layer(TraceLayer::new_for_http())
}
