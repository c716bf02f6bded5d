//! Call Relay API Library Crate
//!
//! This library contains the web service that sits between a voice-assistant
//! platform and a language model: configuration, application state, webhook
//! dispatch, the chat-completion handlers with their event-stream framing, and
//! routing. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod sse;
pub mod state;
pub mod webhook;
