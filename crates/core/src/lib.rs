//! Core logic for the call relay: per-call conversation sessions and the streaming
//! relay that forwards model output while keeping them up to date.

pub mod error;
pub mod llm_client;
pub mod relay;
pub mod session;

pub use error::RelayError;
pub use relay::{RelayEvent, RelayStream, StreamFragment, StreamingRelay};
pub use session::{ConversationSession, InMemorySessionStore, Role, SessionStore, Turn};
