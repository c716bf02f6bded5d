//! Conversation Session Store
//!
//! This module tracks the running transcript of every live voice call. A session is
//! keyed by the platform's call identifier, seeded with the system preamble when it is
//! first referenced, grows append-only as user and assistant turns arrive, and is
//! dropped when the platform reports that the call has ended.

use crate::error::RelayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

/// The author of a single turn in a conversation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in a conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A copy of one call's transcript as held by the store.
///
/// The first turn is always the system preamble the session was seeded with.
#[derive(Serialize, Debug, Clone)]
pub struct ConversationSession {
    pub call_id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

/// Exclusive right to run a chat turn for one session of a call.
///
/// Held from before the user turn is appended until the assistant turn is committed,
/// so two turns for the same call never interleave. The guard is bound to the session
/// it was taken on: once that session is removed, appends through the guard fail even
/// if a new session has been created under the same call id.
pub struct TurnGuard {
    call_id: String,
    generation: u64,
    _lock: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }
}

impl fmt::Debug for TurnGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnGuard")
            .field("call_id", &self.call_id)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Defines the contract for any backend that keeps per-call transcripts.
///
/// Callers never receive a live reference into the store; every read returns a copy.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session for `call_id`, creating it with the system preamble if needed.
    async fn get_or_create(&self, call_id: &str) -> ConversationSession;

    /// Appends a user turn to an existing session.
    async fn append_user_turn(&self, call_id: &str, text: String) -> Result<(), RelayError>;

    /// Appends the assembled assistant response to an existing session.
    async fn append_assistant_turn(&self, call_id: &str, text: String) -> Result<(), RelayError>;

    /// Deletes the session. Returns whether anything was removed.
    async fn remove(&self, call_id: &str) -> bool;

    /// Returns the transcript in append order.
    async fn snapshot(&self, call_id: &str) -> Result<Vec<Turn>, RelayError>;

    /// Waits for and acquires the per-call turn lock.
    async fn begin_turn(&self, call_id: &str) -> Result<TurnGuard, RelayError>;

    /// Returns the transcript of the session `turn` was taken on.
    async fn turn_snapshot(&self, turn: &TurnGuard) -> Result<Vec<Turn>, RelayError>;

    /// Appends to the session `turn` was taken on. Fails with `SessionNotFound` if that
    /// session has been removed, whether or not the call id has been reused since.
    async fn append_in_turn(&self, turn: &TurnGuard, entry: Turn) -> Result<(), RelayError>;
}

struct SessionEntry {
    session: ConversationSession,
    generation: u64,
    turn_lock: Arc<Mutex<()>>,
}

/// A `SessionStore` that lives for the lifetime of the process.
pub struct InMemorySessionStore {
    preamble: String,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    next_generation: AtomicU64,
}

impl InMemorySessionStore {
    /// Creates an empty store whose sessions are seeded with `preamble`.
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
            sessions: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn append(&self, call_id: &str, turn: Turn) -> Result<(), RelayError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(call_id)
            .ok_or_else(|| RelayError::SessionNotFound(call_id.to_string()))?;
        debug!(call_id, role = %turn.role, len = turn.content.len(), "Appending turn");
        entry.session.turns.push(turn);
        Ok(())
    }
}


#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, call_id: &str) -> ConversationSession {
        if let Some(entry) = self.sessions.read().await.get(call_id) {
            return entry.session.clone();
        }

        // Another request may have created the session between the two lock scopes.
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(call_id.to_string()).or_insert_with(|| {
            info!(call_id, "Creating conversation session");
            SessionEntry {
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                session: ConversationSession {
                    call_id: call_id.to_string(),
                    turns: vec![Turn::system(self.preamble.clone())],
                    created_at: Utc::now(),
                },
                turn_lock: Arc::new(Mutex::new(())),
            }
        });
        entry.session.clone()
    }

    async fn append_user_turn(&self, call_id: &str, text: String) -> Result<(), RelayError> {
        self.append(call_id, Turn::user(text)).await
    }

    async fn append_assistant_turn(&self, call_id: &str, text: String) -> Result<(), RelayError> {
        self.append(call_id, Turn::assistant(text)).await
    }

    async fn remove(&self, call_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(call_id).is_some();
        if removed {
            info!(call_id, "Removed conversation session");
        } else {
            debug!(call_id, "No session to remove");
        }
        removed
    }

    async fn snapshot(&self, call_id: &str) -> Result<Vec<Turn>, RelayError> {
        self.sessions
            .read()
            .await
            .get(call_id)
            .map(|entry| entry.session.turns.clone())
            .ok_or_else(|| RelayError::SessionNotFound(call_id.to_string()))
    }

    async fn begin_turn(&self, call_id: &str) -> Result<TurnGuard, RelayError> {
        // Clone the lock out so the map is not held while waiting for another turn.
        let (generation, lock) = self
            .sessions
            .read()
            .await
            .get(call_id)
            .map(|entry| (entry.generation, entry.turn_lock.clone()))
            .ok_or_else(|| RelayError::SessionNotFound(call_id.to_string()))?;
        Ok(TurnGuard {
            call_id: call_id.to_string(),
            generation,
            _lock: lock.lock_owned().await,
        })
    }

    async fn turn_snapshot(&self, turn: &TurnGuard) -> Result<Vec<Turn>, RelayError> {
        self.sessions
            .read()
            .await
            .get(&turn.call_id)
            .filter(|entry| entry.generation == turn.generation)
            .map(|entry| entry.session.turns.clone())
            .ok_or_else(|| RelayError::SessionNotFound(turn.call_id.clone()))
    }

    async fn append_in_turn(&self, turn: &TurnGuard, entry: Turn) -> Result<(), RelayError> {
        let mut sessions = self.sessions.write().await;
        let current = sessions
            .get_mut(&turn.call_id)
            .filter(|current| current.generation == turn.generation)
            .ok_or_else(|| RelayError::SessionNotFound(turn.call_id.clone()))?;
        debug!(call_id = %turn.call_id, role = %entry.role, len = entry.content.len(), "Appending turn");
        current.session.turns.push(entry);
        Ok(())
    }
}
