//! Streaming Relay
//!
//! Drives the generation backend with a call's transcript and re-emits the produced
//! text as a live stream of events while keeping the session store up to date.
//!
//! A spawned producer task owns the upstream stream and pushes events into a channel
//! of capacity one, so at most a single fragment is buffered between the model and
//! the client. The assembled response is committed to the store exactly once, after
//! the last fragment and before the terminal `Done` event. Upstream failures, stalls
//! and client disconnects all end the stream without a commit.

use crate::{
    error::RelayError,
    llm_client::{LLMClient, LLMStream, LLMStreamEvent},
    session::{Role, SessionStore, Turn, TurnGuard},
};
use futures::{Stream, StreamExt};
use std::{pin::Pin, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, warn};

/// Default bound on each wait for the next upstream fragment.
pub const DEFAULT_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// A single increment of model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    pub text: String,
    pub role: Role,
}

impl StreamFragment {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: Role::Assistant,
        }
    }
}

/// Events produced by a relayed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A non-empty piece of the response, forwarded as soon as it arrives.
    Fragment(StreamFragment),
    /// The response finished and was committed to the session.
    Done,
}

/// A finite, non-restartable stream of relay events. An `Err` item is always last.
pub type RelayStream = Pin<Box<dyn Stream<Item = Result<RelayEvent, RelayError>> + Send>>;

/// Relays completions from an `LLMClient` into per-call sessions.
pub struct StreamingRelay {
    store: Arc<dyn SessionStore>,
    client: Arc<dyn LLMClient>,
    fragment_timeout: Duration,
}

impl StreamingRelay {
    pub fn new(store: Arc<dyn SessionStore>, client: Arc<dyn LLMClient>) -> Self {
        Self {
            store,
            client,
            fragment_timeout: DEFAULT_FRAGMENT_TIMEOUT,
        }
    }

    pub fn with_fragment_timeout(mut self, timeout: Duration) -> Self {
        self.fragment_timeout = timeout;
        self
    }

    /// Runs one chat turn for a call as a single exclusive section.
    ///
    /// Creates the session if needed, waits for any in-flight turn of the same call,
    /// records `user_text` (when present) and starts relaying the completion. The
    /// turn lock is released when the returned stream finishes or is dropped.
    pub async fn chat_turn(
        &self,
        call_id: &str,
        user_text: Option<String>,
    ) -> Result<RelayStream, RelayError> {
        self.store.get_or_create(call_id).await;
        let turn = self.store.begin_turn(call_id).await?;
        if let Some(text) = user_text {
            self.store.append_in_turn(&turn, Turn::user(text)).await?;
        }
        self.stream_completion(turn).await
    }

    /// Starts relaying a completion for the transcript of the session `turn` holds.
    ///
    /// Fails before any event is produced if the session is gone or the backend
    /// cannot start a stream.
    pub async fn stream_completion(&self, turn: TurnGuard) -> Result<RelayStream, RelayError> {
        let call_id = turn.call_id().to_string();
        let transcript = self.store.turn_snapshot(&turn).await?;
        debug!(%call_id, turns = transcript.len(), "Starting completion");

        let upstream = self
            .client
            .stream_chat(transcript)
            .await
            .map_err(RelayError::generation)?;

        let (tx, rx) = mpsc::channel(1);
        let producer = Producer {
            store: self.store.clone(),
            fragment_timeout: self.fragment_timeout,
            tx,
            turn,
        };
        tokio::spawn(
            producer
                .run(upstream)
                .instrument(tracing::info_span!("relay", %call_id)),
        );

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

struct Producer {
    store: Arc<dyn SessionStore>,
    fragment_timeout: Duration,
    tx: mpsc::Sender<Result<RelayEvent, RelayError>>,
    turn: TurnGuard,
}

impl Producer {
    async fn run(self, mut upstream: LLMStream) {
        let mut accumulated = String::new();
        let mut fragments = 0usize;

        loop {
            let next = tokio::select! {
                _ = self.tx.closed() => {
                    info!(fragments, "Client went away; discarding partial response");
                    return;
                }
                next = tokio::time::timeout(self.fragment_timeout, upstream.next()) => next,
            };

            match next {
                Ok(Some(Ok(LLMStreamEvent::TextChunk(text)))) => {
                    if text.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&text);
                    fragments += 1;
                    let event = RelayEvent::Fragment(StreamFragment::assistant(text));
                    if self.tx.send(Ok(event)).await.is_err() {
                        info!(fragments, "Client went away; discarding partial response");
                        return;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(error = ?e, fragments, "Generation failed mid-stream");
                    self.fail(RelayError::generation(e)).await;
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(timeout = ?self.fragment_timeout, fragments, "Generation stalled");
                    self.fail(RelayError::GenerationTimeout(self.fragment_timeout))
                        .await;
                    return;
                }
            }
        }

        if let Err(e) = self
            .store
            .append_in_turn(&self.turn, Turn::assistant(accumulated))
            .await
        {
            // The call ended while the response was streaming, possibly followed by a
            // new session under the same id.
            warn!(error = %e, "Could not commit assistant turn");
            self.fail(e).await;
            return;
        }
        info!(fragments, "Assistant turn committed");
        let _ = self.tx.send(Ok(RelayEvent::Done)).await;
    }

    async fn fail(&self, err: RelayError) {
        let _ = self.tx.send(Err(err)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{llm_client::MockLLMClient, session::InMemorySessionStore};
    use anyhow::anyhow;
    use futures::stream;

    const PREAMBLE: &str = "You are a helpful assistant.";

    fn chunks(parts: &[&str]) -> Vec<anyhow::Result<LLMStreamEvent>> {
        parts
            .iter()
            .map(|p| Ok(LLMStreamEvent::TextChunk(p.to_string())))
            .collect()
    }

    fn relay_with(client: MockLLMClient) -> (Arc<InMemorySessionStore>, StreamingRelay) {
        let store = Arc::new(InMemorySessionStore::new(PREAMBLE));
        let relay = StreamingRelay::new(store.clone(), Arc::new(client));
        (store, relay)
    }

    async fn drain(stream: RelayStream) -> Vec<Result<RelayEvent, RelayError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_fragments_are_forwarded_and_committed_once() {
        let mut client = MockLLMClient::new();
        client
            .expect_stream_chat()
            .times(1)
            .withf(|transcript| {
                transcript == &vec![Turn::system(PREAMBLE), Turn::user("Say hello")]
            })
            .returning(|_| Ok(Box::pin(stream::iter(chunks(&["Hel", "lo"])))));
        let (store, relay) = relay_with(client);

        let stream = relay
            .chat_turn("call-1", Some("Say hello".into()))
            .await
            .unwrap();
        let events = drain(stream).await;

        let events: Vec<RelayEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                RelayEvent::Fragment(StreamFragment::assistant("Hel")),
                RelayEvent::Fragment(StreamFragment::assistant("lo")),
                RelayEvent::Done,
            ]
        );

        let turns = store.snapshot("call-1").await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2], Turn::assistant("Hello"));
    }

    #[tokio::test]
    async fn test_empty_fragments_are_skipped() {
        let mut client = MockLLMClient::new();
        client
            .expect_stream_chat()
            .returning(|_| Ok(Box::pin(stream::iter(chunks(&["", "Hi", ""])))));
        let (store, relay) = relay_with(client);

        let events = drain(relay.chat_turn("call-1", None).await.unwrap()).await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            store.snapshot("call-1").await.unwrap().last(),
            Some(&Turn::assistant("Hi"))
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_commits_nothing() {
        let mut client = MockLLMClient::new();
        client.expect_stream_chat().returning(|_| {
            let items = vec![
                Ok(LLMStreamEvent::TextChunk("Hel".into())),
                Err(anyhow!("connection reset")),
            ];
            Ok(Box::pin(stream::iter(items)))
        });
        let (store, relay) = relay_with(client);

        let events = drain(relay.chat_turn("call-1", Some("hi".into())).await.unwrap()).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(RelayEvent::Fragment(_))));
        assert!(matches!(events[1], Err(RelayError::GenerationError(_))));
        assert!(!events.iter().any(|e| matches!(e, Ok(RelayEvent::Done))));

        let turns = store.snapshot("call-1").await.unwrap();
        assert_eq!(turns, vec![Turn::system(PREAMBLE), Turn::user("hi")]);
    }

    #[tokio::test]
    async fn test_backend_that_cannot_start_fails_before_streaming() {
        let mut client = MockLLMClient::new();
        client
            .expect_stream_chat()
            .returning(|_| Err(anyhow!("invalid api key")));
        let (store, relay) = relay_with(client);

        let result = relay.chat_turn("call-1", Some("hi".into())).await;
        assert!(matches!(result, Err(RelayError::GenerationError(msg)) if msg.contains("invalid api key")));

        // The turn lock was released with the failed attempt.
        let guard = tokio::time::timeout(Duration::from_millis(100), store.begin_turn("call-1")).await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_stalled_upstream_times_out() {
        let mut client = MockLLMClient::new();
        client.expect_stream_chat().returning(|_| {
            Ok(Box::pin(
                stream::iter(chunks(&["partial"])).chain(stream::pending()),
            ))
        });
        let (store, relay) = relay_with(client);
        let relay = relay.with_fragment_timeout(Duration::from_millis(50));

        let events = drain(relay.chat_turn("call-1", None).await.unwrap()).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(RelayError::GenerationTimeout(_))));
        assert_eq!(store.snapshot("call-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_client_disconnect_discards_partial_response() {
        let mut client = MockLLMClient::new();
        client.expect_stream_chat().returning(|_| {
            Ok(Box::pin(
                stream::iter(chunks(&["first"])).chain(stream::pending()),
            ))
        });
        let (store, relay) = relay_with(client);

        let mut stream = relay.chat_turn("call-1", None).await.unwrap();
        assert!(matches!(stream.next().await, Some(Ok(RelayEvent::Fragment(_)))));
        drop(stream);

        // The producer notices the closed channel and releases the turn.
        let guard = tokio::time::timeout(Duration::from_secs(1), store.begin_turn("call-1")).await;
        assert!(guard.is_ok());
        assert_eq!(store.snapshot("call-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hang_during_stream_surfaces_session_not_found() {
        let mut client = MockLLMClient::new();
        client.expect_stream_chat().returning(|_| {
            let slow = stream::iter(chunks(&["a", "b"])).then(|item| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                item
            });
            Ok(Box::pin(slow))
        });
        let (store, relay) = relay_with(client);

        let stream = relay.chat_turn("call-1", None).await.unwrap();
        store.remove("call-1").await;
        let events = drain(stream).await;

        assert!(matches!(events.last(), Some(Err(RelayError::SessionNotFound(_)))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_reply_is_not_committed_into_a_recreated_session() {
        let mut client = MockLLMClient::new();
        client.expect_stream_chat().returning(|_| {
            let slow = stream::iter(chunks(&["old-call-reply"])).then(|item| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                item
            });
            Ok(Box::pin(slow))
        });
        let (store, relay) = relay_with(client);

        let stream = relay.chat_turn("call-1", Some("old".into())).await.unwrap();
        store.remove("call-1").await;
        store.get_or_create("call-1").await;

        let events = drain(stream).await;

        assert!(matches!(events.last(), Some(Err(RelayError::SessionNotFound(_)))));
        assert_eq!(
            store.snapshot("call-1").await.unwrap(),
            vec![Turn::system(PREAMBLE)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_turns_for_same_call_do_not_interleave() {
        let mut client = MockLLMClient::new();
        client.expect_stream_chat().times(2).returning(|transcript| {
            let last = transcript
                .last()
                .map(|turn| turn.content.clone())
                .unwrap_or_default();
            let parts = vec!["re:".to_string(), last];
            let slow = stream::iter(parts).then(|part| async move {
                tokio::task::yield_now().await;
                Ok::<_, anyhow::Error>(LLMStreamEvent::TextChunk(part))
            });
            Ok(Box::pin(slow))
        });
        let (store, relay) = relay_with(client);
        let relay = Arc::new(relay);

        let mut tasks = Vec::new();
        for text in ["first", "second"] {
            let relay = relay.clone();
            tasks.push(tokio::spawn(async move {
                let stream = relay.chat_turn("call-1", Some(text.into())).await.unwrap();
                let events = drain(stream).await;
                let reply: String = events
                    .into_iter()
                    .filter_map(|e| match e {
                        Ok(RelayEvent::Fragment(f)) => Some(f.text),
                        _ => None,
                    })
                    .collect();
                (text, reply)
            }));
        }
        for task in tasks {
            let (text, reply) = task.await.unwrap();
            assert_eq!(reply, format!("re:{text}"));
        }

        let turns = store.snapshot("call-1").await.unwrap();
        assert_eq!(turns.len(), 5);
        for pair in turns[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1], Turn::assistant(format!("re:{}", pair[0].content)));
        }
    }
}
