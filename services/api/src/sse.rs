//! Server-sent event framing for relayed completions.
//!
//! Every fragment becomes one `data:` event shaped like an OpenAI chat-completion
//! chunk, and a finished response is closed with `data: [DONE]`.

use axum::response::sse::{Event, Sse};
use callrelay_core::{RelayEvent, RelayStream, Role, StreamFragment};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// Payload of the event that marks a successfully completed stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkDelta {
    pub content: String,
    pub role: Role,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
}

/// JSON payload of a single fragment event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

impl From<&StreamFragment> for CompletionChunk {
    fn from(fragment: &StreamFragment) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: fragment.text.clone(),
                    role: fragment.role,
                },
            }],
        }
    }
}

fn to_event(event: RelayEvent) -> Result<Event, axum::Error> {
    match event {
        RelayEvent::Fragment(fragment) => {
            Event::default().json_data(CompletionChunk::from(&fragment))
        }
        RelayEvent::Done => Ok(Event::default().data(DONE_SENTINEL)),
    }
}

/// Wraps a relay stream as an SSE response.
///
/// An error item ends the body before the `[DONE]` event is written, which is how the
/// client learns that the turn failed.
pub fn relay_sse(
    stream: RelayStream,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static> {
    Sse::new(stream.map(|item| item.map_err(axum::Error::new).and_then(to_event)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::header,
        response::{IntoResponse, Response},
    };
    use callrelay_core::RelayError;
    use futures_util::stream;
    use http_body_util::BodyExt;

    fn respond(items: Vec<Result<RelayEvent, RelayError>>) -> Response {
        relay_sse(Box::pin(stream::iter(items))).into_response()
    }

    #[tokio::test]
    async fn test_completed_stream_wire_format() {
        let response = respond(vec![
            Ok(RelayEvent::Fragment(StreamFragment::assistant("Hel"))),
            Ok(RelayEvent::Fragment(StreamFragment::assistant("lo"))),
            Ok(RelayEvent::Done),
        ]);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            String::from_utf8(bytes.to_vec()).unwrap(),
            concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\",\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\",\"role\":\"assistant\"}}]}\n\n",
                "data: [DONE]\n\n",
            )
        );
    }

    #[tokio::test]
    async fn test_fragment_with_newlines_stays_on_one_line() {
        let response = respond(vec![Ok(RelayEvent::Fragment(StreamFragment::assistant(
            "say \"hi\"\nnow",
        )))]);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(body.matches('\n').count(), 2);

        let json = body.trim_start_matches("data: ").trim_end();
        let chunk: CompletionChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.choices[0].delta.content, "say \"hi\"\nnow");
    }

    #[tokio::test]
    async fn test_error_aborts_body_before_done() {
        let response = respond(vec![
            Ok(RelayEvent::Fragment(StreamFragment::assistant("a"))),
            Err(RelayError::generation("boom")),
            Ok(RelayEvent::Done),
        ]);

        assert!(response.into_body().collect().await.is_err());
    }
}
