//! SSE streaming for token-by-token relay responses.
//!
//! Converts a channel of [`CompletionEvent`]s into the relay wire format:
//! one `data:` record per event. Tokens become `{"token": ...}` records,
//! success becomes the bare `[DONE]` sentinel, and a failure becomes one
//! `{"error": ...}` record carrying a generic message. Nothing follows an
//! error record; the channel closing ends the response body, so tokens sent
//! before the failure stay delivered.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::pipeline::CompletionEvent;
use crate::sse::DONE_SENTINEL;

/// Generic in-stream failure message; internal detail stays in the logs.
pub const STREAM_ERROR_MESSAGE: &str = "generation failed";

/// Token record payload.
#[derive(Debug, Serialize)]
struct TokenRecord<'a> {
    token: &'a str,
}

/// Error record payload.
#[derive(Debug, Serialize)]
struct ErrorRecord<'a> {
    error: &'a str,
}

/// Wire payload for one completion event.
pub fn record_payload(event: &CompletionEvent, request_id: &str) -> String {
    match event {
        CompletionEvent::Token { text } => {
            serde_json::to_string(&TokenRecord { token: text }).unwrap_or_default()
        }
        CompletionEvent::Done { completion_tokens } => {
            debug!(
                request_id = request_id,
                completion_tokens = completion_tokens,
                "Stream complete"
            );
            DONE_SENTINEL.to_string()
        }
        CompletionEvent::Error(detail) => {
            error!(request_id = request_id, error = detail, "Stream failed");
            serde_json::to_string(&ErrorRecord {
                error: STREAM_ERROR_MESSAGE,
            })
            .unwrap_or_default()
        }
    }
}

/// Convert a completion event receiver into an SSE stream.
pub fn completion_to_sse_stream(
    rx: mpsc::Receiver<CompletionEvent>,
    request_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(move |event| Ok(Event::default().data(record_payload(&event, &request_id))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_record_payload() {
        let payload = record_payload(&CompletionEvent::Token { text: "Hel".to_string() }, "t1");
        assert_eq!(payload, r#"{"token":"Hel"}"#);
    }

    #[test]
    fn test_done_payload_is_bare_sentinel() {
        let payload = record_payload(&CompletionEvent::Done { completion_tokens: 7 }, "t1");
        assert_eq!(payload, "[DONE]");
    }

    #[test]
    fn test_error_payload_is_generic() {
        let payload = record_payload(
            &CompletionEvent::Error("provider returned status 401: bad key".to_string()),
            "t1",
        );
        assert_eq!(payload, r#"{"error":"generation failed"}"#);
        assert!(!payload.contains("401"));
    }

    #[tokio::test]
    async fn test_nothing_follows_a_terminal_event() {
        let (tx, rx) = mpsc::channel(32);
        tx.send(CompletionEvent::Token { text: "a".to_string() })
            .await
            .unwrap();
        tx.send(CompletionEvent::Error("boom".to_string()))
            .await
            .unwrap();
        drop(tx);

        let events: Vec<_> = completion_to_sse_stream(rx, "t1".to_string()).collect().await;
        // one token record, one error record, no trailing sentinel
        assert_eq!(events.len(), 2);
    }
}
