//! Client for the relay endpoint: request plumbing plus the display state
//! machine any consumer (terminal, page, test harness) drives.
//!
//! [`DisplayBuffer`] owns the rendering rules for a streamed answer:
//! - token records append, in arrival order
//! - the `[DONE]` sentinel completes the answer exactly once
//! - an error record replaces the answer wholesale and aborts the read loop
//! - a complete but malformed record is a protocol error, not a skip

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sse::{SseError, SseRecordStream, DONE_SENTINEL};

/// Errors surfaced to relay consumers.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The HTTP request itself failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay reported a failure (error body or in-stream error record).
    #[error("{0}")]
    Relay(String),

    /// A complete record did not conform to the wire format.
    #[error("malformed stream record: {0}")]
    Protocol(String),

    /// The response stream broke mid-answer.
    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl From<SseError> for ClientError {
    fn from(err: SseError) -> Self {
        match err {
            SseError::Transport(msg) => ClientError::Stream(msg),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

// ─── Display State ─────────────────────────────────────────────────────────

/// What applying one record did to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Token text was appended; carries the delta for progressive rendering.
    Token(String),
    /// The stream completed. Reported once; repeat sentinels are ignored.
    Done,
    /// The record carried nothing displayable.
    Ignored,
}

/// One streamed record, as the relay emits it.
#[derive(Debug, Deserialize)]
struct RelayRecord {
    token: Option<String>,
    error: Option<String>,
}

/// Accumulates a streamed answer record by record.
#[derive(Debug)]
pub struct DisplayBuffer {
    text: String,
    done: bool,
    loading: bool,
}

impl DisplayBuffer {
    /// Fresh buffer for a just-submitted prompt: empty and in flight.
    pub fn new() -> Self {
        Self {
            text: String::new(),
            done: false,
            loading: true,
        }
    }

    /// Apply one complete record payload.
    ///
    /// An error record replaces the buffered text with the relay's message
    /// and returns it as [`ClientError::Relay`]; the caller stops reading.
    pub fn apply(&mut self, payload: &str) -> Result<RecordOutcome, ClientError> {
        if payload.trim() == DONE_SENTINEL {
            if self.done {
                return Ok(RecordOutcome::Ignored);
            }
            self.done = true;
            self.loading = false;
            return Ok(RecordOutcome::Done);
        }

        let record: RelayRecord = serde_json::from_str(payload)
            .map_err(|e| ClientError::Protocol(format!("{e} in record {payload:?}")))?;

        if let Some(message) = record.error {
            self.text = message.clone();
            self.loading = false;
            return Err(ClientError::Relay(message));
        }

        match record.token {
            Some(token) => {
                self.text.push_str(&token);
                Ok(RecordOutcome::Token(token))
            }
            None => Ok(RecordOutcome::Ignored),
        }
    }

    /// The stream ended; the answer is no longer in flight.
    pub fn finish(&mut self) {
        self.loading = false;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }
}

// ─── HTTP Client ───────────────────────────────────────────────────────────

/// Request body for the relay endpoint.
#[derive(Debug, Serialize)]
struct GenerateCall<'a> {
    prompt: &'a str,
    stream: bool,
}

/// Non-streaming response body; error bodies share the same shape.
#[derive(Debug, Default, Deserialize)]
struct GenerateReply {
    result: Option<String>,
    error: Option<String>,
}

/// HTTP client for a relay server.
pub struct RelayClient {
    http: Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    /// Ask for a completion and wait for the whole answer.
    pub async fn ask(&self, prompt: &str) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.endpoint())
            .json(&GenerateCall {
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        let reply: GenerateReply = response.json().await?;

        match reply.result {
            Some(result) => Ok(result),
            None => Err(ClientError::Relay(
                reply
                    .error
                    .unwrap_or_else(|| format!("relay returned status {status}")),
            )),
        }
    }

    /// Ask for a completion, invoking `on_token` for each token as it
    /// arrives. Returns the full accumulated answer.
    pub async fn ask_streaming<F>(&self, prompt: &str, mut on_token: F) -> Result<String, ClientError>
    where
        F: FnMut(&str),
    {
        let response = self
            .http
            .post(self.endpoint())
            .json(&GenerateCall {
                prompt,
                stream: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let reply: GenerateReply = response.json().await.unwrap_or_default();
            return Err(ClientError::Relay(reply.error.unwrap_or_else(|| {
                format!("relay returned status {status}")
            })));
        }

        let mut records = SseRecordStream::new(response.bytes_stream().boxed());
        let mut buffer = DisplayBuffer::new();

        // Read until the stream itself ends, not just until the sentinel.
        while let Some(record) = records.next().await {
            match buffer.apply(&record?) {
                Ok(RecordOutcome::Token(delta)) => on_token(&delta),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
        buffer.finish();

        Ok(buffer.into_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_append_in_order() {
        let mut buffer = DisplayBuffer::new();
        assert!(buffer.is_loading());

        let outcome = buffer.apply(r#"{"token":"Hel"}"#).unwrap();
        assert_eq!(outcome, RecordOutcome::Token("Hel".to_string()));
        buffer.apply(r#"{"token":"lo"}"#).unwrap();

        assert_eq!(buffer.text(), "Hello");
        assert!(!buffer.is_done());
    }

    #[test]
    fn test_done_completes_exactly_once() {
        let mut buffer = DisplayBuffer::new();
        buffer.apply(r#"{"token":"hi"}"#).unwrap();

        assert_eq!(buffer.apply("[DONE]").unwrap(), RecordOutcome::Done);
        assert!(buffer.is_done());
        assert!(!buffer.is_loading());

        // a repeated sentinel changes nothing
        assert_eq!(buffer.apply("[DONE]").unwrap(), RecordOutcome::Ignored);
        assert_eq!(buffer.text(), "hi");
    }

    #[test]
    fn test_padded_sentinel_is_accepted() {
        let mut buffer = DisplayBuffer::new();
        assert_eq!(buffer.apply(" [DONE] ").unwrap(), RecordOutcome::Done);
    }

    #[test]
    fn test_error_record_replaces_text_and_aborts() {
        let mut buffer = DisplayBuffer::new();
        buffer.apply(r#"{"token":"partial "}"#).unwrap();

        let err = buffer.apply(r#"{"error":"generation failed"}"#).unwrap_err();
        assert!(matches!(err, ClientError::Relay(ref m) if m == "generation failed"));

        // the error message replaces everything streamed so far
        assert_eq!(buffer.text(), "generation failed");
        assert!(!buffer.is_loading());
        assert!(!buffer.is_done());
    }

    #[test]
    fn test_malformed_complete_record_is_protocol_error() {
        let mut buffer = DisplayBuffer::new();
        let err = buffer.apply(r#"{"token": "unterminated"#).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        // nothing was appended
        assert_eq!(buffer.text(), "");
    }

    #[test]
    fn test_record_with_no_known_field_is_ignored() {
        let mut buffer = DisplayBuffer::new();
        let outcome = buffer.apply(r#"{"usage": {"total_tokens": 9}}"#).unwrap();
        assert_eq!(outcome, RecordOutcome::Ignored);
        assert_eq!(buffer.text(), "");
    }

    #[test]
    fn test_finish_clears_loading_without_done() {
        let mut buffer = DisplayBuffer::new();
        buffer.apply(r#"{"token":"tail"}"#).unwrap();
        buffer.finish();

        assert!(!buffer.is_loading());
        assert!(!buffer.is_done());
        assert_eq!(buffer.text(), "tail");
    }
}
