//! OpenAI-compatible completion backend.
//!
//! Drives a streaming `chat/completions` call and forwards content deltas as
//! [`CompletionEvent`]s. The provider is only ever consumed in streaming
//! mode; buffering for non-streaming responses happens at the relay, not
//! here. If the relay client goes away, the upstream request is dropped
//! rather than run to completion.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::ProviderConfig;
use crate::pipeline::template::ChatMessage;
use crate::pipeline::{CompletionBackend, CompletionEvent, CompletionRequest};
use crate::sse::{SseError, SseRecordStream, DONE_SENTINEL};

/// Errors from the provider call. These stay server-side.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The HTTP request could not be made or the client could not be built.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    /// The provider's event stream broke mid-completion.
    #[error("provider stream failed: {0}")]
    Stream(#[from] SseError),
}

/// Request body for the provider's chat-completions endpoint.
#[derive(Debug, Serialize)]
struct ChatCompletionCall {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// One streamed chunk from the provider.
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Completion backend speaking the OpenAI chat-completions protocol.
pub struct OpenAiBackend {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    /// Build a backend from provider settings and an already-resolved API key.
    ///
    /// Credentials are injected here; the backend never consults the
    /// environment on its own.
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

/// Run the provider call, forwarding token events until the upstream stream
/// ends or the receiver goes away. Returns the number of tokens forwarded.
async fn run_stream(
    http: Client,
    base_url: String,
    api_key: String,
    call: ChatCompletionCall,
    request_id: &str,
    tx: &mpsc::Sender<CompletionEvent>,
) -> Result<usize, BackendError> {
    let response = http
        .post(format!("{base_url}/chat/completions"))
        .bearer_auth(&api_key)
        .json(&call)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Provider { status, body });
    }

    let mut records = SseRecordStream::new(response.bytes_stream().boxed());
    let mut completion_tokens = 0usize;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(request_id = request_id, "Client gone, dropping provider stream");
                return Ok(completion_tokens);
            }
            record = records.next() => {
                let payload = match record {
                    Some(record) => record?,
                    None => break,
                };
                if payload.trim() == DONE_SENTINEL {
                    break;
                }
                let chunk: ChatCompletionChunk = match serde_json::from_str(&payload) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!(request_id = request_id, error = %e, "Skipping unparseable provider record");
                        continue;
                    }
                };
                if let Some(text) = chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
                    if text.is_empty() {
                        continue;
                    }
                    completion_tokens += 1;
                    if tx.send(CompletionEvent::Token { text }).await.is_err() {
                        return Ok(completion_tokens);
                    }
                }
            }
        }
    }

    Ok(completion_tokens)
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn stream_completion(&self, request: CompletionRequest) -> mpsc::Receiver<CompletionEvent> {
        let (tx, rx) = mpsc::channel(32);

        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let call = ChatCompletionCall {
            model: self.model.clone(),
            messages: request.messages,
            stream: true,
        };
        let request_id = request.request_id;

        tokio::spawn(async move {
            debug!(
                request_id = request_id,
                model = call.model,
                "Starting provider stream"
            );

            match run_stream(http, base_url, api_key, call, &request_id, &tx).await {
                Ok(completion_tokens) => {
                    let _ = tx.send(CompletionEvent::Done { completion_tokens }).await;
                }
                Err(e) => {
                    error!(request_id = request_id, error = %e, "Provider stream failed");
                    let _ = tx.send(CompletionEvent::Error(e.to_string())).await;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_chunk_parses() {
        let payload = r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(payload).unwrap();
        let content = chunk.choices.into_iter().next().and_then(|c| c.delta.content);
        assert_eq!(content.as_deref(), Some("Hel"));
    }

    #[test]
    fn test_role_priming_chunk_has_no_content() {
        let payload = r#"{"choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(payload).unwrap();
        let content = chunk.choices.into_iter().next().and_then(|c| c.delta.content);
        assert!(content.is_none());
    }

    #[test]
    fn test_finish_chunk_has_empty_delta() {
        let payload = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(payload).unwrap();
        let choice = chunk.choices.into_iter().next().unwrap();
        assert!(choice.delta.content.is_none());
    }
}
