//! Completion pipeline: prompt in, token events out.
//!
//! The pipeline is the component behind the relay endpoint that:
//! 1. Receives a templated chat prompt
//! 2. Drives one completion against the upstream provider
//! 3. Returns generated tokens via a streaming channel
//!
//! Both response modes consume the same channel; the non-streaming path just
//! collects it to completion before answering.

pub mod openai;
pub mod template;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::pipeline::template::ChatMessage;

/// A completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Unique request ID, minted by the server per HTTP request.
    pub request_id: String,

    /// Chat messages, already templated (system prompt + user prompt).
    pub messages: Vec<ChatMessage>,
}

/// A completion event.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    /// A new token was generated.
    Token { text: String },
    /// Generation is complete.
    Done { completion_tokens: usize },
    /// An error occurred during generation. Carries internal detail; it is
    /// logged server-side and never forwarded verbatim to clients.
    Error(String),
}

/// A source of streamed completions.
///
/// Implementations send zero or more `Token` events followed by exactly one
/// terminal event (`Done` or `Error`), then drop the sender so the channel
/// closes. When the receiver is dropped mid-stream, implementations stop
/// generating instead of running the completion to the end.
#[async_trait]
pub trait CompletionBackend: Send + Sync + 'static {
    /// Run a completion request, streaming events to the returned receiver.
    async fn stream_completion(&self, request: CompletionRequest) -> mpsc::Receiver<CompletionEvent>;
}
