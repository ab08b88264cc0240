//! prompt-relay: an SSE token-streaming relay for LLM chat completions.
//!
//! One prompt goes in over HTTP; the completion comes back either as a
//! single JSON body or as a live stream of `data: {"token": ...}` records
//! terminated by a `[DONE]` sentinel. Upstream is any OpenAI-compatible
//! chat-completions provider.
//!
//! - [`server`]: the relay endpoint (axum) and SSE record emission
//! - [`pipeline`]: the completion pipeline trait and the provider backend
//! - [`client`]: the consuming side, from record parsing to display state
//! - [`sse`]: incremental `data:`-record splitting over raw byte chunks
//! - [`config`]: CLI and file configuration

pub mod client;
pub mod config;
pub mod pipeline;
pub mod server;
pub mod sse;
