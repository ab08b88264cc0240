//! HTTP server for the relay endpoint.
//!
//! - [`api`]: Request/response types and route handlers
//! - [`streaming`]: SSE record emission for token-by-token responses

pub mod api;
pub mod streaming;
