//! Incremental splitter for `data:`-record streams (Server-Sent Events).
//!
//! Network chunks arrive at arbitrary byte boundaries: a record, or even a
//! single UTF-8 character, can be split across chunks. [`SseRecordStream`]
//! buffers raw bytes and yields one payload string per complete record
//! (terminated by a blank line), so consumers only ever see whole records.
//!
//! - Frames without the `data:` marker (comments, keep-alives) are skipped.
//! - UTF-8 is validated per complete frame, never per chunk.
//! - An unterminated trailing record at end-of-stream is truncation and is
//!   discarded.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::{Stream, StreamExt};
use memchr::memmem;
use thiserror::Error;
use tracing::debug;

/// Terminal record payload marking successful completion of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Record marker prefix; an optional single space after it is ignored.
const RECORD_MARKER: &str = "data:";

/// Records are terminated by a blank line.
const RECORD_SEPARATOR: &[u8] = b"\n\n";

/// Cap on buffered bytes awaiting a record separator.
const MAX_BUFFERED_BYTES: usize = 1_000_000;

/// Errors raised while splitting a byte stream into records.
#[derive(Error, Debug)]
pub enum SseError {
    /// The underlying transport failed mid-stream.
    #[error("stream transport failed: {0}")]
    Transport(String),

    /// A complete record contained invalid UTF-8.
    #[error("invalid UTF-8 in stream record: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A single record exceeded the buffering cap.
    #[error("stream record exceeded the buffering cap")]
    Oversized,
}

/// Stream adapter yielding one record payload per complete `data:` frame.
///
/// Maintains internal state to handle records split across chunks.
pub struct SseRecordStream<S> {
    /// The underlying byte stream.
    inner: S,
    /// Raw bytes carried over from previous chunks.
    buffer: Vec<u8>,
    /// Complete payloads ready to be yielded.
    records: VecDeque<String>,
}

impl<S> SseRecordStream<S> {
    /// Wrap a byte stream.
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: Vec::new(),
            records: VecDeque::new(),
        }
    }

    /// Split all complete records out of the buffer, queueing their payloads.
    fn drain_complete_records(&mut self) -> Result<(), SseError> {
        let finder = memmem::Finder::new(RECORD_SEPARATOR);
        let mut start = 0;

        while let Some(pos) = finder.find(&self.buffer[start..]) {
            let frame_end = start + pos;
            // A complete frame must be valid UTF-8; chunks need not be.
            let frame = std::str::from_utf8(&self.buffer[start..frame_end])?;
            if let Some(payload) = extract_payload(frame) {
                self.records.push_back(payload.to_string());
            }
            start = frame_end + RECORD_SEPARATOR.len();
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        Ok(())
    }
}

/// Strip the record marker from a frame; frames without it carry no payload.
fn extract_payload(frame: &str) -> Option<&str> {
    let rest = frame.strip_prefix(RECORD_MARKER)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

impl<S, E> Stream for SseRecordStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Item = Result<String, SseError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // Yield already-split records first, in arrival order.
            if let Some(record) = self.records.pop_front() {
                return Poll::Ready(Some(Ok(record)));
            }

            let chunk = match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Poll::Ready(Some(Err(SseError::Transport(e.into().to_string()))));
                }
                None => {
                    // The wire terminates every record with a separator, so
                    // leftover bytes here are a truncated record.
                    if !self.buffer.is_empty() {
                        debug!(
                            bytes = self.buffer.len(),
                            "discarding truncated record at end of stream"
                        );
                        self.buffer.clear();
                    }
                    return Poll::Ready(None);
                }
            };

            self.buffer.extend_from_slice(&chunk);
            if self.buffer.len() > MAX_BUFFERED_BYTES {
                self.buffer.clear();
                return Poll::Ready(Some(Err(SseError::Oversized)));
            }

            if let Err(e) = self.drain_complete_records() {
                return Poll::Ready(Some(Err(e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunked(parts: Vec<Vec<u8>>) -> SseRecordStream<impl Stream<Item = Result<bytes::Bytes, std::io::Error>> + Unpin> {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> =
            parts.into_iter().map(|p| Ok(bytes::Bytes::from(p))).collect();
        SseRecordStream::new(stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_complete_records_in_one_chunk() {
        let mut records = chunked(vec![b"data: {\"token\":\"Hi\"}\n\ndata: [DONE]\n\n".to_vec()]);

        assert_eq!(records.next().await.unwrap().unwrap(), "{\"token\":\"Hi\"}");
        assert_eq!(records.next().await.unwrap().unwrap(), DONE_SENTINEL);
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn test_record_split_across_chunks() {
        let mut records = chunked(vec![
            b"data: {\"to".to_vec(),
            b"ken\":\"Hel".to_vec(),
            b"lo\"}\n\ndata: ".to_vec(),
            b"[DONE]\n\n".to_vec(),
        ]);

        assert_eq!(records.next().await.unwrap().unwrap(), "{\"token\":\"Hello\"}");
        assert_eq!(records.next().await.unwrap().unwrap(), DONE_SENTINEL);
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        // Euro sign is 3 bytes in UTF-8: E2 82 AC
        let euro = "€".as_bytes();
        let mut records = chunked(vec![
            [b"data: price ".as_slice(), &euro[..2]].concat(),
            [&euro[2..], b"100\n\n"].concat(),
        ]);

        assert_eq!(records.next().await.unwrap().unwrap(), "price €100");
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn test_four_byte_char_split_across_chunks() {
        let smiley = "🙂".as_bytes();
        assert_eq!(smiley.len(), 4);
        let mut records = chunked(vec![
            [b"data: {\"token\":\"".as_slice(), &smiley[..2]].concat(),
            [&smiley[2..], b"\"}\n\n"].concat(),
        ]);

        assert_eq!(records.next().await.unwrap().unwrap(), "{\"token\":\"🙂\"}");
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_without_marker_are_skipped() {
        let mut records = chunked(vec![
            b": keep-alive\n\nevent: noise\n\ndata: real\n\n".to_vec(),
        ]);

        assert_eq!(records.next().await.unwrap().unwrap(), "real");
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_tail_is_discarded() {
        let mut records = chunked(vec![b"data: whole\n\ndata: {\"cut".to_vec()]);

        assert_eq!(records.next().await.unwrap().unwrap(), "whole");
        // the unterminated record never surfaces
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_in_complete_record_errors() {
        let mut records = chunked(vec![b"data: bad \xFF\xFE bytes\n\n".to_vec()]);

        let result = records.next().await.unwrap();
        assert!(matches!(result, Err(SseError::InvalidUtf8(_))));
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from("data: one\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut records = SseRecordStream::new(stream::iter(chunks));

        assert_eq!(records.next().await.unwrap().unwrap(), "one");
        let result = records.next().await.unwrap();
        assert!(matches!(result, Err(SseError::Transport(_))));
    }
}
