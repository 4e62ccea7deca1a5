//! Server-Sent Events support: response encoding and upstream frame parsing.
//!
//! The completion API streams responses as `data: {json}\n\n` frames ending
//! with `data: [DONE]\n\n`. This module covers both directions of that
//! contract: [`Sse`] formats an outgoing stream of payloads into a proper
//! `text/event-stream` response, and [`EventStreamParser`] incrementally
//! splits the upstream byte stream back into complete event payloads, no
//! matter how the network fragments them.
//!
//! # Examples
//!
//! ```rust
//! use cloak::sse::Sse;
//! use tokio_stream::iter;
//!
//! let frames = vec![
//!     r#"{"choices":[{"delta":{"content":"hi"}}]}"#.to_string(),
//! ];
//! let sse = Sse::new(iter(frames));
//! // Use as a responder in a route handler
//! ```

use std::convert::Infallible;

use bytes::{Bytes, BytesMut};
use http::{StatusCode, header};
use http_body_util::StreamBody;
use tokio_stream::{Stream, StreamExt};

use crate::{body::CloakBody, responder::Responder, types::Response};

/// SSE data line prefix according to the EventSource specification.
const PREFIX: &[u8] = b"data: ";

/// SSE event terminator sequence.
const SUFFIX: &[u8] = b"\n\n";

/// Calculates the total length of SSE prefix and suffix bytes.
const fn ps_len() -> usize {
    PREFIX.len() + SUFFIX.len()
}

/// Server-Sent Events stream wrapper for outgoing responses.
///
/// Wraps a stream of event payloads and formats each as one SSE event when
/// converted to an HTTP response, with the required headers set.
pub struct Sse<S>
where
    S: Stream<Item = String> + Send + 'static,
{
    /// The underlying stream of payloads to be sent as SSE events.
    pub stream: S,
}

impl<S> Sse<S>
where
    S: Stream<Item = String> + Send + 'static,
{
    /// Creates a new SSE wrapper around the provided stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> Responder for Sse<S>
where
    S: Stream<Item = String> + Send + 'static,
{
    /// Converts the SSE stream into an HTTP response with proper headers.
    fn into_response(self) -> Response {
        let stream = self.stream.map(|msg| {
            let mut buf = BytesMut::with_capacity(ps_len() + msg.len());
            buf.extend_from_slice(PREFIX);
            buf.extend_from_slice(msg.as_bytes());
            buf.extend_from_slice(SUFFIX);
            Ok::<_, Infallible>(hyper::body::Frame::data(Bytes::from(buf)))
        });

        hyper::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(CloakBody::new(StreamBody::new(stream)))
            .unwrap()
    }
}

/// One parsed upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload, with the prefix stripped.
    Data(String),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Incremental parser for an upstream `text/event-stream` body.
///
/// Feed raw network chunks with [`push`]; complete events are returned as
/// soon as their terminating blank line has arrived. Incomplete events stay
/// buffered, so frames split across TCP segments (or mid-UTF-8-sequence)
/// reassemble correctly. Comment lines and fields other than `data:` are
/// ignored per the EventSource specification.
///
/// [`push`]: EventStreamParser::push
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buf: Vec<u8>,
}

impl EventStreamParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk of bytes, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((pos, terminator_len)) = find_frame_end(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..pos + terminator_len).collect();
            if let Some(event) = parse_frame(&frame[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Number of bytes still waiting for their frame terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Finds the first blank-line frame terminator (`\n\n` or `\r\n\r\n`).
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Parses one complete frame into an event, if it carries data.
fn parse_frame(frame: &[u8]) -> Option<SseEvent> {
    let text = std::str::from_utf8(frame).ok()?;

    let mut data_lines: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let payload = data_lines.join("\n");
    if payload == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_frame() {
        let mut parser = EventStreamParser::new();
        let events = parser.push(b"data: {\"a\":1}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"a\":1}".to_string())]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn reassembles_split_frames() {
        let mut parser = EventStreamParser::new();
        assert!(parser.push(b"data: {\"a\"").is_empty());
        assert!(parser.push(b":1}\n").is_empty());
        let events = parser.push(b"\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn ignores_comments_and_other_fields() {
        let mut parser = EventStreamParser::new();
        let events = parser.push(b": keep-alive\n\nevent: ping\n\ndata: x\n\n");
        assert_eq!(events, vec![SseEvent::Data("x".to_string())]);
    }

    #[test]
    fn handles_crlf_frames() {
        let mut parser = EventStreamParser::new();
        let events = parser.push(b"data: y\r\n\ndata: [DONE]\r\n\n");
        assert_eq!(events, vec![SseEvent::Data("y".to_string()), SseEvent::Done]);
    }

    #[test]
    fn joins_multi_line_data() {
        let mut parser = EventStreamParser::new();
        let events = parser.push(b"data: one\ndata: two\n\n");
        assert_eq!(events, vec![SseEvent::Data("one\ntwo".to_string())]);
    }
}
