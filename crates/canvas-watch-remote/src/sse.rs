//! Server-Sent Events line parser for the workspace live-update endpoint.
//!
//! Converts a byte stream (usually a `reqwest::Response` body) into a
//! `Stream<Item = SseEvent>`.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio_stream::StreamExt;

use canvas_watch_core::error::{CanvasWatchError, Result};

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(response: reqwest::Response) -> impl Stream<Item = Result<SseEvent>> {
    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(CanvasWatchError::from));
    parse_sse_bytes(bytes)
}

/// Parse an arbitrary chunked byte stream as SSE. Chunk boundaries may fall
/// anywhere, including inside a line.
pub fn parse_sse_bytes<S>(byte_stream: S) -> impl Stream<Item = Result<SseEvent>>
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: BytesMut::new(),
            current_event: None,
            current_data: Vec::new(),
            current_id: None,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                // Only complete lines are decoded, so multi-byte characters
                // split across chunks stay intact.
                if let Some(newline_pos) = state.buffer.iter().position(|&b| b == b'\n') {
                    let line = state.buffer.split_to(newline_pos + 1);
                    if let Some(event) = state.process_line(&line[..newline_pos]) {
                        return Some((Ok(event), state));
                    }
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(CanvasWatchError::Stream(e.to_string())), state));
                    }
                    None => {
                        state.done = true;
                        if !state.buffer.is_empty() {
                            let rest = state.buffer.split();
                            if let Some(event) = state.process_line(&rest) {
                                return Some((Ok(event), state));
                            }
                        }
                        return state.take_event().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
    buffer: BytesMut,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
    done: bool,
}

impl SseState {
    /// Apply one line (without its `\n`). Returns an event on a blank line.
    fn process_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let decoded = String::from_utf8_lossy(raw);
        let line = decoded.trim_end_matches('\r');

        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = line.strip_prefix("event:") {
            self.current_event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.current_data.push(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            self.current_id = Some(value.trim_start().to_string());
        }
        // Ignore unknown fields (retry:, etc.)
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}
