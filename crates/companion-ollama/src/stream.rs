//! Newline-delimited JSON decoding for streaming responses.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::api::StreamFrame;
use crate::error::OllamaError;

/// Splits a byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters and
/// JSON objects split across chunk boundaries are reassembled.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes. Returns every complete, non-blank line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Frames decoded from a streaming HTTP response.
///
/// Dropping the stream drops the response body and releases the connection.
pub struct FrameStream {
    inner: ByteStream,
    /// Longest silence tolerated between two body chunks.
    idle_timeout: Duration,
    decoder: NdjsonDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl FrameStream {
    pub(crate) fn new(response: reqwest::Response, idle_timeout: Duration) -> Self {
        let inner = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Self {
            inner: Box::pin(inner),
            idle_timeout,
            decoder: NdjsonDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next decoded frame.
    ///
    /// Malformed lines are logged and skipped. A frame carrying an `error`
    /// field is surfaced as [`OllamaError::Backend`]. A body that stays silent
    /// for longer than the idle timeout ends with [`OllamaError::Timeout`].
    /// Returns `None` once the transport ends.
    pub async fn next_frame(&mut self) -> Option<Result<StreamFrame, OllamaError>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                match serde_json::from_str::<StreamFrame>(&line) {
                    Ok(frame) => {
                        if let Some(message) = frame.error.clone() {
                            return Some(Err(OllamaError::Backend {
                                status: 200,
                                message,
                            }));
                        }
                        return Some(Ok(frame));
                    }
                    Err(e) => {
                        warn!("Skipping malformed stream frame ({}): {}", e, truncate(&line));
                        continue;
                    }
                }
            }

            if self.finished {
                return None;
            }

            let next = match tokio::time::timeout(self.idle_timeout, self.inner.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.finished = true;
                    return Some(Err(OllamaError::Timeout(self.idle_timeout)));
                }
            };

            match next {
                Some(Ok(bytes)) => self.pending.extend(self.decoder.feed(&bytes)),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(OllamaError::Transport(e)));
                }
                None => {
                    self.finished = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }
}

fn truncate(line: &str) -> String {
    const MAX: usize = 120;
    match line.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}
