//! Server-sent event decoding for streamed completions.

use futures::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::outcome::Outcome;
use crate::response::{FinishReason, ResponseChunk};
use crate::transport::ByteStream;
use crate::types::{FunctionCall, Message, Role};

const DONE_SENTINEL: &str = "[DONE]";

/// Largest event, pending line plus joined data, the decoder will hold.
pub const MAX_EVENT_BYTES: usize = 1 << 20;

/// Splits a byte stream into SSE event payloads.
///
/// Consecutive `data:` lines are joined with `\n`; a blank line ends the
/// event. Other fields and `:` comments are ignored. Bytes are buffered until
/// a full line is available, so multi-byte characters split across reads
/// decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline.
    scanned: usize,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every event completed by them.
    ///
    /// Fails with [`ChatError::MalformedChunk`] once an unfinished event
    /// grows past [`MAX_EVENT_BYTES`]; the decoder is reset.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ChatError> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            if let Some(event) = self.take_line(&line) {
                events.push(event);
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        let pending = self.buffer.len() + self.data.as_ref().map_or(0, String::len);
        if pending > MAX_EVENT_BYTES {
            *self = Self::default();
            return Err(ChatError::MalformedChunk(format!(
                "event exceeds {MAX_EVENT_BYTES} bytes without a terminator"
            )));
        }
        Ok(events)
    }

    /// Flushes a trailing event the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.take_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.data.take()
    }

    fn take_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.data.take();
        }
        if let Some(rest) = line.strip_prefix("data:") {
            let fragment = rest.strip_prefix(' ').unwrap_or(rest);
            match &mut self.data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(fragment);
                }
                None => self.data = Some(fragment.to_string()),
            }
        }
        None
    }
}

/// A decoded SSE payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(ResponseChunk),
    Done,
}

/// Parses one event payload. Empty payloads yield `None`.
pub fn parse_event(data: &str) -> Option<Result<StreamEvent, ChatError>> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed == DONE_SENTINEL {
        return Some(Ok(StreamEvent::Done));
    }
    Some(
        serde_json::from_str(trimmed)
            .map(StreamEvent::Chunk)
            .map_err(|err| ChatError::MalformedChunk(err.to_string())),
    )
}

/// Lazy, single-pass sequence of streamed chunks.
///
/// It is backed by a live HTTP body: it cannot be cloned or restarted, and it
/// must be drained by a single consumer. It ends after the server's `[DONE]`,
/// when the server closes the connection, or once the cancellation token
/// fires. A transport error or malformed event is yielded as a failure
/// outcome and then ends the stream.
pub struct ChunkStream {
    inner: Pin<Box<dyn Stream<Item = Outcome<ResponseChunk>> + Send>>,
}

impl ChunkStream {
    pub(crate) fn new(bytes: ByteStream, cancel: CancellationToken) -> Self {
        Self {
            inner: Box::pin(decode_chunks(bytes, cancel)),
        }
    }

    /// Drains the stream into an accumulator, stopping at the first failure.
    pub async fn collect_message(mut self) -> Outcome<StreamAccumulator> {
        let mut acc = StreamAccumulator::new();
        while let Some(item) = self.next().await {
            match item {
                Outcome::Success(chunk) => acc.push(&chunk),
                Outcome::RetryableFailure(trace) => return Outcome::RetryableFailure(trace),
                Outcome::PermanentFailure(trace) => return Outcome::PermanentFailure(trace),
            }
        }
        Outcome::Success(acc)
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream").finish_non_exhaustive()
    }
}

impl Stream for ChunkStream {
    type Item = Outcome<ResponseChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

fn decode_chunks(
    mut bytes: ByteStream,
    cancel: CancellationToken,
) -> impl Stream<Item = Outcome<ResponseChunk>> + Send {
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("chat stream cancelled by caller");
                    break;
                }
                next = bytes.next() => next,
            };

            let (events, closed) = match next {
                Some(Ok(raw)) => match decoder.push(&raw) {
                    Ok(events) => (events, false),
                    Err(err) => {
                        yield Outcome::from_error("stream", &err);
                        break;
                    }
                },
                Some(Err(err)) => {
                    yield Outcome::from_error("stream", &err);
                    break;
                }
                None => (decoder.finish().into_iter().collect(), true),
            };

            for data in events {
                match parse_event(&data) {
                    None => {}
                    Some(Ok(StreamEvent::Chunk(chunk))) => yield Outcome::Success(chunk),
                    Some(Ok(StreamEvent::Done)) => {
                        tracing::debug!("chat stream finished");
                        return;
                    }
                    Some(Err(err)) => {
                        yield Outcome::from_error("stream", &err);
                        return;
                    }
                }
            }

            if closed {
                tracing::debug!("chat stream closed by server");
                break;
            }
        }
    }
}

/// Folds streamed chunks into a complete assistant turn.
///
/// Only the first choice is tracked. Chunks without a content delta are
/// accepted and contribute nothing to the text.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    role: Option<Role>,
    content: String,
    function_call: Option<FunctionCall>,
    finish_reason: Option<FinishReason>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &ResponseChunk) {
        let Some(choice) = chunk.choices.first() else {
            return;
        };
        if let Some(role) = choice.delta.role {
            self.role = Some(role);
        }
        if let Some(content) = &choice.delta.content {
            self.content.push_str(content);
        }
        if let Some(call) = &choice.delta.function_call {
            call.merge_into(&mut self.function_call);
        }
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// The completed assistant message, ready to be remembered.
    pub fn into_message(self) -> Message {
        match self.function_call {
            Some(call) => Message::assistant_function_call(call),
            None => Message::assistant(self.content),
        }
    }
}
