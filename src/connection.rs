//! Chat-completion connection: the only component that touches memory and
//! the network.
//!
//! A connection runs one call at a time; every operation takes `&mut self`.
//! Nothing here retries. Each call resolves to an [`Outcome`] and the caller
//! decides whether a [`Outcome::RetryableFailure`] is worth another attempt.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::memory::ChatMemory;
use crate::model::Model;
use crate::outcome::Outcome;
use crate::request::{ChatParameters, ChatRequest};
use crate::response::{ResponseBody, decode_reply};
use crate::stream::ChunkStream;
use crate::transport::{ChatTransport, StreamReply};
use crate::types::Message;

pub struct ChatConnection {
    transport: Arc<dyn ChatTransport>,
    memory: Box<dyn ChatMemory>,
}

impl ChatConnection {
    pub fn new(transport: Arc<dyn ChatTransport>, memory: Box<dyn ChatMemory>) -> Self {
        Self { transport, memory }
    }

    /// Sends `content` as a new user turn and waits for the full reply.
    ///
    /// The user message is recorded before the request goes out, so memory
    /// reflects it even if the call fails. Every returned choice's message is
    /// recorded, in order, only once the response has been validated.
    pub async fn complete_chat(
        &mut self,
        content: &str,
        cancel: &CancellationToken,
        model: Model,
        params: &ChatParameters,
    ) -> Outcome<ResponseBody> {
        match self.try_complete_chat(content, cancel, model, params).await {
            Ok(body) => Outcome::Success(body),
            Err(err) => {
                warn!(%model, kind = ?err.kind(), error = %err, "chat completion failed");
                Outcome::from_error("complete_chat", &err)
            }
        }
    }

    /// Sends `content` as a new user turn and returns the reply as a stream.
    ///
    /// Unlike [`complete_chat`](Self::complete_chat), the assistant's reply is
    /// not recorded: only the caller knows when the streamed turn is complete.
    /// Accumulate it with [`StreamAccumulator`](crate::stream::StreamAccumulator)
    /// and pass the result to [`remember`](Self::remember) to keep it.
    pub async fn complete_chat_as_stream(
        &mut self,
        content: &str,
        cancel: &CancellationToken,
        model: Model,
        params: &ChatParameters,
    ) -> Outcome<ChunkStream> {
        match self.try_open_stream(content, cancel, model, params).await {
            Ok(stream) => Outcome::Success(stream),
            Err(err) => {
                warn!(%model, kind = ?err.kind(), error = %err, "chat stream failed to open");
                Outcome::from_error("complete_chat_as_stream", &err)
            }
        }
    }

    /// Records a message the caller assembled itself, such as a streamed reply.
    pub fn remember(&mut self, message: Message) {
        self.memory.extend(vec![message]);
    }

    /// Empties the conversation. A seeded system prompt is kept or dropped
    /// according to the memory's [`ClearPolicy`](crate::memory::ClearPolicy).
    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    /// Copy of the conversation so far.
    pub fn history(&self) -> Vec<Message> {
        self.memory.snapshot()
    }

    pub fn memory(&self) -> &dyn ChatMemory {
        self.memory.as_ref()
    }

    async fn try_complete_chat(
        &mut self,
        content: &str,
        cancel: &CancellationToken,
        model: Model,
        params: &ChatParameters,
    ) -> Result<ResponseBody, ChatError> {
        let body = self.prepare(content, cancel, model, params, false).await?;

        let reply = until_cancelled(cancel, self.transport.send(body)).await?;
        debug!(%model, status = %reply.status, "chat completion reply received");

        let response = decode_reply(reply)?;
        self.memory.extend(response.messages().cloned().collect());
        Ok(response)
    }

    async fn try_open_stream(
        &mut self,
        content: &str,
        cancel: &CancellationToken,
        model: Model,
        params: &ChatParameters,
    ) -> Result<ChunkStream, ChatError> {
        let body = self.prepare(content, cancel, model, params, true).await?;

        match until_cancelled(cancel, self.transport.open_stream(body)).await? {
            StreamReply::Open(bytes) => {
                debug!(%model, "chat stream opened");
                Ok(ChunkStream::new(bytes, cancel.clone()))
            }
            StreamReply::Rejected(reply) => Err(ChatError::status(reply.status, reply.body)),
        }
    }

    /// Pre-flight shared by both modes: validates input, records the user
    /// turn and serializes the request.
    async fn prepare(
        &mut self,
        content: &str,
        cancel: &CancellationToken,
        model: Model,
        params: &ChatParameters,
        stream: bool,
    ) -> Result<String, ChatError> {
        if content.is_empty() {
            return Err(ChatError::EmptyContent);
        }
        params.validate()?;
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        self.memory.append(Message::user(content), cancel).await?;

        let request = ChatRequest::build(model, self.memory.snapshot(), params).streaming(stream);
        debug!(%model, messages = request.messages.len(), stream, "sending chat request");
        request.to_json()
    }
}

/// Races `future` against the caller's token.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, ChatError>>,
) -> Result<T, ChatError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::Cancelled),
        result = future => result,
    }
}
