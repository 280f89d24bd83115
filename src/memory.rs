//! Conversation history owned by a connection.
//!
//! Two stores are provided: [`UnboundedMemory`] keeps every turn, while
//! [`BoundedMemory`] keeps the most recent `capacity` turns and evicts the
//! oldest first. Either may be seeded with a system prompt; a seeded prompt
//! is never evicted, does not count against the capacity, and what happens
//! to it on [`ChatMemory::clear`] is decided by the [`ClearPolicy`] given
//! alongside it.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::outcome::FailureKind;
use crate::types::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("append cancelled")]
    Cancelled,

    /// Raised by stores backed by something other than process memory.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl MemoryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            MemoryError::Cancelled => FailureKind::Retryable,
            MemoryError::Storage(_) => FailureKind::Permanent,
        }
    }
}

/// What [`ChatMemory::clear`] does with a seeded system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearPolicy {
    /// Keep the seeded prompt as the first and only message.
    Reseed,
    /// Drop the seeded prompt along with everything else.
    Empty,
}

/// Ordered conversation history.
///
/// Mutation requires `&mut self`, so a [`snapshot`](ChatMemory::snapshot)
/// can never interleave with an append. Snapshots are owned copies and never
/// see later changes.
#[async_trait]
pub trait ChatMemory: Send + Sync {
    /// Appends one message at the tail, evicting if the store is full.
    ///
    /// Returns [`MemoryError::Cancelled`] without touching the history when
    /// `cancel` has fired.
    async fn append(
        &mut self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<(), MemoryError>;

    /// Appends a batch in order. Not cancellable: the batch is recorded whole.
    fn extend(&mut self, messages: Vec<Message>);

    fn snapshot(&self) -> Vec<Message>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct SeededPrompt {
    message: Message,
    policy: ClearPolicy,
}

impl SeededPrompt {
    fn new(content: impl Into<String>, policy: ClearPolicy) -> Self {
        Self {
            message: Message::system(content),
            policy,
        }
    }

    /// Whether the prompt survives a clear.
    fn survives_clear(&self) -> bool {
        self.policy == ClearPolicy::Reseed
    }
}

/// History that grows without limit.
#[derive(Debug, Clone, Default)]
pub struct UnboundedMemory {
    prompt: Option<SeededPrompt>,
    messages: Vec<Message>,
}

impl UnboundedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(content: impl Into<String>, policy: ClearPolicy) -> Self {
        Self {
            prompt: Some(SeededPrompt::new(content, policy)),
            messages: Vec::new(),
        }
    }
}

#[async_trait]
impl ChatMemory for UnboundedMemory {
    async fn append(
        &mut self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<(), MemoryError> {
        if cancel.is_cancelled() {
            return Err(MemoryError::Cancelled);
        }
        self.messages.push(message);
        Ok(())
    }

    fn extend(&mut self, messages: Vec<Message>) {
        self.messages.extend(messages);
    }

    fn snapshot(&self) -> Vec<Message> {
        self.prompt
            .iter()
            .map(|p| p.message.clone())
            .chain(self.messages.iter().cloned())
            .collect()
    }

    fn clear(&mut self) {
        self.messages.clear();
        if !self.prompt.as_ref().is_some_and(SeededPrompt::survives_clear) {
            self.prompt = None;
        }
    }

    fn len(&self) -> usize {
        self.messages.len() + usize::from(self.prompt.is_some())
    }
}

/// Fixed-capacity FIFO history.
///
/// After any append at most `capacity` non-prompt messages are retained, and
/// they are always the most recently appended ones.
#[derive(Debug, Clone)]
pub struct BoundedMemory {
    capacity: NonZeroUsize,
    prompt: Option<SeededPrompt>,
    messages: VecDeque<Message>,
}

impl BoundedMemory {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            prompt: None,
            messages: VecDeque::with_capacity(capacity.get()),
        }
    }

    pub fn with_system_prompt(
        capacity: NonZeroUsize,
        content: impl Into<String>,
        policy: ClearPolicy,
    ) -> Self {
        Self {
            prompt: Some(SeededPrompt::new(content, policy)),
            ..Self::new(capacity)
        }
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    fn push(&mut self, message: Message) {
        while self.messages.len() >= self.capacity.get() {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }
}

#[async_trait]
impl ChatMemory for BoundedMemory {
    async fn append(
        &mut self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<(), MemoryError> {
        if cancel.is_cancelled() {
            return Err(MemoryError::Cancelled);
        }
        self.push(message);
        Ok(())
    }

    fn extend(&mut self, messages: Vec<Message>) {
        for message in messages {
            self.push(message);
        }
    }

    fn snapshot(&self) -> Vec<Message> {
        self.prompt
            .iter()
            .map(|p| p.message.clone())
            .chain(self.messages.iter().cloned())
            .collect()
    }

    fn clear(&mut self) {
        self.messages.clear();
        if !self.prompt.as_ref().is_some_and(SeededPrompt::survives_clear) {
            self.prompt = None;
        }
    }

    fn len(&self) -> usize {
        self.messages.len() + usize::from(self.prompt.is_some())
    }
}
