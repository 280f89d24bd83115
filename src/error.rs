//! Error taxonomy for a chat call.
//!
//! These errors never leave the crate's connection operations as-is: the
//! connection collapses them into an [`Outcome`](crate::outcome::Outcome)
//! using [`ChatError::kind`].

use reqwest::StatusCode;
use thiserror::Error;

use crate::memory::MemoryError;
use crate::outcome::{FailureKind, classify_status};

/// Maximum number of bytes of a server error body kept in a trace.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("content is null or empty")]
    EmptyContent,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("failed to record message: {0}")]
    Memory(#[from] MemoryError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("response body was empty")]
    EmptyBody,

    #[error("response contained no choices")]
    NoChoices,

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("malformed stream event: {0}")]
    MalformedChunk(String),
}

impl ChatError {
    /// Builds a status error, truncating the body so traces stay small.
    pub fn status(status: StatusCode, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("... [truncated]");
        }
        ChatError::Status { status, body }
    }

    /// Whether a caller-side retry can plausibly succeed.
    pub fn kind(&self) -> FailureKind {
        match self {
            ChatError::Cancelled | ChatError::Connect(_) => FailureKind::Retryable,
            ChatError::Memory(err) => err.kind(),
            ChatError::Status { status, .. } => {
                classify_status(*status).unwrap_or(FailureKind::Permanent)
            }
            ChatError::EmptyContent
            | ChatError::InvalidParameter(_)
            | ChatError::Encode(_)
            | ChatError::Transport(_)
            | ChatError::EmptyBody
            | ChatError::NoChoices
            | ChatError::Decode(_)
            | ChatError::MalformedChunk(_) => FailureKind::Permanent,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        // A body read that fails mid-response means the connection dropped
        // after the status line arrived.
        let transient = err.is_connect()
            || err.is_timeout()
            || err.is_request()
            || err.is_body()
            || (err.is_decode() && lost_connection(&err));
        if transient {
            ChatError::Connect(err.to_string())
        } else {
            ChatError::Transport(err.to_string())
        }
    }
}

/// Walks the source chain looking for a socket-level cause.
fn lost_connection(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return true;
        }
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>()
            && (hyper_err.is_incomplete_message()
                || hyper_err.is_closed()
                || hyper_err.is_canceled()
                || hyper_err.is_timeout())
        {
            return true;
        }
        if let Some(inner) = cause.downcast_ref::<reqwest::Error>()
            && (inner.is_body() || inner.is_connect() || inner.is_timeout())
        {
            return true;
        }
        source = cause.source();
    }
    false
}
