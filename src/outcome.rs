//! Three-way result of a chat operation and the rules that produce it.

use reqwest::StatusCode;

use crate::error::ChatError;

/// Result of a connection operation.
///
/// Failures carry a human-readable trace. Only `RetryableFailure` is worth
/// retrying; the connection itself never retries.
#[derive(Debug)]
#[must_use]
pub enum Outcome<T> {
    Success(T),
    RetryableFailure(String),
    PermanentFailure(String),
}

/// How a failed attempt should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Permanent,
}

/// Classifies an HTTP status. `None` means the status is a success.
pub fn classify_status(status: StatusCode) -> Option<FailureKind> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(FailureKind::Retryable)
    } else {
        Some(FailureKind::Permanent)
    }
}

impl<T> Outcome<T> {
    pub fn failure(kind: FailureKind, trace: impl Into<String>) -> Self {
        match kind {
            FailureKind::Retryable => Outcome::RetryableFailure(trace.into()),
            FailureKind::Permanent => Outcome::PermanentFailure(trace.into()),
        }
    }

    /// Converts an error raised by `operation`, prefixing the trace with it.
    pub fn from_error(operation: &str, err: &ChatError) -> Self {
        Self::failure(err.kind(), format!("{operation}: {err}"))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::RetryableFailure(_))
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Outcome::PermanentFailure(_))
    }

    /// The failure kind, or `None` on success.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::RetryableFailure(_) => Some(FailureKind::Retryable),
            Outcome::PermanentFailure(_) => Some(FailureKind::Permanent),
        }
    }

    pub fn trace(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::RetryableFailure(trace) | Outcome::PermanentFailure(trace) => Some(trace),
        }
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::RetryableFailure(trace) => Outcome::RetryableFailure(trace),
            Outcome::PermanentFailure(trace) => Outcome::PermanentFailure(trace),
        }
    }

    /// Splits into a `Result`, keeping the failure kind next to the trace.
    pub fn into_result(self) -> Result<T, (FailureKind, String)> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::RetryableFailure(trace) => Err((FailureKind::Retryable, trace)),
            Outcome::PermanentFailure(trace) => Err((FailureKind::Permanent, trace)),
        }
    }
}

impl<T> From<ChatError> for Outcome<T> {
    fn from(err: ChatError) -> Self {
        Self::failure(err.kind(), err.to_string())
    }
}

impl<T> From<Result<T, ChatError>> for Outcome<T> {
    fn from(result: Result<T, ChatError>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => err.into(),
        }
    }
}
