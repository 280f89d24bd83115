//! Resilient chat-completion connection
//!
//! Sends a conversation to a chat-completion HTTP API and reports every call as
//! a three-way [`Outcome`]: success, a failure worth retrying, or a failure that
//! retrying cannot fix. The conversation itself lives in a [`ChatMemory`],
//! either unbounded or a fixed-capacity FIFO.
//!
//! # Architecture
//!
//! - `types` / `model` - messages, roles and the model name table
//! - `memory` - conversation history stores
//! - `request` / `response` - wire payloads
//! - `outcome` / `error` - failure taxonomy and classification
//! - `transport` - the HTTP seam, backed by a shared `reqwest` pool
//! - `stream` - server-sent event decoding for streamed replies
//! - `connection` - orchestration of a single call
//! - `config` - environment-driven setup
//!
//! # Usage
//!
//! ```rust,no_run
//! use parley::{ChatParameters, ConnectionConfig, Outcome, build_http_client};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConnectionConfig::from_env()?;
//! let client = build_http_client(config.connect_timeout)?;
//! let mut connection = config.connect(client);
//!
//! let cancel = CancellationToken::new();
//! match connection
//!     .complete_chat("Hello!", &cancel, config.model, &ChatParameters::new())
//!     .await
//! {
//!     Outcome::Success(body) => println!("{}", body.first_content().unwrap_or_default()),
//!     Outcome::RetryableFailure(trace) => eprintln!("try again later: {trace}"),
//!     Outcome::PermanentFailure(trace) => eprintln!("giving up: {trace}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod model;
pub mod outcome;
pub mod request;
pub mod response;
pub mod stream;
pub mod transport;
pub mod types;

pub use config::{ApiKey, ConfigError, ConnectionConfig};
pub use connection::ChatConnection;
pub use error::ChatError;
pub use memory::{BoundedMemory, ChatMemory, ClearPolicy, MemoryError, UnboundedMemory};
pub use model::{Model, ModelParseError};
pub use outcome::{FailureKind, Outcome, classify_status};
pub use request::{
    ChatParameters, ChatRequest, FunctionCallMode, FunctionDeclaration, serialize_request,
};
pub use response::{
    Choice, ChunkChoice, Delta, FinishReason, FunctionCallDelta, ResponseBody, ResponseChunk,
    Usage,
};
pub use stream::{
    ChunkStream, MAX_EVENT_BYTES, SseDecoder, StreamAccumulator, StreamEvent, parse_event,
};
pub use transport::{
    ByteStream, ChatTransport, DEFAULT_ENDPOINT, HttpReply, HttpTransport, StreamReply,
    build_http_client,
};
pub use types::{FunctionCall, Message, Role};
