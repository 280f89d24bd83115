//! HTTP seam between the connection and the chat-completion endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

use crate::config::ApiKey;
use crate::error::ChatError;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// A completed exchange: status plus the full body text.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: String,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// Result of opening a streamed exchange.
pub enum StreamReply {
    /// The server accepted the request; the body arrives incrementally.
    Open(ByteStream),
    /// The server answered with a non-success status.
    Rejected(HttpReply),
}

/// Sends serialized requests.
///
/// Implementations only move bytes. Classification, cancellation and memory
/// bookkeeping happen in [`ChatConnection`](crate::connection::ChatConnection).
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, body: String) -> Result<HttpReply, ChatError>;

    async fn open_stream(&self, body: String) -> Result<StreamReply, ChatError>;
}

/// Builds the pooled client shared by every connection of an application.
///
/// Build it once at startup and clone it; clones share the pool.
pub fn build_http_client(connect_timeout: Option<Duration>) -> Result<Client, ChatError> {
    let mut builder = Client::builder().pool_idle_timeout(POOL_IDLE_TIMEOUT);
    if let Some(timeout) = connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    builder.build().map_err(ChatError::from)
}

/// [`ChatTransport`] over `reqwest`, authenticating with a bearer token.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: ApiKey,
}

impl HttpTransport {
    pub fn new(client: Client, api_key: ApiKey) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post(&self, body: String) -> RequestBuilder {
        self.client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, body: String) -> Result<HttpReply, ChatError> {
        let response = self.post(body).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }

    async fn open_stream(&self, body: String) -> Result<StreamReply, ChatError> {
        let response = self
            .post(body)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(StreamReply::Rejected(HttpReply { status, body }));
        }

        let bytes = response
            .bytes_stream()
            .map(|item| item.map_err(ChatError::from))
            .boxed();
        Ok(StreamReply::Open(bytes))
    }
}
