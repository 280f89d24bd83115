//! Connection settings read from the environment.
//!
//! Recognised variables:
//!
//! - `PARLEY_API_KEY` (or `OPENAI_API_KEY`) - bearer token, required
//! - `PARLEY_ENDPOINT` - chat-completion URL override
//! - `PARLEY_MODEL` - default model, e.g. `gpt-4`
//! - `PARLEY_MEMORY_CAPACITY` - bounded history size; unset or `0` is unbounded
//! - `PARLEY_SYSTEM_PROMPT` - system prompt seeded into memory
//! - `PARLEY_CLEAR_POLICY` - `reseed` (default) or `empty`
//! - `PARLEY_CONNECT_TIMEOUT_SECS` - connect timeout for the shared pool

use anyhow::{Context, Result};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::connection::ChatConnection;
use crate::memory::{BoundedMemory, ChatMemory, ClearPolicy, UnboundedMemory};
use crate::model::Model;
use crate::transport::{DEFAULT_ENDPOINT, HttpTransport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no API key configured; set PARLEY_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,

    #[error("API key is empty")]
    EmptyApiKey,

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Opaque bearer token. Never printed.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ConfigError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(key))
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub api_key: ApiKey,
    pub endpoint: String,
    pub model: Model,
    pub memory_capacity: Option<NonZeroUsize>,
    pub system_prompt: Option<String>,
    pub clear_policy: ClearPolicy,
    pub connect_timeout: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: Model::default(),
            memory_capacity: None,
            system_prompt: None,
            clear_policy: ClearPolicy::Reseed,
            connect_timeout: None,
        }
    }

    /// Loads settings from the process environment, after a best-effort read
    /// of a `.env` file.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        let config = Self::from_lookup(|name| std::env::var(name).ok())?;
        info!(
            endpoint = %config.endpoint,
            model = %config.model,
            capacity = config.memory_capacity.map(NonZeroUsize::get),
            "loaded chat connection config"
        );
        Ok(config)
    }

    /// Loads settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_key = lookup("PARLEY_API_KEY")
            .or_else(|| lookup("OPENAI_API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;
        let mut config = Self::new(ApiKey::new(raw_key)?);

        if let Some(endpoint) = lookup("PARLEY_ENDPOINT").filter(|v| !v.trim().is_empty()) {
            config.endpoint = endpoint.trim().to_string();
        }

        if let Some(model) = lookup("PARLEY_MODEL") {
            config.model = model
                .parse::<Model>()
                .with_context(|| format!("PARLEY_MODEL={model}"))?;
        }

        if let Some(raw) = lookup("PARLEY_MEMORY_CAPACITY") {
            let capacity: usize = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "PARLEY_MEMORY_CAPACITY",
                value: raw.clone(),
            })?;
            config.memory_capacity = NonZeroUsize::new(capacity);
        }

        config.system_prompt = lookup("PARLEY_SYSTEM_PROMPT").filter(|p| !p.is_empty());

        if let Some(raw) = lookup("PARLEY_CLEAR_POLICY") {
            config.clear_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "reseed" => ClearPolicy::Reseed,
                "empty" => ClearPolicy::Empty,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "PARLEY_CLEAR_POLICY",
                        value: raw,
                    }
                    .into());
                }
            };
        }

        if let Some(raw) = lookup("PARLEY_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "PARLEY_CONNECT_TIMEOUT_SECS",
                value: raw.clone(),
            })?;
            config.connect_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Builds the conversation memory described by this config.
    pub fn build_memory(&self) -> Box<dyn ChatMemory> {
        match (self.memory_capacity, &self.system_prompt) {
            (Some(capacity), Some(prompt)) => Box::new(BoundedMemory::with_system_prompt(
                capacity,
                prompt.clone(),
                self.clear_policy,
            )),
            (Some(capacity), None) => Box::new(BoundedMemory::new(capacity)),
            (None, Some(prompt)) => Box::new(UnboundedMemory::with_system_prompt(
                prompt.clone(),
                self.clear_policy,
            )),
            (None, None) => Box::new(UnboundedMemory::new()),
        }
    }

    /// Builds a connection over `client`, the application's shared pool.
    pub fn connect(&self, client: reqwest::Client) -> ChatConnection {
        let transport =
            HttpTransport::new(client, self.api_key.clone()).with_endpoint(self.endpoint.clone());
        ChatConnection::new(Arc::new(transport), self.build_memory())
    }
}
