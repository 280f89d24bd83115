use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Chat models known to the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Model {
    #[default]
    Gpt35Turbo,
    Gpt35Turbo0613,
    Gpt35Turbo16k,
    Gpt35Turbo16k0613,
    Gpt4,
    Gpt4_0613,
    Gpt4_32k,
    Gpt4_32k0613,
}

// Reverse index, built from `Model::ALL` so both directions share one table.
static BY_NAME: Lazy<HashMap<&'static str, Model>> =
    Lazy::new(|| Model::ALL.iter().map(|m| (m.as_str(), *m)).collect());

impl Model {
    pub const ALL: [Model; 8] = [
        Model::Gpt35Turbo,
        Model::Gpt35Turbo0613,
        Model::Gpt35Turbo16k,
        Model::Gpt35Turbo16k0613,
        Model::Gpt4,
        Model::Gpt4_0613,
        Model::Gpt4_32k,
        Model::Gpt4_32k0613,
    ];

    /// Wire identifier sent in the `model` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Gpt35Turbo => "gpt-3.5-turbo",
            Model::Gpt35Turbo0613 => "gpt-3.5-turbo-0613",
            Model::Gpt35Turbo16k => "gpt-3.5-turbo-16k",
            Model::Gpt35Turbo16k0613 => "gpt-3.5-turbo-16k-0613",
            Model::Gpt4 => "gpt-4",
            Model::Gpt4_0613 => "gpt-4-0613",
            Model::Gpt4_32k => "gpt-4-32k",
            Model::Gpt4_32k0613 => "gpt-4-32k-0613",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown model identifier: {0}")]
pub struct ModelParseError(pub String);

impl FromStr for Model {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BY_NAME
            .get(s.trim())
            .copied()
            .ok_or_else(|| ModelParseError(s.to_string()))
    }
}

impl Serialize for Model {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Model {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
