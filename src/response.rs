//! Response bodies and streamed chunks.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::transport::HttpReply;
use crate::types::{FunctionCall, Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    FunctionCall,
    ContentFilter,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Decoded body of a single-shot completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ResponseBody {
    /// Assistant messages in the order the server returned them.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.choices.iter().map(|c| &c.message)
    }

    /// Content of the first choice.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content())
    }
}

/// Fragment of a function call streamed across several chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Incremental piece of an assistant message. Every field may be absent; the
/// first chunk from some backends carries only the role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// One streamed unit of a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

impl ResponseChunk {
    /// Content delta of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }
}

impl FunctionCallDelta {
    pub(crate) fn merge_into(&self, call: &mut Option<FunctionCall>) {
        let call = call.get_or_insert_with(|| FunctionCall {
            name: String::new(),
            arguments: String::new(),
        });
        if let Some(name) = &self.name {
            call.name.push_str(name);
        }
        if let Some(arguments) = &self.arguments {
            call.arguments.push_str(arguments);
        }
    }
}

/// Validates a completed single-shot reply.
pub(crate) fn decode_reply(reply: HttpReply) -> Result<ResponseBody, ChatError> {
    if !reply.status.is_success() {
        return Err(ChatError::status(reply.status, reply.body));
    }
    if reply.body.trim().is_empty() {
        return Err(ChatError::EmptyBody);
    }

    let body: ResponseBody = serde_json::from_str(&reply.body).map_err(ChatError::Decode)?;
    if body.choices.is_empty() {
        return Err(ChatError::NoChoices);
    }
    Ok(body)
}
