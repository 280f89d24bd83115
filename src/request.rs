//! Request payload for the chat-completion endpoint.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ChatError;
use crate::model::Model;
use crate::outcome::Outcome;
use crate::types::Message;

/// The API accepts at most this many stop sequences.
const MAX_STOP_SEQUENCES: usize = 4;

/// A function the model may ask the caller to invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// Controls whether and how the model calls functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionCallMode {
    None,
    Auto,
    /// Force a call to the named function.
    Named(String),
}

impl Serialize for FunctionCallMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FunctionCallMode::None => serializer.serialize_str("none"),
            FunctionCallMode::Auto => serializer.serialize_str("auto"),
            FunctionCallMode::Named(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("name", name)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for FunctionCallMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Mode(String),
            Named { name: String },
        }

        match Raw::deserialize(deserializer)? {
            Raw::Mode(mode) => match mode.as_str() {
                "none" => Ok(FunctionCallMode::None),
                "auto" => Ok(FunctionCallMode::Auto),
                other => Err(de::Error::unknown_variant(other, &["none", "auto"])),
            },
            Raw::Named { name } => Ok(FunctionCallMode::Named(name)),
        }
    }
}

/// Optional tuning knobs. Anything left `None` is omitted from the payload so
/// the API applies its own default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Number of choices to sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Token id to bias in [-100, 100].
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "token_id_keys"
    )]
    pub logit_bias: Option<BTreeMap<u32, i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDeclaration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallMode>,
}

impl ChatParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_n(mut self, n: u32) -> Self {
        self.n = Some(n);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn with_frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn with_logit_bias(mut self, bias: BTreeMap<u32, i32>) -> Self {
        self.logit_bias = Some(bias);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_functions(mut self, functions: Vec<FunctionDeclaration>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn with_function_call(mut self, mode: FunctionCallMode) -> Self {
        self.function_call = Some(mode);
        self
    }

    /// Checks every set value against the ranges the API documents.
    pub fn validate(&self) -> Result<(), ChatError> {
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;

        if self.n == Some(0) {
            return Err(ChatError::InvalidParameter("n must be at least 1".into()));
        }
        if self.max_tokens == Some(0) {
            return Err(ChatError::InvalidParameter(
                "max_tokens must be at least 1".into(),
            ));
        }
        if let Some(stop) = &self.stop
            && stop.len() > MAX_STOP_SEQUENCES
        {
            return Err(ChatError::InvalidParameter(format!(
                "at most {MAX_STOP_SEQUENCES} stop sequences are allowed, got {}",
                stop.len()
            )));
        }
        if let Some(bias) = &self.logit_bias
            && let Some((token, value)) = bias.iter().find(|(_, v)| !(-100..=100).contains(*v))
        {
            return Err(ChatError::InvalidParameter(format!(
                "logit_bias for token {token} is {value}, expected -100..=100"
            )));
        }
        Ok(())
    }
}

// JSON object keys are always strings; token ids arrive as "50256".
fn token_id_keys<'de, D>(deserializer: D) -> Result<Option<BTreeMap<u32, i32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<BTreeMap<String, i32>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let mut bias = BTreeMap::new();
    for (token, value) in raw {
        let id = token
            .parse::<u32>()
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&token), &"a token id"))?;
        bias.insert(id, value);
    }
    Ok(Some(bias))
}

fn check_range(name: &str, value: Option<f32>, min: f32, max: f32) -> Result<(), ChatError> {
    match value {
        Some(v) if !v.is_finite() || v < min || v > max => Err(ChatError::InvalidParameter(
            format!("{name} is {v}, expected {min}..={max}"),
        )),
        _ => Ok(()),
    }
}

/// Snapshot of everything sent in one call.
///
/// The messages are owned, so later changes to the conversation memory do not
/// affect a request that has already been built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: Model,
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub parameters: ChatParameters,
}

impl ChatRequest {
    pub fn build(model: Model, messages: Vec<Message>, parameters: &ChatParameters) -> Self {
        Self {
            model,
            messages,
            parameters: parameters.clone(),
        }
    }

    /// Forces the `stream` flag: `true` for a streamed call, omitted otherwise.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.parameters.stream = stream.then_some(true);
        self
    }

    pub(crate) fn to_json(&self) -> Result<String, ChatError> {
        self.parameters.validate()?;
        serde_json::to_string(self).map_err(ChatError::Encode)
    }
}

/// Encodes a request for the wire.
pub fn serialize_request(request: &ChatRequest) -> Outcome<String> {
    request.to_json().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("be brief"),
            Message::user("hello"),
            Message::assistant("hi"),
            Message::user("how are you?"),
        ]
    }

    #[test]
    fn unset_parameters_are_omitted() {
        let request = ChatRequest::build(Model::Gpt35Turbo, vec![Message::user("hi")], &ChatParameters::new());
        let json = serialize_request(&request).success().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(
            value,
            json!({
                "model": "gpt-3.5-turbo",
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[test]
    fn set_parameters_use_wire_names() {
        let params = ChatParameters::new()
            .with_temperature(0.5)
            .with_max_tokens(64)
            .with_stop(vec!["\n".into()])
            .with_logit_bias(BTreeMap::from([(50256, -100)]))
            .with_function_call(FunctionCallMode::Named("lookup".into()));
        let request = ChatRequest::build(Model::Gpt4, vec![Message::user("hi")], &params);
        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();

        assert_eq!(value["temperature"], json!(0.5));
        assert_eq!(value["max_tokens"], json!(64));
        assert_eq!(value["stop"], json!(["\n"]));
        assert_eq!(value["logit_bias"], json!({"50256": -100}));
        assert_eq!(value["function_call"], json!({"name": "lookup"}));
        assert!(value.get("top_p").is_none());
        assert!(value.get("stream").is_none());
    }

    #[test]
    fn streaming_flag_is_forced() {
        let params = ChatParameters {
            stream: Some(true),
            ..ChatParameters::default()
        };
        let single = ChatRequest::build(Model::Gpt4, conversation(), &params).streaming(false);
        assert_eq!(single.parameters.stream, None);

        let streamed = ChatRequest::build(Model::Gpt4, conversation(), &ChatParameters::new()).streaming(true);
        let value: Value = serde_json::from_str(&streamed.to_json().unwrap()).unwrap();
        assert_eq!(value["stream"], json!(true));
    }

    #[test]
    fn request_round_trips_model_and_messages() {
        let params = ChatParameters::new()
            .with_top_p(0.9)
            .with_user("tester")
            .with_logit_bias(BTreeMap::from([(50256, -100), (1734, 5)]));
        for model in Model::ALL {
            let request = ChatRequest::build(model, conversation(), &params);
            let json = serialize_request(&request).success().unwrap();
            let decoded: ChatRequest = serde_json::from_str(&json).unwrap();

            assert_eq!(decoded.model, model);
            assert_eq!(decoded.messages, conversation());
            assert_eq!(decoded.parameters, params);
        }
    }

    #[test]
    fn logit_bias_keys_must_be_token_ids() {
        let err = serde_json::from_value::<ChatRequest>(json!({
            "model": "gpt-4",
            "messages": [],
            "logit_bias": {"hello": 1}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("token id"), "{err}");
    }

    #[test]
    fn built_request_is_independent_of_its_source() {
        let mut messages = conversation();
        let request = ChatRequest::build(Model::Gpt4, messages.clone(), &ChatParameters::new());
        messages.push(Message::user("later"));
        assert_eq!(request.messages.len(), 4);
    }

    #[test]
    fn out_of_range_values_are_permanent_failures() {
        let bad = [
            ChatParameters::new().with_temperature(2.5),
            ChatParameters::new().with_top_p(f32::NAN),
            ChatParameters::new().with_presence_penalty(-3.0),
            ChatParameters::new().with_n(0),
            ChatParameters::new().with_max_tokens(0),
            ChatParameters::new().with_stop(vec!["a".into(); 5]),
            ChatParameters::new().with_logit_bias(BTreeMap::from([(1, 101)])),
        ];
        for params in bad {
            let request = ChatRequest::build(Model::Gpt4, conversation(), &params);
            let outcome = serialize_request(&request);
            assert!(outcome.is_permanent(), "{params:?}");
        }
    }

    #[test]
    fn function_call_mode_decodes_both_shapes() {
        let auto: FunctionCallMode = serde_json::from_value(json!("auto")).unwrap();
        let named: FunctionCallMode = serde_json::from_value(json!({"name": "f"})).unwrap();
        assert_eq!(auto, FunctionCallMode::Auto);
        assert_eq!(named, FunctionCallMode::Named("f".into()));
        assert!(serde_json::from_value::<FunctionCallMode>(json!("sometimes")).is_err());
    }
}
