//! Typed chat configuration.
//!
//! The configuration is persisted as a single JSON object. Keys keep the
//! names the web client has always used (`apiKey`, `systemMessage`,
//! `top_k`, ...) so exported settings stay interchangeable. Missing keys
//! take their defaults; a key holding the wrong JSON type is rejected when
//! the blob is loaded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("Custom parameters must be a JSON object: {0}")]
    InvalidCustom(String),
}

/// Settings consumed by the generation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "systemMessage")]
    pub system_message: String,
    #[serde(rename = "showTokensPerSecond")]
    pub show_tokens_per_second: bool,
    #[serde(rename = "showThoughtInProgress")]
    pub show_thought_in_progress: bool,
    #[serde(rename = "excludeThoughtOnReq")]
    pub exclude_thought_on_req: bool,

    // Sampling. Defaults track the server's own defaults.
    pub samplers: String,
    pub temperature: f64,
    pub dynatemp_range: f64,
    pub dynatemp_exponent: f64,
    pub top_k: i64,
    pub top_p: f64,
    pub min_p: f64,
    pub xtc_probability: f64,
    pub xtc_threshold: f64,
    pub typical_p: f64,

    // Penalties.
    pub repeat_last_n: i64,
    pub repeat_penalty: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub dry_multiplier: f64,
    pub dry_base: f64,
    pub dry_allowed_length: i64,
    pub dry_penalty_last_n: i64,

    pub max_tokens: i64,
    /// Raw JSON object merged over the request parameters.
    pub custom: String,

    // experimental
    #[serde(rename = "pyIntepreterEnabled")]
    pub py_interpreter_enabled: bool,
    #[serde(rename = "questionIdeas")]
    pub question_ideas: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            system_message: "You are a helpful assistant.".to_string(),
            show_tokens_per_second: false,
            show_thought_in_progress: false,
            exclude_thought_on_req: true,
            samplers: "edkypmxt".to_string(),
            temperature: 0.8,
            dynatemp_range: 0.0,
            dynatemp_exponent: 1.0,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.05,
            xtc_probability: 0.0,
            xtc_threshold: 0.1,
            typical_p: 1.0,
            repeat_last_n: 64,
            repeat_penalty: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            dry_multiplier: 0.0,
            dry_base: 1.75,
            dry_allowed_length: 2,
            dry_penalty_last_n: -1,
            max_tokens: -1,
            custom: String::new(),
            py_interpreter_enabled: false,
            question_ideas: vec![String::new()],
        }
    }
}

impl ChatConfig {
    /// Parse a stored configuration blob and validate it.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to the stored blob format.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.custom_params().map(|_| ())
    }

    /// The API key, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty()).then_some(key)
    }

    /// Parse `custom` into request parameter overrides.
    ///
    /// An empty (or whitespace-only) string means no overrides.
    pub fn custom_params(&self) -> Result<Map<String, Value>, ConfigError> {
        if self.custom.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&self.custom) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ConfigError::InvalidCustom(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(ConfigError::InvalidCustom(e.to_string())),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Defaults ====================

    #[test]
    fn defaults_match_server_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.system_message, "You are a helpful assistant.");
        assert!(config.exclude_thought_on_req);
        assert_eq!(config.top_k, 40);
        assert_eq!(config.dry_penalty_last_n, -1);
        assert_eq!(config.max_tokens, -1);
        assert_eq!(config.samplers, "edkypmxt");
    }

    // ==================== Loading ====================

    #[test]
    fn missing_keys_take_defaults() {
        let config = ChatConfig::from_json(r#"{"temperature": 0.2}"#).unwrap();
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.system_message, "You are a helpful assistant.");
    }

    #[test]
    fn uses_web_client_key_names() {
        let config = ChatConfig::from_json(
            r#"{"apiKey": "sk-1", "systemMessage": "", "showTokensPerSecond": true}"#,
        )
        .unwrap();
        assert_eq!(config.api_key(), Some("sk-1"));
        assert_eq!(config.system_message, "");
        assert!(config.show_tokens_per_second);
    }

    #[test]
    fn wrong_type_is_rejected_at_load() {
        let err = ChatConfig::from_json(r#"{"top_k": "forty"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = ChatConfig::from_json(r#"{"theme": "dark"}"#).unwrap();
        assert_eq!(config, ChatConfig::default());
    }

    #[test]
    fn serialized_blob_loads_back() {
        let mut config = ChatConfig::default();
        config.custom = r#"{"seed": 1}"#.to_string();
        let raw = config.to_json().unwrap();
        assert_eq!(ChatConfig::from_json(&raw).unwrap(), config);
    }

    // ==================== Custom params ====================

    #[test]
    fn empty_custom_yields_no_overrides() {
        let mut config = ChatConfig::default();
        config.custom = "   ".to_string();
        assert!(config.custom_params().unwrap().is_empty());
    }

    #[test]
    fn custom_object_is_parsed() {
        let mut config = ChatConfig::default();
        config.custom = r#"{"temperature": 0.1, "seed": 42}"#.to_string();
        let params = config.custom_params().unwrap();
        assert_eq!(params["seed"], 42);
    }

    #[test]
    fn custom_array_is_rejected() {
        let mut config = ChatConfig::default();
        config.custom = "[1, 2]".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn custom_malformed_json_is_rejected() {
        let mut config = ChatConfig::default();
        config.custom = "{not json".to_string();
        assert!(matches!(
            config.custom_params(),
            Err(ConfigError::InvalidCustom(_))
        ));
    }

    #[test]
    fn blank_api_key_is_none() {
        let mut config = ChatConfig::default();
        config.api_key = "  ".to_string();
        assert_eq!(config.api_key(), None);
    }
}
