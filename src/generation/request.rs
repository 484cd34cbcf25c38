//! Request shaping: tree path to wire messages, configuration to body.

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{ChatConfig, ConfigError};
use crate::db::{Message, MessageExtra, Role};

const THINK_CLOSE: &str = "</think>";

/// One message in the `messages` array of the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
}

/// Wire shape of a stored message; context attachments go first.
pub fn normalize_for_api(message: &Message) -> ApiMessage {
    let mut content = String::new();
    for extra in &message.extra {
        match extra {
            MessageExtra::Context { content: ctx, .. } if !ctx.is_empty() => {
                content.push_str(ctx);
                content.push_str("\n\n");
            }
            MessageExtra::Context { .. } => {}
        }
    }
    content.push_str(&message.content);
    ApiMessage {
        role: message.role,
        content,
    }
}

/// Drop reasoning segments: keep what follows the last `</think>`.
pub fn strip_thoughts(content: &str) -> String {
    match content.rfind(THINK_CLOSE) {
        Some(pos) => content[pos + THINK_CLOSE.len()..].trim().to_string(),
        None => content.to_string(),
    }
}

/// The `messages` array for a path, prefixed by the system message.
pub fn build_api_messages(config: &ChatConfig, path: &[&Message]) -> Vec<ApiMessage> {
    let system = (!config.system_message.is_empty()).then(|| ApiMessage {
        role: Role::System,
        content: config.system_message.clone(),
    });

    system
        .into_iter()
        .chain(path.iter().map(|m| normalize_for_api(m)))
        .map(|mut message| {
            if config.exclude_thought_on_req {
                message.content = strip_thoughts(&message.content);
            }
            message
        })
        .collect()
}

/// A fully shaped completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub body: Value,
    pub api_key: Option<String>,
}

impl CompletionRequest {
    /// Build the streaming request body. Custom overrides win on collision.
    pub fn new(config: &ChatConfig, messages: Vec<ApiMessage>) -> Result<Self, ConfigError> {
        let mut body = json!({
            "messages": messages,
            "stream": true,
            "cache_prompt": true,
            "samplers": config.samplers,
            "temperature": config.temperature,
            "dynatemp_range": config.dynatemp_range,
            "dynatemp_exponent": config.dynatemp_exponent,
            "top_k": config.top_k,
            "top_p": config.top_p,
            "min_p": config.min_p,
            "typical_p": config.typical_p,
            "xtc_probability": config.xtc_probability,
            "xtc_threshold": config.xtc_threshold,
            "repeat_last_n": config.repeat_last_n,
            "repeat_penalty": config.repeat_penalty,
            "presence_penalty": config.presence_penalty,
            "frequency_penalty": config.frequency_penalty,
            "dry_multiplier": config.dry_multiplier,
            "dry_base": config.dry_base,
            "dry_allowed_length": config.dry_allowed_length,
            "dry_penalty_last_n": config.dry_penalty_last_n,
            "max_tokens": config.max_tokens,
            "timings_per_token": config.show_tokens_per_second,
        });

        if let Value::Object(map) = &mut body {
            map.extend(config.custom_params()?);
        }

        Ok(Self {
            body,
            api_key: config.api_key().map(str::to_string),
        })
    }

    pub fn message_count(&self) -> usize {
        self.body["messages"].as_array().map_or(0, Vec::len)
    }
}
