//! Shared generation types: errors, events, outcomes, wire chunks.

use serde::Deserialize;
use thiserror::Error;

use super::transport::TransportError;
use crate::config::ConfigError;
use crate::db::{MessageId, StoreError, Timings};

/// Errors surfaced by send / regenerate.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The server rejected the request or reported an error mid-stream.
    #[error("{0}")]
    Server(String),
    #[error("Transport error: {0}")]
    Transport(TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Conversation {0} does not exist")]
    ConversationNotFound(String),
    #[error("Message {message_id} not found in conversation {conv_id}")]
    MessageNotFound {
        conv_id: String,
        message_id: MessageId,
    },
}

impl ChatError {
    /// True for failures of the request itself, as opposed to local
    /// storage or integrity problems.
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            ChatError::Server(_) | ChatError::Transport(_) | ChatError::Config(_)
        )
    }
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Server { message, .. } => ChatError::Server(message),
            other => ChatError::Transport(other),
        }
    }
}

/// Notification delivered to the caller while a generation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationEvent {
    /// The pending message changed; still streaming.
    Progress,
    /// A message was persisted and is the new leaf to show.
    Finalized(MessageId),
}

/// How a generation that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Finalized(MessageId),
    /// The stream ended without content; nothing was stored.
    Empty,
    /// Stopped by the user; nothing was stored.
    Cancelled,
}

/// One decoded stream event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompletionChunk {
    pub choices: Vec<ChunkChoice>,
    pub timings: Option<Timings>,
    pub error: Option<ChunkError>,
}

impl CompletionChunk {
    /// Incremental content of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }

    /// A chunk carrying only an error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(ChunkError {
                message: Some(message.into()),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChunkDelta {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChunkError {
    pub message: Option<String>,
}

impl ChunkError {
    pub fn message_or_default(&self) -> String {
        self.message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}
