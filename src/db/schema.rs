//! Database schema types.
//!
//! A conversation owns a tree of [`Message`]s rooted at one synthetic root
//! node. Tree edges are stored as ids (`parent`, `children`), never as
//! references, so rows can be reloaded independently.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Message identifier (millisecond timestamp derived, strictly increasing).
pub type MessageId = i64;

/// Conversation identifier (`conv-{millis}`).
pub type ConversationId = String;

/// Parent id stored on the root message.
pub const ROOT_PARENT: MessageId = -1;

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Node kind: the synthetic root or a regular text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Root,
    Text,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Root => "root",
            MessageType::Text => "text",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(MessageType::Root),
            "text" => Ok(MessageType::Text),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

/// Side-channel attachment carried with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageExtra {
    /// Text pasted or uploaded as extra context for the turn.
    Context { name: String, content: String },
}

/// Token-rate telemetry reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub prompt_n: i64,
    pub prompt_ms: f64,
    pub predicted_n: i64,
    pub predicted_ms: f64,
}

/// A stored, finalized message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conv_id: ConversationId,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub role: Role,
    pub content: String,
    pub parent: MessageId,
    #[serde(default)]
    pub children: Vec<MessageId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<MessageExtra>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
    pub timestamp: i64,
}

impl Message {
    /// Build a new text message with no children.
    pub fn text(
        id: MessageId,
        conv_id: &str,
        role: Role,
        content: impl Into<String>,
        parent: MessageId,
        extra: Vec<MessageExtra>,
    ) -> Self {
        Self {
            id,
            conv_id: conv_id.to_string(),
            msg_type: MessageType::Text,
            role,
            content: content.into(),
            parent,
            children: Vec::new(),
            extra,
            timings: None,
            timestamp: id,
        }
    }

    /// Build the synthetic root node of a conversation.
    pub fn root(id: MessageId, conv_id: &str) -> Self {
        Self {
            id,
            conv_id: conv_id.to_string(),
            msg_type: MessageType::Root,
            role: Role::System,
            content: String::new(),
            parent: ROOT_PARENT,
            children: Vec::new(),
            extra: Vec::new(),
            timings: None,
            timestamp: id,
        }
    }

    pub fn is_root(&self) -> bool {
        self.msg_type == MessageType::Root
    }
}

/// A stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub name: String,
    /// Last viewed leaf.
    pub curr_node: MessageId,
    pub last_modified: i64,
}

/// Assistant message being filled by a streaming response.
///
/// Lives only in memory; `content` stays `None` until the first content
/// chunk arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub id: MessageId,
    pub conv_id: ConversationId,
    pub parent: MessageId,
    pub content: Option<String>,
    pub timings: Option<Timings>,
    pub timestamp: i64,
}

impl PendingMessage {
    pub fn new(id: MessageId, conv_id: &str, parent: MessageId) -> Self {
        Self {
            id,
            conv_id: conv_id.to_string(),
            parent,
            content: None,
            timings: None,
            timestamp: id,
        }
    }

    /// Append streamed text. Empty deltas leave `content` untouched.
    pub fn push_content(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.content.get_or_insert_with(String::new).push_str(delta);
    }

    /// Convert into a storable message, or `None` if nothing was received.
    pub fn into_message(self) -> Option<Message> {
        let content = self.content?;
        Some(Message {
            id: self.id,
            conv_id: self.conv_id,
            msg_type: MessageType::Text,
            role: Role::Assistant,
            content,
            parent: self.parent,
            children: Vec::new(),
            extra: Vec::new(),
            timings: self.timings,
            timestamp: self.timestamp,
        })
    }
}

/// One conversation with every message of every branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationExport {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Full dump of the conversation store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExportBundle {
    pub conversations: Vec<ConversationExport>,
}
