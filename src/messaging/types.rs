//! Change notifications published by the conversation store.

use serde::{Deserialize, Serialize};

use crate::db::ConversationId;

/// What happened to a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    MessageAppended,
    CurrentNodeChanged,
    Removed,
    Imported,
}

/// Fired after every mutating store operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationChange {
    pub conv_id: ConversationId,
    pub kind: ChangeKind,
}

impl ConversationChange {
    pub fn new(conv_id: impl Into<ConversationId>, kind: ChangeKind) -> Self {
        Self {
            conv_id: conv_id.into(),
            kind,
        }
    }
}
