//! SQLite-backed conversation persistence.
//!
//! This repository encapsulates all SQL operations for:
//! - Creating conversations together with their root message (`conversations`, `messages`)
//! - Appending messages under a parent while keeping `children` consistent
//! - Whole-conversation deletion and bulk export/import

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use std::str::FromStr;

use super::schema::{Conversation, ConversationExport, Message, MessageId};
use super::{Database, StoreError};

const MESSAGE_COLUMNS: &str =
    "id, conv_id, type, role, content, parent, children, extra, timings, timestamp";

/// Conversation persistence operations.
pub struct ConversationRepository<'a> {
    db: &'a Database,
}

impl<'a> ConversationRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a conversation and its root message.
    ///
    /// The conversation id is `conv-{now}` and the root message id is `now`.
    pub fn create_conversation(&self, name: &str, now: i64) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: format!("conv-{}", now),
            name: name.to_string(),
            curr_node: now,
            last_modified: now,
        };
        let root = Message::root(now, &conversation.id);

        self.in_transaction(|| {
            self.insert_conversation(&conversation)?;
            self.insert_message(&root)?;
            Ok(())
        })?;

        Ok(conversation)
    }

    /// Get one conversation by id.
    pub fn get_conversation(&self, conv_id: &str) -> Result<Option<Conversation>, StoreError> {
        let conversation = self
            .db
            .conn()
            .query_row(
                "SELECT id, name, curr_node, last_modified FROM conversations WHERE id = ?",
                [conv_id],
                conversation_from_row,
            )
            .optional()?;
        Ok(conversation)
    }

    /// List all conversations, most recently modified first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, name, curr_node, last_modified
             FROM conversations
             ORDER BY last_modified DESC, id DESC",
        )?;
        let rows = stmt.query_map([], conversation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Get every message of a conversation (all branches), ordered by id.
    pub fn get_messages(&self, conv_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut stmt = self.db.conn().prepare(&format!(
            "SELECT {} FROM messages WHERE conv_id = ? ORDER BY id",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map([conv_id], message_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Append `message` as the last child of `parent_id`.
    ///
    /// The parent's `children` list, the new row, and the conversation's
    /// `curr_node`/`last_modified` are written in one transaction.
    pub fn append_message(&self, message: &Message, parent_id: MessageId) -> Result<(), StoreError> {
        let conv_id = message.conv_id.as_str();

        self.in_transaction(|| {
            if self.get_conversation(conv_id)?.is_none() {
                return Err(StoreError::ConversationNotFound(conv_id.to_string()));
            }

            let parent_children: Option<String> = self
                .db
                .conn()
                .query_row(
                    "SELECT children FROM messages WHERE conv_id = ? AND id = ?",
                    rusqlite::params![conv_id, parent_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(parent_children) = parent_children else {
                return Err(StoreError::ParentNotFound {
                    conv_id: conv_id.to_string(),
                    parent_id,
                });
            };

            let mut children: Vec<MessageId> = serde_json::from_str(&parent_children)?;
            children.push(message.id);
            self.db.conn().execute(
                "UPDATE messages SET children = ? WHERE id = ?",
                rusqlite::params![serde_json::to_string(&children)?, parent_id],
            )?;

            let mut stored = message.clone();
            stored.parent = parent_id;
            self.insert_message(&stored)?;

            self.db.conn().execute(
                "UPDATE conversations SET curr_node = ?, last_modified = ? WHERE id = ?",
                rusqlite::params![message.id, Utc::now().timestamp_millis(), conv_id],
            )?;

            Ok(())
        })
    }

    /// Record the leaf the user is looking at.
    pub fn set_current_node(&self, conv_id: &str, node_id: MessageId) -> Result<(), StoreError> {
        let updated = self.db.conn().execute(
            "UPDATE conversations SET curr_node = ? WHERE id = ?",
            rusqlite::params![node_id, conv_id],
        )?;
        if updated == 0 {
            return Err(StoreError::ConversationNotFound(conv_id.to_string()));
        }
        Ok(())
    }

    /// Delete a conversation and its messages (CASCADE handles messages).
    pub fn delete_conversation(&self, conv_id: &str) -> Result<(), StoreError> {
        self.db
            .conn()
            .execute("DELETE FROM conversations WHERE id = ?", [conv_id])?;
        Ok(())
    }

    /// Dump every conversation with all of its messages.
    pub fn export_all(&self) -> Result<Vec<ConversationExport>, StoreError> {
        self.list_conversations()?
            .into_iter()
            .map(|conversation| {
                let messages = self.get_messages(&conversation.id)?;
                Ok(ConversationExport {
                    conversation,
                    messages,
                })
            })
            .collect()
    }

    /// Load one exported conversation, replacing any conversation with the same id.
    pub fn import_conversation(&self, export: &ConversationExport) -> Result<(), StoreError> {
        self.in_transaction(|| {
            self.delete_conversation(&export.conversation.id)?;
            self.insert_conversation(&export.conversation)?;
            for message in &export.messages {
                let mut stored = message.clone();
                stored.conv_id = export.conversation.id.clone();
                self.insert_message(&stored)?;
            }
            Ok(())
        })
    }

    fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.db.conn().execute(
            "INSERT INTO conversations (id, name, curr_node, last_modified) VALUES (?, ?, ?, ?)",
            rusqlite::params![
                conversation.id,
                conversation.name,
                conversation.curr_node,
                conversation.last_modified
            ],
        )?;
        Ok(())
    }

    fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let timings = message
            .timings
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.db.conn().execute(
            &format!(
                "INSERT INTO messages ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                MESSAGE_COLUMNS
            ),
            rusqlite::params![
                message.id,
                message.conv_id,
                message.msg_type.as_str(),
                message.role.as_str(),
                message.content,
                message.parent,
                serde_json::to_string(&message.children)?,
                serde_json::to_string(&message.extra)?,
                timings,
                message.timestamp,
            ],
        )?;
        Ok(())
    }

    fn in_transaction<T>(&self, f: impl FnOnce() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let conn = self.db.conn();
        conn.execute_batch("BEGIN")?;

        match f() {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        name: row.get(1)?,
        curr_node: row.get(2)?,
        last_modified: row.get(3)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let msg_type: String = row.get(2)?;
    let role: String = row.get(3)?;
    let children: String = row.get(6)?;
    let extra: String = row.get(7)?;
    let timings: Option<String> = row.get(8)?;

    Ok(Message {
        id: row.get(0)?,
        conv_id: row.get(1)?,
        msg_type: parse_column(2, &msg_type)?,
        role: parse_column(3, &role)?,
        content: row.get(4)?,
        parent: row.get(5)?,
        children: json_column(6, &children)?,
        extra: json_column(7, &extra)?,
        timings: timings.as_deref().map(|raw| json_column(8, raw)).transpose()?,
        timestamp: row.get(9)?,
    })
}

fn parse_column<T: FromStr<Err = String>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
