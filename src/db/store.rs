//! The persistent store seen by the generation engine and coordinator.
//!
//! [`ConversationStore`] is the narrow collaborator contract; [`SqliteStore`]
//! implements it over [`Database`] and publishes a change notification after
//! every mutation.

use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::debug;

use super::conversation_repository::ConversationRepository;
use super::schema::{Conversation, ExportBundle, Message, MessageId};
use super::{Database, StoreError};
use crate::config::{ChatConfig, Settings};
use crate::messaging::{ChangeBus, ChangeKind, ChangeReceiver};

/// Persistence for configuration, conversations, and messages.
pub trait ConversationStore: Send + Sync {
    /// Load the current configuration snapshot.
    fn get_config(&self) -> Result<ChatConfig, StoreError>;

    /// Validate and persist the configuration.
    fn set_config(&self, config: &ChatConfig) -> Result<(), StoreError>;

    /// Create a conversation with its root message (id `now`).
    fn create_conversation(&self, name: &str, now: i64) -> Result<Conversation, StoreError>;

    /// Fetch one conversation.
    fn get_conversation(&self, conv_id: &str) -> Result<Option<Conversation>, StoreError>;

    /// All conversations, most recently modified first.
    fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    /// Every message of the conversation, across all branches.
    fn get_messages(&self, conv_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Append `message` as the newest child of `parent_id`.
    fn append_message(&self, message: &Message, parent_id: MessageId) -> Result<(), StoreError>;

    /// Remember which leaf the user is viewing.
    fn set_current_node(&self, conv_id: &str, node_id: MessageId) -> Result<(), StoreError>;

    /// Delete a conversation and all of its messages.
    fn remove_conversation(&self, conv_id: &str) -> Result<(), StoreError>;

    /// Dump everything.
    fn export_all(&self) -> Result<ExportBundle, StoreError>;

    /// Load a dump, replacing conversations that share an id.
    fn import_all(&self, bundle: &ExportBundle) -> Result<(), StoreError>;

    /// Listen for change notifications.
    fn subscribe(&self) -> ChangeReceiver;
}

/// SQLite implementation of [`ConversationStore`].
pub struct SqliteStore {
    db: Mutex<Database>,
    changes: ChangeBus,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`.
    pub fn open_at(path: PathBuf) -> Result<Self, StoreError> {
        let db = Database::open_at(path)?;
        Self::from_database(db)
    }

    /// Open (and migrate) the database at the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        let db = Database::open()?;
        Self::from_database(db)
    }

    /// Private in-memory store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::open_in_memory()?;
        Self::from_database(db)
    }

    /// Wrap an open database, running migrations first.
    pub fn from_database(db: Database) -> Result<Self, StoreError> {
        db.migrate()?;
        Ok(Self {
            db: Mutex::new(db),
            changes: ChangeBus::new(),
        })
    }

    /// The bus change notifications are published on.
    pub fn changes(&self) -> &ChangeBus {
        &self.changes
    }
}

impl ConversationStore for SqliteStore {
    fn get_config(&self) -> Result<ChatConfig, StoreError> {
        let db = self.db.lock();
        Ok(Settings::new(&db).chat_config()?)
    }

    fn set_config(&self, config: &ChatConfig) -> Result<(), StoreError> {
        let db = self.db.lock();
        Settings::new(&db).save_chat_config(config)?;
        Ok(())
    }

    fn create_conversation(&self, name: &str, now: i64) -> Result<Conversation, StoreError> {
        let conversation = {
            let db = self.db.lock();
            ConversationRepository::new(&db).create_conversation(name, now)?
        };
        debug!(conv_id = %conversation.id, "Created conversation");
        self.changes.notify(&conversation.id, ChangeKind::Created);
        Ok(conversation)
    }

    fn get_conversation(&self, conv_id: &str) -> Result<Option<Conversation>, StoreError> {
        let db = self.db.lock();
        ConversationRepository::new(&db).get_conversation(conv_id)
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let db = self.db.lock();
        ConversationRepository::new(&db).list_conversations()
    }

    fn get_messages(&self, conv_id: &str) -> Result<Vec<Message>, StoreError> {
        let db = self.db.lock();
        ConversationRepository::new(&db).get_messages(conv_id)
    }

    fn append_message(&self, message: &Message, parent_id: MessageId) -> Result<(), StoreError> {
        {
            let db = self.db.lock();
            ConversationRepository::new(&db).append_message(message, parent_id)?;
        }
        debug!(
            conv_id = %message.conv_id,
            message_id = message.id,
            parent_id,
            role = %message.role,
            "Appended message"
        );
        self.changes
            .notify(&message.conv_id, ChangeKind::MessageAppended);
        Ok(())
    }

    fn set_current_node(&self, conv_id: &str, node_id: MessageId) -> Result<(), StoreError> {
        {
            let db = self.db.lock();
            ConversationRepository::new(&db).set_current_node(conv_id, node_id)?;
        }
        self.changes.notify(conv_id, ChangeKind::CurrentNodeChanged);
        Ok(())
    }

    fn remove_conversation(&self, conv_id: &str) -> Result<(), StoreError> {
        {
            let db = self.db.lock();
            ConversationRepository::new(&db).delete_conversation(conv_id)?;
        }
        debug!(conv_id, "Removed conversation");
        self.changes.notify(conv_id, ChangeKind::Removed);
        Ok(())
    }

    fn export_all(&self) -> Result<ExportBundle, StoreError> {
        let db = self.db.lock();
        let conversations = ConversationRepository::new(&db).export_all()?;
        Ok(ExportBundle { conversations })
    }

    fn import_all(&self, bundle: &ExportBundle) -> Result<(), StoreError> {
        {
            let db = self.db.lock();
            let repo = ConversationRepository::new(&db);
            for export in &bundle.conversations {
                repo.import_conversation(export)?;
            }
        }
        for export in &bundle.conversations {
            self.changes
                .notify(&export.conversation.id, ChangeKind::Imported);
        }
        debug!(count = bundle.conversations.len(), "Imported conversations");
        Ok(())
    }

    fn subscribe(&self) -> ChangeReceiver {
        self.changes.subscribe()
    }
}
