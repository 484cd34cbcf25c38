//! Application-level chat operations.
//!
//! [`ChatCoordinator`] is what a UI talks to: send a message, regenerate or
//! edit a turn, stop a generation, and ask whether one is running. It owns
//! the generation registry and hands each request to the engine.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatloom::{ChatCoordinator, GenerationEvent, HttpTransport, SqliteStore};
//!
//! let store = Arc::new(SqliteStore::open_default()?);
//! let transport = Arc::new(HttpTransport::new("http://localhost:8080"));
//! let chat = ChatCoordinator::new(store, transport);
//!
//! // Start a new conversation
//! chat.send(None, None, "Hello!", Vec::new(), |event| {
//!     if let GenerationEvent::Finalized(id) = event {
//!         println!("now showing {id}");
//!     }
//! })
//! .await?;
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ChatConfig;
use crate::db::{
    Conversation, ConversationId, ConversationStore, ExportBundle, Message, MessageExtra,
    MessageId, PendingMessage, Role,
};
use crate::generation::{
    ChatError, CompletionTransport, GenerationEngine, GenerationEvent, GenerationRegistry,
    Notifier,
};
use crate::ids::{Clock, IdGenerator};

/// Characters of the first message used as a new conversation's name.
const NAME_PREFIX_CHARS: usize = 256;

/// A conversation with every message of every branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewingChat {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Front door for send / regenerate / stop.
pub struct ChatCoordinator {
    store: Arc<dyn ConversationStore>,
    engine: GenerationEngine,
    registry: GenerationRegistry,
    ids: IdGenerator,
    current: Mutex<Option<ConversationId>>,
}

impl ChatCoordinator {
    pub fn new(store: Arc<dyn ConversationStore>, transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            engine: GenerationEngine::new(store.clone(), transport),
            store,
            registry: GenerationRegistry::new(),
            ids: IdGenerator::default(),
            current: Mutex::new(None),
        }
    }

    /// Route failure alerts somewhere other than the log.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.engine = self.engine.with_notifier(notifier);
        self
    }

    /// Take message ids from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = IdGenerator::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// True iff a pending message exists for the conversation.
    pub fn is_generating(&self, conv_id: &str) -> bool {
        self.registry.is_generating(conv_id)
    }

    pub fn pending_message(&self, conv_id: &str) -> Option<PendingMessage> {
        self.registry.pending(conv_id)
    }

    pub fn current_conversation(&self) -> Option<ConversationId> {
        self.current.lock().clone()
    }

    pub fn set_current_conversation(&self, conv_id: Option<ConversationId>) {
        *self.current.lock() = conv_id;
    }

    /// The conversation and all of its messages, if it exists.
    pub fn viewing_chat(&self, conv_id: &str) -> Result<Option<ViewingChat>, ChatError> {
        let Some(conversation) = self.store.get_conversation(conv_id)? else {
            return Ok(None);
        };
        let messages = self.store.get_messages(conv_id)?;
        Ok(Some(ViewingChat {
            conversation,
            messages,
        }))
    }

    pub fn config(&self) -> Result<ChatConfig, ChatError> {
        Ok(self.store.get_config()?)
    }

    pub fn save_config(&self, config: &ChatConfig) -> Result<(), ChatError> {
        config.validate()?;
        self.store.set_config(config)?;
        Ok(())
    }

    pub fn export_all(&self) -> Result<ExportBundle, ChatError> {
        Ok(self.store.export_all()?)
    }

    pub fn import_all(&self, bundle: &ExportBundle) -> Result<(), ChatError> {
        Ok(self.store.import_all(bundle)?)
    }

    /// Remove a conversation, stopping any generation running in it.
    pub fn remove_conversation(&self, conv_id: &str) -> Result<(), ChatError> {
        self.registry.stop(conv_id);
        self.store.remove_conversation(conv_id)?;
        let mut current = self.current.lock();
        if current.as_deref() == Some(conv_id) {
            *current = None;
        }
        Ok(())
    }

    /// Send a user message and generate the reply.
    ///
    /// Without both a conversation and a leaf, a new conversation is
    /// created (named after the content), made current, and the message is
    /// placed under its root.
    /// Returns `Ok(false)` when the content is blank, when the conversation
    /// is already generating, or when the request failed (the notifier has
    /// already been told). Storage and integrity problems are `Err`.
    pub async fn send<F>(
        &self,
        conv_id: Option<&str>,
        leaf: Option<MessageId>,
        content: &str,
        extra: Vec<MessageExtra>,
        mut on_event: F,
    ) -> Result<bool, ChatError>
    where
        F: FnMut(GenerationEvent) + Send,
    {
        if content.trim().is_empty() {
            return Ok(false);
        }

        let (conv_id, leaf) = match (conv_id.filter(|id| !id.is_empty()), leaf) {
            (Some(id), Some(leaf)) => {
                if self.registry.is_generating(id) {
                    debug!(conv_id = id, "Send rejected; already generating");
                    return Ok(false);
                }
                let conversation = self
                    .store
                    .get_conversation(id)?
                    .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
                (conversation.id, leaf)
            }
            _ => {
                let name: String = content.chars().take(NAME_PREFIX_CHARS).collect();
                let conversation = self.store.create_conversation(&name, self.ids.next())?;
                info!(conv_id = %conversation.id, "Started conversation");
                self.set_current_conversation(Some(conversation.id.clone()));
                (conversation.id, conversation.curr_node)
            }
        };

        let user_id = self.ids.next();
        let pending = PendingMessage::new(self.ids.next(), &conv_id, user_id);
        let Some(mut guard) = self.registry.try_begin(&conv_id, pending.clone()) else {
            return Ok(false);
        };

        let user = Message::text(user_id, &conv_id, Role::User, content, leaf, extra);
        self.store.append_message(&user, leaf)?;
        on_event(GenerationEvent::Finalized(user_id));

        match self.engine.generate(&mut guard, pending, &mut on_event).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_generation_failure() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Clear pending state and abort the request. No-op when idle.
    pub fn stop_generating(&self, conv_id: &str) {
        self.registry.stop(conv_id);
    }

    /// Edit or regenerate below `parent_id`.
    ///
    /// With `content`, a new user message becomes a sibling branch under
    /// `parent_id` and the reply is generated below it. Without, a new
    /// assistant reply is generated directly under `parent_id`. Existing
    /// branches are kept. Does nothing if the conversation is generating.
    pub async fn replace_and_regenerate<F>(
        &self,
        conv_id: &str,
        parent_id: MessageId,
        content: Option<&str>,
        extra: Vec<MessageExtra>,
        mut on_event: F,
    ) -> Result<(), ChatError>
    where
        F: FnMut(GenerationEvent) + Send,
    {
        if self.registry.is_generating(conv_id) {
            debug!(conv_id, "Regenerate rejected; already generating");
            return Ok(());
        }

        let user_id = content.map(|_| self.ids.next());
        let target = user_id.unwrap_or(parent_id);
        let pending = PendingMessage::new(self.ids.next(), conv_id, target);
        let Some(mut guard) = self.registry.try_begin(conv_id, pending.clone()) else {
            return Ok(());
        };

        if let (Some(id), Some(text)) = (user_id, content) {
            let user = Message::text(id, conv_id, Role::User, text, parent_id, extra);
            self.store.append_message(&user, parent_id)?;
        }
        on_event(GenerationEvent::Finalized(target));

        self.engine
            .generate(&mut guard, pending, &mut on_event)
            .await
            .map(|_| ())
    }
}
