//! Chatloom Library
//!
//! Client-side state engine for chatting with a llama.cpp-style inference
//! server: a branching message tree per conversation, streamed generation
//! with cancellation, and local SQLite persistence.
//!
//! ## Main Components
//!
//! - [`db`] - SQLite store for configuration, conversations, and messages
//! - [`config`] - Typed chat configuration and settings access
//! - [`messaging`] - Change notifications fired by the store
//! - [`tree`] - Path derivation and branch navigation over a message tree
//! - [`ids`] - Monotonic, timestamp-derived message ids
//! - [`generation`] - Request shaping, SSE transport, and the generation engine
//! - [`coordinator`] - Send, regenerate, edit, and stop operations
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatloom::{ChatCoordinator, HttpTransport, SqliteStore};
//!
//! let store = Arc::new(SqliteStore::open_default()?);
//! let chat = ChatCoordinator::new(store, Arc::new(HttpTransport::new("http://localhost:8080")));
//! chat.send(None, None, "Hello!", Vec::new(), |_| {}).await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod db;
pub mod generation;
pub mod ids;
pub mod logging;
pub mod messaging;
pub mod tree;

// Re-export commonly used types
pub use config::{ChatConfig, ConfigError, Settings};
pub use coordinator::{ChatCoordinator, ViewingChat};
pub use db::{
    Conversation, ConversationStore, Database, ExportBundle, Message, MessageExtra, MessageId,
    PendingMessage, Role, SqliteStore, StoreError,
};
pub use generation::{
    ChatError, CompletionTransport, GenerationEngine, GenerationEvent, GenerationOutcome,
    GenerationRegistry, HttpTransport, LogNotifier, Notifier, TransportError,
};
pub use ids::{Clock, IdGenerator, SystemClock};
pub use messaging::{ChangeBus, ChangeKind, ChangeReceiver, ConversationChange};
pub use tree::{BranchInfo, ConversationTree, NOT_FOUND};
