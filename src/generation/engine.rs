//! Drives one streamed completion from request to stored message.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::notifier::{LogNotifier, Notifier};
use super::registry::GenerationGuard;
use super::request::{build_api_messages, CompletionRequest};
use super::transport::CompletionTransport;
use super::types::{ChatError, GenerationEvent, GenerationOutcome};
use crate::config::ChatConfig;
use crate::db::{ConversationStore, MessageId, PendingMessage};
use crate::tree::ConversationTree;

/// Runs generations against a store and a transport.
#[derive(Clone)]
pub struct GenerationEngine {
    store: Arc<dyn ConversationStore>,
    transport: Arc<dyn CompletionTransport>,
    notifier: Arc<dyn Notifier>,
}

impl GenerationEngine {
    pub fn new(store: Arc<dyn ConversationStore>, transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            store,
            transport,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Generate an assistant reply under `pending.parent`.
    ///
    /// The caller holds `guard` for the conversation. Request failures are
    /// alerted through the notifier before being returned; cancellation is
    /// not an error.
    pub async fn generate(
        &self,
        guard: &mut GenerationGuard,
        pending: PendingMessage,
        on_event: &mut (dyn FnMut(GenerationEvent) + Send),
    ) -> Result<GenerationOutcome, ChatError> {
        let conv_id = pending.conv_id.clone();
        let leaf = pending.parent;
        debug!(conv_id = %conv_id, leaf, pending_id = pending.id, "Generation requested");

        match self.run(guard, pending, on_event).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                guard.release();
                if err.is_generation_failure() {
                    error!(conv_id = %conv_id, leaf, error = %err, "Generation failed");
                    self.notifier.alert(&err.to_string());
                } else {
                    error!(conv_id = %conv_id, leaf, error = %err, "Generation aborted by storage error");
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        guard: &mut GenerationGuard,
        mut pending: PendingMessage,
        on_event: &mut (dyn FnMut(GenerationEvent) + Send),
    ) -> Result<GenerationOutcome, ChatError> {
        let leaf = pending.parent;
        let (config, request) = self.prepare(&pending.conv_id, leaf)?;
        let signal = guard.signal();

        let mut stream = tokio::select! {
            biased;
            _ = signal.aborted() => return Ok(cancelled(guard, &pending)),
            opened = self.transport.open(&request) => opened?,
        };
        debug!(conv_id = %pending.conv_id, "Streaming");

        loop {
            let next = tokio::select! {
                biased;
                _ = signal.aborted() => return Ok(cancelled(guard, &pending)),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            if let Some(err) = &chunk.error {
                return Err(ChatError::Server(err.message_or_default()));
            }
            if let Some(delta) = chunk.content() {
                pending.push_content(delta);
            }
            if config.show_tokens_per_second {
                if let Some(timings) = chunk.timings {
                    pending.timings = Some(timings);
                }
            }

            guard.publish(pending.clone());
            on_event(GenerationEvent::Progress);
        }

        if guard.is_aborted() {
            return Ok(cancelled(guard, &pending));
        }
        self.finalize(guard, pending, on_event)
    }

    /// Config snapshot and request for the path ending at `leaf`.
    fn prepare(
        &self,
        conv_id: &str,
        leaf: MessageId,
    ) -> Result<(ChatConfig, CompletionRequest), ChatError> {
        let config = self.store.get_config()?;
        if self.store.get_conversation(conv_id)?.is_none() {
            return Err(ChatError::ConversationNotFound(conv_id.to_string()));
        }

        let messages = self.store.get_messages(conv_id)?;
        let tree = ConversationTree::new(&messages);
        if !tree.is_reachable(leaf) {
            return Err(ChatError::MessageNotFound {
                conv_id: conv_id.to_string(),
                message_id: leaf,
            });
        }

        let path = tree.path_to(Some(leaf));
        let request = CompletionRequest::new(&config, build_api_messages(&config, &path))?;
        Ok((config, request))
    }

    fn finalize(
        &self,
        guard: &mut GenerationGuard,
        pending: PendingMessage,
        on_event: &mut (dyn FnMut(GenerationEvent) + Send),
    ) -> Result<GenerationOutcome, ChatError> {
        let conv_id = pending.conv_id.clone();
        let leaf = pending.parent;

        let Some(message) = pending.into_message() else {
            guard.release();
            warn!(conv_id = %conv_id, leaf, "Stream ended without content; nothing stored");
            return Ok(GenerationOutcome::Empty);
        };

        let id = message.id;
        self.store.append_message(&message, leaf)?;
        guard.release();
        info!(conv_id = %conv_id, message_id = id, parent_id = leaf, "Generation finalized");

        on_event(GenerationEvent::Finalized(id));
        Ok(GenerationOutcome::Finalized(id))
    }
}

fn cancelled(guard: &mut GenerationGuard, pending: &PendingMessage) -> GenerationOutcome {
    guard.release();
    info!(
        conv_id = %pending.conv_id,
        pending_id = pending.id,
        had_content = pending.content.is_some(),
        "Generation cancelled; partial content discarded"
    );
    GenerationOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Message, Role, SqliteStore, Timings};
    use crate::generation::registry::GenerationRegistry;
    use crate::generation::testing::{chunk, RecordingNotifier, Script, ScriptedTransport};
    use crate::generation::types::CompletionChunk;

    struct Fixture {
        store: Arc<SqliteStore>,
        transport: Arc<ScriptedTransport>,
        notifier: Arc<RecordingNotifier>,
        registry: GenerationRegistry,
        engine: GenerationEngine,
        conv_id: String,
    }

    /// root(0) -> 1 user "Hi" -> 2 assistant "Hello"
    fn fixture(scripts: Vec<Script>) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let conv = store.create_conversation("test", 0).unwrap();
        store
            .append_message(&Message::text(1, &conv.id, Role::User, "Hi", 0, Vec::new()), 0)
            .unwrap();
        store
            .append_message(
                &Message::text(2, &conv.id, Role::Assistant, "Hello", 1, Vec::new()),
                1,
            )
            .unwrap();

        let transport = Arc::new(ScriptedTransport::new(scripts));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = GenerationEngine::new(store.clone(), transport.clone())
            .with_notifier(notifier.clone());
        Fixture {
            store,
            transport,
            notifier,
            registry: GenerationRegistry::new(),
            engine,
            conv_id: conv.id,
        }
    }

    async fn run(
        f: &Fixture,
        leaf: MessageId,
    ) -> (Result<GenerationOutcome, ChatError>, Vec<GenerationEvent>) {
        let pending = PendingMessage::new(10, &f.conv_id, leaf);
        let mut guard = f.registry.try_begin(&f.conv_id, pending.clone()).unwrap();
        let mut events = Vec::new();
        let mut on_event = |e: GenerationEvent| events.push(e);
        let result = f.engine.generate(&mut guard, pending, &mut on_event).await;
        (result, events)
    }

    // =========================================================================
    // Finalization Tests
    // =========================================================================

    #[tokio::test]
    async fn test_chunks_accumulate_into_one_message() {
        let f = fixture(vec![Script::Chunks(vec![chunk("Hel"), chunk("lo")])]);

        let (result, events) = run(&f, 2).await;

        assert_eq!(result.unwrap(), GenerationOutcome::Finalized(10));
        assert_eq!(
            events,
            vec![
                GenerationEvent::Progress,
                GenerationEvent::Progress,
                GenerationEvent::Finalized(10)
            ]
        );
        let messages = f.store.get_messages(&f.conv_id).unwrap();
        let reply = messages.iter().find(|m| m.id == 10).unwrap();
        assert_eq!(reply.content, "Hello");
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.parent, 2);
        assert!(!f.registry.is_generating(&f.conv_id));
    }

    #[tokio::test]
    async fn test_request_contains_path_to_leaf() {
        let f = fixture(vec![Script::Chunks(vec![chunk("ok")])]);

        run(&f, 1).await.0.unwrap();

        let request = f.transport.last_request().unwrap();
        let messages = request.body["messages"].as_array().unwrap();
        // System message plus "Hi"; "Hello" is below the leaf.
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"], "Hi");
    }

    #[tokio::test]
    async fn test_empty_stream_stores_nothing() {
        let f = fixture(vec![Script::Chunks(vec![CompletionChunk::default()])]);

        let (result, events) = run(&f, 2).await;

        assert_eq!(result.unwrap(), GenerationOutcome::Empty);
        assert_eq!(events, vec![GenerationEvent::Progress]);
        assert_eq!(f.store.get_messages(&f.conv_id).unwrap().len(), 3);
        assert!(!f.registry.is_generating(&f.conv_id));
    }

    #[tokio::test]
    async fn test_timings_kept_only_when_enabled() {
        let timings = Timings {
            prompt_n: 1,
            prompt_ms: 2.0,
            predicted_n: 3,
            predicted_ms: 4.0,
        };
        let mut with_timings = chunk("x");
        with_timings.timings = Some(timings);

        let f = fixture(vec![Script::Chunks(vec![with_timings.clone()])]);
        run(&f, 2).await.0.unwrap();
        let stored = f.store.get_messages(&f.conv_id).unwrap();
        assert_eq!(stored.iter().find(|m| m.id == 10).unwrap().timings, None);

        let f = fixture(vec![Script::Chunks(vec![with_timings])]);
        let mut config = f.store.get_config().unwrap();
        config.show_tokens_per_second = true;
        f.store.set_config(&config).unwrap();
        run(&f, 2).await.0.unwrap();
        let stored = f.store.get_messages(&f.conv_id).unwrap();
        assert_eq!(stored.iter().find(|m| m.id == 10).unwrap().timings, Some(timings));
    }

    // =========================================================================
    // Failure Tests
    // =========================================================================

    #[tokio::test]
    async fn test_server_status_is_alerted_and_returned() {
        let f = fixture(vec![Script::Status(500, "overloaded".into())]);

        let (result, events) = run(&f, 2).await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "overloaded");
        assert_eq!(f.notifier.alerts(), vec!["overloaded".to_string()]);
        assert!(events.is_empty());
        assert!(!f.registry.is_generating(&f.conv_id));
    }

    #[tokio::test]
    async fn test_error_chunk_discards_partial_content() {
        let f = fixture(vec![Script::Chunks(vec![
            chunk("partial"),
            CompletionChunk::error("context overflow"),
        ])]);

        let (result, _) = run(&f, 2).await;

        assert!(matches!(result, Err(ChatError::Server(ref m)) if m == "context overflow"));
        assert_eq!(f.store.get_messages(&f.conv_id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_leaf_is_integrity_error_without_alert() {
        let f = fixture(Vec::new());

        let (result, _) = run(&f, 99).await;

        assert!(matches!(
            result,
            Err(ChatError::MessageNotFound { message_id: 99, .. })
        ));
        assert!(f.notifier.alerts().is_empty());
        assert_eq!(f.transport.request_count(), 0);
    }

    // =========================================================================
    // Cancellation Tests
    // =========================================================================

    #[tokio::test]
    async fn test_stop_mid_stream_persists_nothing() {
        let f = fixture(vec![Script::Hang(vec![chunk("Hel")])]);
        let pending = PendingMessage::new(10, &f.conv_id, 2);
        let mut guard = f.registry.try_begin(&f.conv_id, pending.clone()).unwrap();
        let mut on_event = |_: GenerationEvent| {};

        let generate = f.engine.generate(&mut guard, pending, &mut on_event);
        let stop = async {
            while f
                .registry
                .pending(&f.conv_id)
                .and_then(|p| p.content)
                .is_none()
            {
                tokio::task::yield_now().await;
            }
            f.registry.stop(&f.conv_id);
        };
        let (result, ()) = tokio::join!(generate, stop);

        assert_eq!(result.unwrap(), GenerationOutcome::Cancelled);
        assert_eq!(f.store.get_messages(&f.conv_id).unwrap().len(), 3);
        assert!(f.notifier.alerts().is_empty());
        assert!(!f.registry.is_generating(&f.conv_id));
    }

    #[tokio::test]
    async fn test_stop_before_open_never_requests() {
        let f = fixture(vec![Script::Chunks(vec![chunk("x")])]);
        let pending = PendingMessage::new(10, &f.conv_id, 2);
        let mut guard = f.registry.try_begin(&f.conv_id, pending.clone()).unwrap();
        f.registry.stop(&f.conv_id);

        let result = f.engine.generate(&mut guard, pending, &mut |_: GenerationEvent| {}).await;

        assert_eq!(result.unwrap(), GenerationOutcome::Cancelled);
        assert_eq!(f.transport.request_count(), 0);
    }
}
