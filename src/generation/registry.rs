//! Per-conversation generation bookkeeping.
//!
//! Two maps, keyed by conversation id: the pending message being streamed
//! and the abort handle of its request. A conversation is generating iff it
//! has a pending entry. Every slot is tagged with the generation that owns
//! it so a stale task cannot clobber a newer one after a stop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::abort::{abort_pair, AbortHandle, AbortSignal};
use crate::db::{ConversationId, PendingMessage};

struct OwnedAbort {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct Slots {
    pending: HashMap<ConversationId, PendingMessage>,
    aborts: HashMap<ConversationId, OwnedAbort>,
}

impl Slots {
    fn owns(&self, conv_id: &str, generation: u64) -> bool {
        self.aborts
            .get(conv_id)
            .is_some_and(|a| a.generation == generation)
    }
}

/// Shared pending/abort maps.
#[derive(Clone, Default)]
pub struct GenerationRegistry {
    slots: Arc<Mutex<Slots>>,
    next_generation: Arc<AtomicU64>,
}

impl GenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_generating(&self, conv_id: &str) -> bool {
        self.slots.lock().pending.contains_key(conv_id)
    }

    /// Snapshot of the pending message, if one is streaming.
    pub fn pending(&self, conv_id: &str) -> Option<PendingMessage> {
        self.slots.lock().pending.get(conv_id).cloned()
    }

    /// Claim the conversation for a new generation.
    ///
    /// Returns `None` when a generation is already in flight. The check and
    /// the claim happen under one lock.
    pub fn try_begin(&self, conv_id: &str, pending: PendingMessage) -> Option<GenerationGuard> {
        let mut slots = self.slots.lock();
        if slots.pending.contains_key(conv_id) {
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (handle, signal) = abort_pair();
        slots.pending.insert(conv_id.to_string(), pending);
        slots
            .aborts
            .insert(conv_id.to_string(), OwnedAbort { generation, handle });
        drop(slots);

        debug!(conv_id, generation, "Generation slot claimed");
        Some(GenerationGuard {
            registry: self.clone(),
            conv_id: conv_id.to_string(),
            generation,
            signal,
            released: false,
        })
    }

    /// Clear pending state and abort the request. No-op when idle.
    pub fn stop(&self, conv_id: &str) {
        let aborted = {
            let mut slots = self.slots.lock();
            slots.pending.remove(conv_id);
            slots.aborts.remove(conv_id)
        };
        if let Some(owned) = aborted {
            debug!(conv_id, generation = owned.generation, "Generation stopped");
            owned.handle.abort();
        }
    }

    fn publish(&self, conv_id: &str, generation: u64, pending: PendingMessage) {
        let mut slots = self.slots.lock();
        if slots.owns(conv_id, generation) {
            slots.pending.insert(conv_id.to_string(), pending);
        }
    }

    fn release(&self, conv_id: &str, generation: u64) {
        let mut slots = self.slots.lock();
        if slots.owns(conv_id, generation) {
            slots.pending.remove(conv_id);
            slots.aborts.remove(conv_id);
        }
    }
}

/// Exclusive claim on one conversation's generation slot.
///
/// Dropping the guard releases the slot unless it was already taken over.
pub struct GenerationGuard {
    registry: GenerationRegistry,
    conv_id: ConversationId,
    generation: u64,
    signal: AbortSignal,
    released: bool,
}

impl GenerationGuard {
    pub fn conv_id(&self) -> &str {
        &self.conv_id
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Replace the visible pending message. Ignored after a stop.
    pub fn publish(&self, pending: PendingMessage) {
        if self.released || self.is_aborted() {
            return;
        }
        self.registry
            .publish(&self.conv_id, self.generation, pending);
    }

    /// Give the slot back.
    pub fn release(&mut self) {
        if !self.released {
            self.registry.release(&self.conv_id, self.generation);
            self.released = true;
        }
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.release();
    }
}
