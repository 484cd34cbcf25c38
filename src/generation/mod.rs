//! Streamed chat-completion generation.
//!
//! A generation moves through requested, streaming, and one of finalized,
//! cancelled, or failed. [`GenerationRegistry`] holds the per-conversation
//! pending message and abort handle; [`GenerationEngine`] does the work.

mod abort;
mod engine;
mod notifier;
mod registry;
mod request;
mod sse;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use engine::GenerationEngine;
pub use notifier::{LogNotifier, Notifier};
pub use registry::{GenerationGuard, GenerationRegistry};
pub use request::{build_api_messages, normalize_for_api, strip_thoughts, ApiMessage, CompletionRequest};
pub use sse::{SseDecoder, SseEvent};
pub use transport::{ChunkStream, CompletionTransport, HttpTransport, TransportError};
pub use types::{
    ChatError, ChunkChoice, ChunkDelta, ChunkError, CompletionChunk, GenerationEvent,
    GenerationOutcome,
};
