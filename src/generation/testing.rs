//! In-memory fakes shared by the engine and coordinator tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::notifier::Notifier;
use super::request::CompletionRequest;
use super::transport::{ChunkStream, CompletionTransport, TransportError};
use super::types::{ChunkChoice, ChunkDelta, CompletionChunk};

/// A content-only chunk.
pub fn chunk(content: &str) -> CompletionChunk {
    CompletionChunk {
        choices: vec![ChunkChoice {
            delta: ChunkDelta {
                content: Some(content.to_string()),
            },
        }],
        ..CompletionChunk::default()
    }
}

/// What one call to `open` produces.
pub enum Script {
    /// Yield these chunks, then end.
    Chunks(Vec<CompletionChunk>),
    /// Fail with a non-200 status and message.
    Status(u16, String),
    /// Yield these chunks, then stall until cancelled.
    Hang(Vec<CompletionChunk>),
    /// Yield these chunks, then end once the gate fires or is dropped.
    Gated(Vec<CompletionChunk>, oneshot::Receiver<()>),
}

/// Plays back one script per request, recording each request.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn open(&self, request: &CompletionRequest) -> Result<ChunkStream, TransportError> {
        self.requests.lock().push(request.clone());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Chunks(Vec::new()));

        match script {
            Script::Chunks(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Script::Status(status, message) => Err(TransportError::Server { status, message }),
            Script::Hang(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Script::Gated(chunks, gate) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(
                    stream::once(gate)
                        .filter_map(|_| async { None::<Result<CompletionChunk, TransportError>> }),
                )
                .boxed()),
        }
    }
}

/// Remembers every alert.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, message: &str) {
        self.alerts.lock().push(message.to_string());
    }
}
