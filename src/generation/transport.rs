//! Network boundary: open a streamed chat completion.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::request::CompletionRequest;
use super::sse::{SseDecoder, SseEvent};
use super::types::CompletionChunk;

const COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("Invalid chunk: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Decoded chunks of one response, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<CompletionChunk, TransportError>>;

/// Something that can open a completion stream.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn open(&self, request: &CompletionRequest) -> Result<ChunkStream, TransportError>;
}

/// HTTP transport for a llama.cpp-compatible server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, COMPLETIONS_PATH)
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn open(&self, request: &CompletionRequest) -> Result<ChunkStream, TransportError> {
        let mut builder = self.client.post(self.endpoint()).json(&request.body);
        if let Some(key) = &request.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(
            endpoint = %self.endpoint(),
            messages = request.message_count(),
            "Opening completion stream"
        );
        let response = builder.send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.json::<Value>().await.ok();
            return Err(TransportError::Server {
                status: status.as_u16(),
                message: error_message(body.as_ref()),
            });
        }

        Ok(decode_chunks(response.bytes_stream()).boxed())
    }
}

/// `error.message` of a JSON error body, or a generic fallback.
fn error_message(body: Option<&Value>) -> String {
    body.and_then(|b| b["error"]["message"].as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or("Unknown error")
        .to_string()
}

fn decode_chunks<S, B>(bytes: S) -> impl Stream<Item = Result<CompletionChunk, TransportError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::new();
        while let Some(read) = bytes.next().await {
            let read = read?;
            for event in decoder.feed(read.as_ref()) {
                yield decode_event(event)?;
            }
        }
        if let Some(event) = decoder.finish() {
            yield decode_event(event)?;
        }
    }
}

fn decode_event(event: SseEvent) -> Result<CompletionChunk, TransportError> {
    match event {
        SseEvent::Data(json) => Ok(serde_json::from_str(&json)?),
        SseEvent::Error(payload) => {
            // `error: {"message": ...}`; anything else is passed through raw.
            let message = serde_json::from_str::<Value>(&payload)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or(payload);
            Ok(CompletionChunk::error(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use futures::TryStreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(config: &ChatConfig) -> CompletionRequest {
        CompletionRequest::new(config, Vec::new()).unwrap()
    }

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
    }

    // =========================================================================
    // Streaming Tests
    // =========================================================================

    #[tokio::test]
    async fn test_streams_chunks_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(sse(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: [DONE]\n\n",
            )))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(format!("{}/", server.uri()));
        let stream = transport.open(&request(&ChatConfig::default())).await.unwrap();
        let chunks: Vec<CompletionChunk> = stream.try_collect().await.unwrap();

        let text: Vec<_> = chunks.iter().filter_map(|c| c.content()).collect();
        assert_eq!(text, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_sends_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer sk-1"))
            .respond_with(sse("data: {\"choices\":[]}\n\n"))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ChatConfig::default();
        config.api_key = "sk-1".into();
        let transport = HttpTransport::new(server.uri());
        let stream = transport.open(&request(&config)).await.unwrap();

        assert_eq!(stream.try_collect::<Vec<_>>().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_line_becomes_error_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse("error: {\"message\":\"slot unavailable\"}\n\n"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri());
        let chunks: Vec<CompletionChunk> = transport
            .open(&request(&ChatConfig::default()))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            chunks[0].error.as_ref().unwrap().message_or_default(),
            "slot unavailable"
        );
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse("data: {not json}\n\n"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri());
        let result: Result<Vec<CompletionChunk>, _> = transport
            .open(&request(&ChatConfig::default()))
            .await
            .unwrap()
            .try_collect()
            .await;

        assert!(matches!(result, Err(TransportError::Decode(_))));
    }

    // =========================================================================
    // Status Tests
    // =========================================================================

    #[tokio::test]
    async fn test_non_200_reports_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"error": {"message": "overloaded"}})),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri());
        let err = transport
            .open(&request(&ChatConfig::default()))
            .await
            .err()
            .unwrap();

        match err {
            TransportError::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_error_body_is_unknown_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri());
        let err = transport
            .open(&request(&ChatConfig::default()))
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            TransportError::Server { status: 502, ref message } if message == "Unknown error"
        ));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:8080/");
        assert_eq!(transport.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
