//! Line framing for the server-sent event stream.
//!
//! Network reads do not respect line boundaries, so bytes are buffered until
//! a newline arrives. Only `data:` and `error:` fields matter to us.

/// One meaningful line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// JSON payload of a `data:` line.
    Data(String),
    /// Payload of an `error:` line.
    Error(String),
}

const DONE: &str = "[DONE]";

/// Incremental SSE line decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the events completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(&['\n', '\r'][..]);

    if let Some(data) = field(line, "data") {
        if data == DONE || data.is_empty() {
            return None;
        }
        return Some(SseEvent::Data(data.to_string()));
    }
    field(line, "error").map(|payload| SseEvent::Error(payload.to_string()))
}

// `name:value` or `name: value`
fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
