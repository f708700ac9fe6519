//! Wire types shared by the content API and its clients
//!
//! Covers the JSON response envelope, change notifications and the
//! server-sent-events framing used by `/events`.

use serde::{Deserialize, Serialize};

use crate::content::{Collection, Entry};

/// SSE event name for change notifications
pub const CONTENT_UPDATED: &str = "content_updated";

/// SSE event name sent once when a stream opens
pub const READY: &str = "ready";

/// Response envelope for every API route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Body returned by create and update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation<T> {
    pub entry: Entry<T>,
    pub version: u64,
}

/// Body returned by delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deletion {
    pub id: String,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
}

/// Change notification fanned out to every open event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEvent {
    pub version: u64,

    /// Collection the change applies to
    #[serde(rename = "type")]
    pub collection: Collection,

    pub action: EventAction,

    pub id: String,
}

impl ContentEvent {
    pub fn new(
        collection: Collection,
        action: EventAction,
        id: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            version,
            collection,
            action,
            id: id.into(),
        }
    }
}

/// Payload of the `ready` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEvent {
    pub version: u64,
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Typed view of the frames sent on `/events`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Ready(ReadyEvent),
    ContentUpdated(ContentEvent),
}

impl ServerEvent {
    /// Decode a frame; unknown event names and bad payloads yield `None`
    pub fn from_frame(frame: &SseFrame) -> Option<Self> {
        match frame.event.as_deref() {
            Some(READY) => serde_json::from_str(&frame.data).ok().map(ServerEvent::Ready),
            Some(CONTENT_UPDATED) | None => serde_json::from_str(&frame.data)
                .ok()
                .map(ServerEvent::ContentUpdated),
            Some(_) => None,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            ServerEvent::Ready(ready) => ready.version,
            ServerEvent::ContentUpdated(event) => event.version,
        }
    }
}

/// Incremental parser for a `text/event-stream` body
///
/// Bytes are buffered until a blank line terminates a frame, so chunks may
/// split lines or multi-byte characters anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = find_frame_end(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw[..end])) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        // Comment lines carry keep-alives
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }

    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}
