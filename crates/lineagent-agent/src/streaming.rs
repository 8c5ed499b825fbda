//! Streaming support for agent runtime responses
//!
//! The runtime emits Server-Sent Events whose `data:` payloads are either
//! Bedrock Converse stream events wrapped in `{"event": {...}}`, raw agent
//! event reprs (ignored), or the `[DONE]` terminator. Decoded events are
//! numbered into [`StreamChunk`]s so consumers can enforce emission order.

use crate::error::{AgentError, Result};
use futures::{future, stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, warn};

/// Payload of one stream chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChunkKind {
    /// Incremental reply text
    Text(String),
    /// The agent started using a tool
    ToolUse { name: String },
    /// A content block finished
    BlockStop,
    /// End-of-stream marker
    End,
}

/// One ordered fragment of agent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Position in emission order, starting at zero
    pub seq: u64,
    pub kind: ChunkKind,
}

impl StreamChunk {
    pub fn new(seq: u64, kind: ChunkKind) -> Self {
        Self { seq, kind }
    }

    pub fn text(seq: u64, text: impl Into<String>) -> Self {
        Self::new(seq, ChunkKind::Text(text.into()))
    }

    pub fn end(seq: u64) -> Self {
        Self::new(seq, ChunkKind::End)
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, ChunkKind::End)
    }
}

/// Decoded `data:` payload of a runtime SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Text(String),
    ToolUse(String),
    BlockStop,
    Done,
    Error(String),
    /// Lifecycle events, raw agent reprs and anything unrecognized
    Ignored,
}

impl RuntimeEvent {
    /// Decode one SSE data payload
    pub fn decode(data: &str) -> Self {
        let data = data.trim();
        if data.is_empty() {
            return Self::Ignored;
        }
        if data == "[DONE]" {
            return Self::Done;
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, data = %preview(data), "Failed to parse runtime event");
                return Self::Ignored;
            }
        };

        // Raw agent event reprs arrive as JSON strings and duplicate the structured events
        let Some(object) = value.as_object() else {
            return Self::Ignored;
        };

        if let Some(error) = object.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Self::Error(message);
        }

        let Some(inner) = object.get("event").and_then(Value::as_object) else {
            return Self::Ignored;
        };

        if let Some(delta) = inner.get("contentBlockDelta") {
            return match delta.pointer("/delta/text").and_then(Value::as_str) {
                Some(text) if !text.is_empty() => Self::Text(text.to_string()),
                _ => Self::Ignored,
            };
        }

        if let Some(start) = inner.get("contentBlockStart") {
            return match start.pointer("/start/toolUse") {
                Some(tool) => Self::ToolUse(
                    tool.get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                ),
                None => Self::Ignored,
            };
        }

        if inner.contains_key("contentBlockStop") {
            return Self::BlockStop;
        }

        debug!(data = %preview(data), "Ignoring runtime lifecycle event");
        Self::Ignored
    }

    /// Convert into a chunk payload; `None` for ignored events
    pub fn into_chunk_kind(self) -> Option<Result<ChunkKind>> {
        match self {
            Self::Text(text) => Some(Ok(ChunkKind::Text(text))),
            Self::ToolUse(name) => Some(Ok(ChunkKind::ToolUse { name })),
            Self::BlockStop => Some(Ok(ChunkKind::BlockStop)),
            Self::Done => Some(Ok(ChunkKind::End)),
            Self::Error(message) => Some(Err(AgentError::Runtime(message))),
            Self::Ignored => None,
        }
    }
}

fn preview(data: &str) -> &str {
    match data.char_indices().nth(200) {
        Some((idx, _)) => &data[..idx],
        None => data,
    }
}

/// A finite, non-restartable stream of agent output chunks
pub struct AgentStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>,
}

impl AgentStream {
    /// Wrap an already-numbered chunk stream
    pub fn new(stream: Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>) -> Self {
        Self { inner: stream }
    }

    /// Number chunk payloads in emission order.
    ///
    /// The stream stops after the first end marker or error.
    pub fn sequenced<S>(kinds: S) -> Self
    where
        S: Stream<Item = Result<ChunkKind>> + Send + 'static,
    {
        let numbered = kinds.scan((0u64, false), |state, item| {
            let (next_seq, finished) = state;
            if *finished {
                return future::ready(None);
            }
            let out = match item {
                Ok(kind) => {
                    *finished = matches!(kind, ChunkKind::End);
                    let chunk = StreamChunk::new(*next_seq, kind);
                    *next_seq += 1;
                    Ok(chunk)
                }
                Err(e) => {
                    *finished = true;
                    Err(e)
                }
            };
            future::ready(Some(out))
        });
        Self::new(Box::pin(numbered))
    }

    /// Build a stream from a fixed list of chunks
    pub fn from_chunks(chunks: Vec<Result<StreamChunk>>) -> Self {
        Self::new(Box::pin(stream::iter(chunks)))
    }
}

impl Stream for AgentStream {
    type Item = Result<StreamChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

enum Step {
    Emit(ChunkKind),
    Fail(String),
    Pause(Duration),
}

/// Builder for scripted streams, used in place of a live runtime
#[derive(Default)]
pub struct ScriptedStreamBuilder {
    steps: Vec<Step>,
}

impl ScriptedStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.steps.push(Step::Emit(ChunkKind::Text(text.into())));
        self
    }

    pub fn tool_use(mut self, name: impl Into<String>) -> Self {
        self.steps.push(Step::Emit(ChunkKind::ToolUse { name: name.into() }));
        self
    }

    pub fn block_stop(mut self) -> Self {
        self.steps.push(Step::Emit(ChunkKind::BlockStop));
        self
    }

    pub fn end(mut self) -> Self {
        self.steps.push(Step::Emit(ChunkKind::End));
        self
    }

    /// Fail the stream with a transport error at this point
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push(Step::Fail(message.into()));
        self
    }

    /// Delay the next item
    pub fn pause(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Pause(duration));
        self
    }

    pub fn build(self) -> AgentStream {
        let kinds = stream::iter(self.steps).filter_map(|step| async move {
            match step {
                Step::Emit(kind) => Some(Ok(kind)),
                Step::Fail(message) => Some(Err(AgentError::Stream(message))),
                Step::Pause(duration) => {
                    tokio::time::sleep(duration).await;
                    None
                }
            }
        });
        AgentStream::sequenced(kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_delta() {
        let data = r#"{"event": {"contentBlockDelta": {"delta": {"text": "こんにちは"}, "contentBlockIndex": 0}}}"#;
        assert_eq!(RuntimeEvent::decode(data), RuntimeEvent::Text("こんにちは".to_string()));
    }

    #[test]
    fn test_decode_tool_use_and_stop() {
        let start = r#"{"event": {"contentBlockStart": {"start": {"toolUse": {"name": "web_search", "toolUseId": "t1"}}}}}"#;
        assert_eq!(RuntimeEvent::decode(start), RuntimeEvent::ToolUse("web_search".to_string()));

        let stop = r#"{"event": {"contentBlockStop": {"contentBlockIndex": 0}}}"#;
        assert_eq!(RuntimeEvent::decode(stop), RuntimeEvent::BlockStop);
    }

    #[test]
    fn test_decode_ignores_reprs_and_lifecycle() {
        assert_eq!(
            RuntimeEvent::decode(r#""{'data': 'x', 'agent': <Agent object>}""#),
            RuntimeEvent::Ignored
        );
        assert_eq!(RuntimeEvent::decode(r#"{"init_event_loop": true}"#), RuntimeEvent::Ignored);
        assert_eq!(
            RuntimeEvent::decode(r#"{"event": {"messageStart": {"role": "assistant"}}}"#),
            RuntimeEvent::Ignored
        );
        assert_eq!(RuntimeEvent::decode("not json"), RuntimeEvent::Ignored);
        assert_eq!(RuntimeEvent::decode(""), RuntimeEvent::Ignored);
    }

    #[test]
    fn test_decode_done_and_error() {
        assert_eq!(RuntimeEvent::decode("[DONE]"), RuntimeEvent::Done);
        assert_eq!(
            RuntimeEvent::decode(r#"{"error": "model throttled", "error_type": "ThrottlingException"}"#),
            RuntimeEvent::Error("model throttled".to_string())
        );
    }

    #[tokio::test]
    async fn test_sequenced_numbers_and_stops_at_end() {
        let kinds = stream::iter(vec![
            Ok(ChunkKind::Text("a".to_string())),
            Ok(ChunkKind::End),
            Ok(ChunkKind::Text("late".to_string())),
        ]);
        let chunks: Vec<_> = AgentStream::sequenced(kinds).collect().await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::text(0, "a"));
        assert_eq!(chunks[1].as_ref().unwrap(), &StreamChunk::end(1));
    }

    #[tokio::test]
    async fn test_sequenced_stops_after_error() {
        let stream = ScriptedStreamBuilder::new()
            .text("partial")
            .fail("connection reset")
            .text("never")
            .end()
            .build();
        let chunks: Vec<_> = stream.collect().await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(matches!(chunks[1], Err(AgentError::Stream(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_pause() {
        let started = tokio::time::Instant::now();
        let chunks: Vec<_> = ScriptedStreamBuilder::new()
            .pause(Duration::from_secs(5))
            .text("slow")
            .end()
            .build()
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
