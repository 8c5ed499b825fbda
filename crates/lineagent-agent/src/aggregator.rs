//! Aggregation of streamed agent output into provider-sized replies

use crate::error::{AgentError, Result};
use crate::streaming::{ChunkKind, StreamChunk};
use lineagent_core::{Completion, FinalReply, OverflowPolicy, ReplyPolicy};
use tracing::debug;

/// Result of feeding one chunk to the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStep {
    /// More chunks are expected
    Continue,
    /// The end-of-stream marker was consumed
    Complete,
    /// Accumulated text already exceeds what one reply can carry
    LimitReached,
}

/// Accumulates chunk text in emission order
#[derive(Debug, Clone)]
pub struct ResponseAggregator {
    policy: ReplyPolicy,
    buffer: String,
    chars: usize,
    next_seq: u64,
    ended: bool,
}

impl ResponseAggregator {
    pub fn new(policy: ReplyPolicy) -> Self {
        Self {
            policy,
            buffer: String::new(),
            chars: 0,
            next_seq: 0,
            ended: false,
        }
    }

    /// Consume the next chunk.
    ///
    /// Chunks must arrive with consecutive sequence numbers starting at zero;
    /// anything else, or anything after the end marker, is a protocol violation.
    pub fn push(&mut self, chunk: StreamChunk) -> Result<AggregateStep> {
        if self.ended {
            return Err(AgentError::AfterEnd(chunk.seq));
        }
        if chunk.seq != self.next_seq {
            return Err(AgentError::OutOfOrder {
                expected: self.next_seq,
                got: chunk.seq,
            });
        }
        self.next_seq += 1;

        match chunk.kind {
            ChunkKind::Text(text) => {
                self.chars += text.chars().count();
                self.buffer.push_str(&text);
                // Surrounding whitespace is trimmed when the reply is shaped
                let capacity = self.policy.capacity();
                if self.chars > capacity {
                    let visible = self.buffer.trim().chars().count();
                    if visible > capacity {
                        debug!(chars = visible, capacity, "Reply size limit reached");
                        return Ok(AggregateStep::LimitReached);
                    }
                }
                Ok(AggregateStep::Continue)
            }
            ChunkKind::ToolUse { .. } | ChunkKind::BlockStop => Ok(AggregateStep::Continue),
            ChunkKind::End => {
                self.ended = true;
                Ok(AggregateStep::Complete)
            }
        }
    }

    /// Raw text accumulated so far
    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Shape the accumulated text into a reply under the size policy
    pub fn finish(
        &self,
        destination: &str,
        reply_token: Option<&str>,
        completion: Completion,
    ) -> FinalReply {
        let (segments, shaped_short) = shape(self.buffer.trim(), &self.policy);
        FinalReply {
            reply_token: reply_token.map(str::to_string),
            destination: destination.to_string(),
            segments,
            // The rest of the stream was dropped unread
            truncated: shaped_short || completion == Completion::LengthLimit,
            completion,
        }
    }

    /// Aggregate a complete chunk sequence.
    ///
    /// The sequence must be ordered and terminated by an end marker unless the
    /// size limit is reached first.
    pub fn aggregate<I>(
        policy: ReplyPolicy,
        chunks: I,
        destination: &str,
        reply_token: Option<&str>,
    ) -> Result<FinalReply>
    where
        I: IntoIterator<Item = StreamChunk>,
    {
        let mut aggregator = Self::new(policy);
        for chunk in chunks {
            match aggregator.push(chunk)? {
                AggregateStep::Continue => {}
                AggregateStep::Complete => {
                    return Ok(aggregator.finish(destination, reply_token, Completion::EndOfStream))
                }
                AggregateStep::LimitReached => {
                    return Ok(aggregator.finish(destination, reply_token, Completion::LengthLimit))
                }
            }
        }
        Err(AgentError::Incomplete)
    }
}

fn shape(text: &str, policy: &ReplyPolicy) -> (Vec<String>, bool) {
    let max = policy.max_chars.max(1);
    match policy.overflow {
        OverflowPolicy::Truncate => {
            let cut = byte_index_at(text, max);
            let segments = if text.is_empty() {
                Vec::new()
            } else {
                vec![text[..cut].to_string()]
            };
            (segments, cut < text.len())
        }
        OverflowPolicy::Split => split(text, max, policy.max_segments.max(1)),
    }
}

fn split(text: &str, max: usize, max_segments: usize) -> (Vec<String>, bool) {
    let mut segments = Vec::new();
    let mut rest = text;

    while !rest.is_empty() && segments.len() < max_segments {
        let window_end = byte_index_at(rest, max);
        if window_end == rest.len() {
            segments.push(rest.to_string());
            rest = "";
            break;
        }

        // Prefer a line break in the back half of the window
        let window = &rest[..window_end];
        let half = byte_index_at(window, max / 2);
        let cut = match window.rfind('\n') {
            Some(pos) if pos >= half && pos > 0 => pos,
            _ => window_end,
        };

        let segment = rest[..cut].trim_end();
        if !segment.is_empty() {
            segments.push(segment.to_string());
        }
        rest = rest[cut..].trim_start();
    }

    (segments, !rest.is_empty())
}

/// Byte offset of the `n`th character, or the string length if shorter
fn byte_index_at(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(idx, _)| idx).unwrap_or(s.len())
}
