//! Folding a stream of events into a message.
//!
//! Both sides of the exchange run this fold: the producer assembles the
//! assistant message it will persist, and the consumer mirrors the same
//! state into its local transcript. The fold tolerates at-least-once
//! delivery of text fragments (a producer may resend an overlapping tail
//! after a retry or reconnection) but does not attempt to reorder events.

use std::collections::HashMap;

use crate::event::StreamEvent;
use crate::message::{Message, MessagePart, ToolCallPart, ToolCallState};

/// Snapshot-or-delta accumulator for one text channel.
///
/// A snapshot replaces the value outright and latches `saw_snapshot`;
/// from then on deltas for the same channel are dropped for the rest of
/// the turn ("snapshot wins"). Deltas merge by appending only the part
/// that does not overlap the current value.
#[derive(Debug, Clone, Default)]
pub struct TextAccumulator {
    value: String,
    saw_snapshot: bool,
}

impl TextAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the accumulated value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true once a snapshot has been applied.
    pub fn saw_snapshot(&self) -> bool {
        self.saw_snapshot
    }

    /// Replaces the value with a full snapshot.
    pub fn apply_snapshot(&mut self, text: &str) {
        self.value.clear();
        self.value.push_str(text);
        self.saw_snapshot = true;
    }

    /// Merges an incremental fragment, deduplicating any resent overlap.
    ///
    /// Appends only the suffix of `delta` past the longest suffix of the
    /// current value that is a prefix of `delta`. A no-op once a snapshot
    /// has been seen.
    pub fn apply_delta(&mut self, delta: &str) {
        if self.saw_snapshot {
            return;
        }
        let overlap = overlap_len(&self.value, delta);
        self.value.push_str(&delta[overlap..]);
    }
}

/// Length in bytes of the longest suffix of `existing` that is a prefix
/// of `delta`. Only char-boundary-aligned overlaps are considered.
fn overlap_len(existing: &str, delta: &str) -> usize {
    let max = existing.len().min(delta.len());
    for k in (1..=max).rev() {
        if !delta.is_char_boundary(k) {
            continue;
        }
        if existing.ends_with(&delta[..k]) {
            return k;
        }
    }
    0
}

/// Folds stream events into one assistant [`Message`].
///
/// Tool-call parts are upserted by correlation id: the first event seen
/// for an id determines the part's position among the message parts, and
/// an event for an unknown id creates the part directly in the event's
/// target state rather than being dropped, to tolerate reordering. Parts
/// in a terminal state are never revisited within the turn.
#[derive(Debug)]
pub struct MessageAssembler {
    message: Message,
    text: TextAccumulator,
    reasoning: TextAccumulator,
    text_part: usize,
    reasoning_part: Option<usize>,
    tool_parts: HashMap<String, usize>,
    finished: bool,
}

impl MessageAssembler {
    /// Starts assembling a streaming assistant message with the given id.
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message: Message::streaming_assistant(message_id),
            text: TextAccumulator::new(),
            reasoning: TextAccumulator::new(),
            text_part: 0,
            reasoning_part: None,
            tool_parts: HashMap::new(),
            finished: false,
        }
    }

    /// Returns the message in its current state.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Returns mutable access to the message metadata, for stamping
    /// attribution before or during the stream.
    pub fn metadata_mut(&mut self) -> &mut crate::message::MessageMetadata {
        &mut self.message.metadata
    }

    /// Stamps the resolved model onto the message metadata, including the
    /// denormalized assistant display name and avatar.
    pub fn stamp_model(&mut self, model: &crate::message::ModelDescriptor) {
        let metadata = &mut self.message.metadata;
        metadata.model = Some(model.clone());
        metadata.assistant_display_name = Some(model.name.clone());
        metadata.assistant_image_url = model.profile_image_url.clone();
    }

    /// Returns true once the `finish` event has been applied.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Finalizes and returns the assembled message.
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Applies one event to the message under assembly.
    ///
    /// `start` and unknown records are no-ops here: the caller owns
    /// message creation, and unknown records are skipped by contract.
    /// Events after `finish` are ignored.
    pub fn apply(&mut self, event: &StreamEvent) {
        if self.finished {
            return;
        }

        match event {
            StreamEvent::Start { .. } | StreamEvent::Unknown => {}

            StreamEvent::Text { text, delta } => {
                if let Some(text) = text {
                    self.text.apply_snapshot(text);
                } else if let Some(delta) = delta {
                    self.text.apply_delta(delta);
                }
                self.message.parts[self.text_part] = MessagePart::text(self.text.value());
            }

            StreamEvent::ReasoningStart => {
                self.message.metadata.reasoning_active = Some(true);
            }

            StreamEvent::Reasoning { text, delta } => {
                if let Some(text) = text {
                    self.reasoning.apply_snapshot(text);
                } else if let Some(delta) = delta {
                    self.reasoning.apply_delta(delta);
                }
                let index = self.ensure_reasoning_part();
                self.message.parts[index] = MessagePart::reasoning(self.reasoning.value());
            }

            StreamEvent::ReasoningEnd => {
                self.message.metadata.reasoning_active = Some(false);
            }

            StreamEvent::ToolInputStart {
                tool_call_id,
                tool_name,
            } => {
                if self.tool_parts.contains_key(tool_call_id) {
                    return;
                }
                let mut part = ToolCallPart::new(tool_call_id, ToolCallState::InputStreaming);
                part.tool_name = tool_name.clone();
                self.insert_tool_part(part);
            }

            StreamEvent::ToolInputDelta { tool_call_id, .. } => {
                // The part records its input only at `tool-input-available`;
                // a delta matters solely for first-sighting.
                if !self.tool_parts.contains_key(tool_call_id) {
                    self.insert_tool_part(ToolCallPart::new(
                        tool_call_id,
                        ToolCallState::InputStreaming,
                    ));
                }
            }

            StreamEvent::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => {
                self.upsert_tool_part(tool_call_id, |part| {
                    part.state = ToolCallState::InputAvailable;
                    part.input = input.clone();
                    if part.tool_name.is_none() {
                        part.tool_name = tool_name.clone();
                    }
                });
            }

            StreamEvent::ToolOutputAvailable {
                tool_call_id,
                input,
                output,
            } => {
                self.upsert_tool_part(tool_call_id, |part| {
                    part.state = ToolCallState::OutputAvailable;
                    part.output = output.clone();
                    if part.input.is_none() {
                        part.input = input.clone();
                    }
                });
            }

            StreamEvent::ToolInputError {
                tool_call_id,
                error_text,
            } => {
                self.upsert_tool_part(tool_call_id, |part| {
                    part.state = ToolCallState::OutputError;
                    part.error_text = error_text.clone();
                });
            }

            StreamEvent::Finish { metadata } => {
                if let Some(metadata) = metadata {
                    if metadata.total_tokens.is_some() {
                        self.message.metadata.total_tokens = metadata.total_tokens;
                    }
                }
                self.finished = true;
            }
        }
    }

    fn ensure_reasoning_part(&mut self) -> usize {
        match self.reasoning_part {
            Some(index) => index,
            None => {
                self.message.parts.push(MessagePart::reasoning(""));
                let index = self.message.parts.len() - 1;
                self.reasoning_part = Some(index);
                index
            }
        }
    }

    fn insert_tool_part(&mut self, part: ToolCallPart) -> usize {
        let id = part.tool_call_id.clone();
        self.message.parts.push(MessagePart::ToolCall(part));
        let index = self.message.parts.len() - 1;
        self.tool_parts.insert(id, index);
        index
    }

    /// Applies `update` to the part for `tool_call_id`, creating it in
    /// [`ToolCallState::InputStreaming`] first if it was never seen.
    /// Parts already in a terminal state are left untouched.
    fn upsert_tool_part(&mut self, tool_call_id: &str, update: impl FnOnce(&mut ToolCallPart)) {
        let index = match self.tool_parts.get(tool_call_id) {
            Some(index) => *index,
            None => self.insert_tool_part(ToolCallPart::new(
                tool_call_id,
                ToolCallState::InputStreaming,
            )),
        };

        if let MessagePart::ToolCall(part) = &mut self.message.parts[index] {
            if part.state.is_terminal() {
                return;
            }
            update(part);
        }
    }
}
