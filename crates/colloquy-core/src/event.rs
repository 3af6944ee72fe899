//! The stream-event protocol: typed records emitted during one chat turn.
//!
//! Events exist only for the duration of one exchange and are never
//! persisted as-is; both sides fold them into the [`Message`] model via
//! [`crate::assemble`]. Producers may emit either a full snapshot
//! (`text`) or an incremental fragment (`delta`) for the text and
//! reasoning channels; consumers must support both (see
//! [`crate::assemble::TextAccumulator`] for the merge rules).
//!
//! [`Message`]: crate::message::Message

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Usage metadata attached to the final event of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishMetadata {
    /// Total tokens consumed by the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// A single typed record on the event stream.
///
/// The wire discriminant is the `type` field (kebab-case); payload fields
/// are camelCase. Records with an unrecognized `type` decode to
/// [`StreamEvent::Unknown`] and are skipped by consumers, which keeps the
/// protocol forward-compatible without giving up the closed enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// Opens the logical turn; a new assistant message begins.
    Start {
        /// Identifier for the assistant message being streamed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Answer text, as a full snapshot or an incremental delta.
    Text {
        /// Full replacement value ("snapshot wins").
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Newly produced fragment since the last update.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },

    /// The model started streaming reasoning.
    ReasoningStart,

    /// Reasoning text, snapshot or delta.
    Reasoning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },

    /// The model finished streaming reasoning.
    ReasoningEnd,

    /// A tool call opened; its input is streaming.
    ToolInputStart {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },

    /// A fragment of the streaming tool input.
    ToolInputDelta {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },

    /// The complete tool input is available.
    ToolInputAvailable {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },

    /// The tool produced an output.
    ToolOutputAvailable {
        tool_call_id: String,
        /// Input echo, used to back-fill a part whose input never arrived.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },

    /// The tool invocation failed.
    ToolInputError {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },

    /// Terminates the logical turn; always the last record before the
    /// end-of-stream marker.
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<FinishMetadata>,
    },

    /// Any record whose `type` this version does not recognize.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Creates a `start` event with the given message id.
    pub fn start(id: impl Into<String>) -> Self {
        Self::Start { id: Some(id.into()) }
    }

    /// Creates a `text` delta event.
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self::Text {
            text: None,
            delta: Some(delta.into()),
        }
    }

    /// Creates a `text` snapshot event.
    pub fn text_snapshot(text: impl Into<String>) -> Self {
        Self::Text {
            text: Some(text.into()),
            delta: None,
        }
    }

    /// Creates a `reasoning` delta event.
    pub fn reasoning_delta(delta: impl Into<String>) -> Self {
        Self::Reasoning {
            text: None,
            delta: Some(delta.into()),
        }
    }

    /// Creates a bare `finish` event.
    pub fn finish() -> Self {
        Self::Finish { metadata: None }
    }

    /// Creates a `finish` event carrying a token count.
    pub fn finish_with_tokens(total_tokens: u64) -> Self {
        Self::Finish {
            metadata: Some(FinishMetadata {
                total_tokens: Some(total_tokens),
            }),
        }
    }

    /// Returns true for the turn-terminating event.
    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    /// Returns the wire discriminant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Text { .. } => "text",
            Self::ReasoningStart => "reasoning-start",
            Self::Reasoning { .. } => "reasoning",
            Self::ReasoningEnd => "reasoning-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputDelta { .. } => "tool-input-delta",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::ToolInputError { .. } => "tool-input-error",
            Self::Finish { .. } => "finish",
            Self::Unknown => "unknown",
        }
    }
}
