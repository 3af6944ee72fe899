//! Message and transcript types for conversational AI turns.
//!
//! A [`Message`] is immutable once finalized: the producer creates and
//! finalizes messages server-side, while the consumer keeps a client-local
//! mirror that is append-only except for in-place mutation of the *last*
//! message while it is still streaming. Content lives in ordered, typed
//! [`MessagePart`]s so a single assistant reply can interleave text,
//! reasoning, and tool calls.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result};

/// Role of a message participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message providing instructions or context.
    System,
    /// Message from a human user.
    User,
    /// Message from an AI assistant.
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single typed content fragment within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    /// Plain answer text.
    Text {
        /// The text content.
        text: String,
    },
    /// Model "thinking" text, streamed separately from the answer.
    Reasoning {
        /// The reasoning content.
        text: String,
    },
    /// One tool invocation with its lifecycle state.
    ToolCall(ToolCallPart),
}

impl MessagePart {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates a reasoning part.
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    /// Returns true if this is a text part.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }
}

/// Lifecycle state of a tool-call part.
///
/// Transitions run `input-streaming → input-available → {output-available |
/// output-error}`; the last two are terminal and are never re-entered
/// within the same turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    /// The model is still streaming the tool input.
    InputStreaming,
    /// The complete tool input has arrived.
    InputAvailable,
    /// The tool produced an output.
    OutputAvailable,
    /// The tool invocation failed.
    OutputError,
}

impl ToolCallState {
    /// Returns true if this state is terminal for the turn.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::OutputAvailable | Self::OutputError)
    }
}

/// One logical tool invocation, keyed by its correlation id within a
/// message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    /// Correlation id associating scattered lifecycle events with this call.
    pub tool_call_id: String,

    /// Name of the invoked tool, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Current lifecycle state.
    pub state: ToolCallState,

    /// Tool input payload, recorded when it becomes available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Tool output payload, recorded on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Error description when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ToolCallPart {
    /// Creates a part in the given state with no payloads.
    pub fn new(tool_call_id: impl Into<String>, state: ToolCallState) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: None,
            state,
            input: None,
            output: None,
            error_text: None,
        }
    }

    /// Sets the tool name.
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Sets the input payload.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }
}

/// Denormalized descriptor of the model that produced a message.
///
/// Stored inside message metadata so a transcript stays displayable even
/// if the underlying model is later renamed or removed. Field names
/// round-trip the persisted metadata shape exactly, including the
/// snake_case `profile_image_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Backend model identifier.
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Avatar URL shown next to assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

impl ModelDescriptor {
    /// Creates a descriptor with the given id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            profile_image_url: None,
        }
    }

    /// Sets the profile image URL.
    pub fn with_profile_image(mut self, url: impl Into<String>) -> Self {
        self.profile_image_url = Some(url.into());
        self
    }

    /// Creates a descriptor from a bare name, with the name doubling as id.
    ///
    /// Used as the last resort when model resolution finds nothing better.
    pub fn synthetic(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            profile_image_url: None,
        }
    }
}

/// Metadata attached to a persisted message.
///
/// The serialized shape must round-trip exactly:
/// `{ createdAt, model?, totalTokens?, assistantDisplayName?,
/// assistantImageUrl?, reasoningActive? }`. Unknown keys written by other
/// parts of the application are preserved through the `extra` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Timestamp when this message was created.
    #[serde(default = "Timestamp::now")]
    pub created_at: Timestamp,

    /// Model that generated this message (for assistant messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelDescriptor>,

    /// Token count for the turn that produced this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    /// Display name shown for the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_display_name: Option<String>,

    /// Avatar URL shown for the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_image_url: Option<String>,

    /// Transient flag: true while the model is streaming reasoning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_active: Option<bool>,

    /// Metadata keys this crate does not interpret, preserved verbatim.
    #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            created_at: Timestamp::now(),
            model: None,
            total_tokens: None,
            assistant_display_name: None,
            assistant_image_url: None,
            reasoning_active: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A message in a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque message identifier.
    pub id: String,

    /// Role of the message sender.
    pub role: MessageRole,

    /// Ordered typed content fragments.
    #[serde(default)]
    pub parts: Vec<MessagePart>,

    /// Creation and attribution metadata.
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    fn with_role(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role,
            parts: vec![MessagePart::text(text)],
            metadata: MessageMetadata::default(),
        }
    }

    /// Creates a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, text)
    }

    /// Creates a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, text)
    }

    /// Creates an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, text)
    }

    /// Creates the momentarily-streaming assistant message: a single empty
    /// text part that the stream fold mutates in place.
    pub fn streaming_assistant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            parts: vec![MessagePart::text("")],
            metadata: MessageMetadata::default(),
        }
    }

    /// Sets the model descriptor on this message's metadata.
    pub fn with_model(mut self, model: ModelDescriptor) -> Self {
        self.metadata.model = Some(model);
        self
    }

    /// Adds a content part to this message.
    pub fn with_part(mut self, part: MessagePart) -> Self {
        self.parts.push(part);
        self
    }

    /// Returns true if this is a system message.
    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    /// Returns true if this is a user message.
    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    /// Returns true if this is an assistant message.
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    /// Concatenates the text of all `Text` parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// Counts the characters of `Text` parts only.
    ///
    /// This is the unit the budget trimmer accounts in: reasoning and
    /// tool-call parts do not count against the context budget.
    pub fn text_len(&self) -> usize {
        self.parts
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } => text.chars().count(),
                _ => 0,
            })
            .sum()
    }

    /// Validates the message structure.
    ///
    /// Every message carries at least one part; even the streaming
    /// assistant state starts with one (empty) text part.
    pub fn validate(&self) -> Result<()> {
        if self.parts.is_empty() {
            return Err(Error::invalid_input().with_message("message must have at least one part"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roles() {
        let system = Message::system("You are a helpful assistant");
        let user = Message::user("Hello");
        let assistant = Message::assistant("Hi!");

        assert!(system.is_system());
        assert!(user.is_user());
        assert!(assistant.is_assistant());
    }

    #[test]
    fn streaming_assistant_starts_with_one_empty_text_part() {
        let message = Message::streaming_assistant("m1");
        assert_eq!(message.parts, vec![MessagePart::text("")]);
        assert!(message.validate().is_ok());
    }

    #[test]
    fn text_len_counts_text_parts_only() {
        let message = Message::user("hello")
            .with_part(MessagePart::reasoning("thinking hard"))
            .with_part(MessagePart::ToolCall(ToolCallPart::new(
                "call-1",
                ToolCallState::OutputAvailable,
            )));

        assert_eq!(message.text_len(), 5);
    }

    #[test]
    fn empty_parts_fail_validation() {
        let mut message = Message::user("hello");
        message.parts.clear();
        assert!(message.validate().is_err());
    }

    #[test]
    fn metadata_round_trips_exact_shape() {
        let json = serde_json::json!({
            "createdAt": "2026-01-15T10:30:00Z",
            "model": { "id": "m-1", "name": "Example", "profile_image_url": "https://x/y.png" },
            "totalTokens": 42,
            "assistantDisplayName": "Example",
            "assistantImageUrl": "https://x/y.png",
            "reasoningActive": false,
            "customKey": { "nested": true }
        });

        let metadata: MessageMetadata =
            serde_json::from_value(json.clone()).expect("metadata should deserialize");
        assert_eq!(metadata.total_tokens, Some(42));
        assert_eq!(metadata.reasoning_active, Some(false));
        assert_eq!(
            metadata.model.as_ref().map(|m| m.id.as_str()),
            Some("m-1")
        );
        assert!(metadata.extra.contains_key("customKey"));

        let round_tripped = serde_json::to_value(&metadata).expect("metadata should serialize");
        assert_eq!(round_tripped, json);
    }

    #[test]
    fn tool_call_part_serializes_camel_case() {
        let part = ToolCallPart::new("call-9", ToolCallState::InputStreaming)
            .with_tool_name("web_search");

        let json = serde_json::to_value(&part).expect("part should serialize");
        assert_eq!(json["toolCallId"], "call-9");
        assert_eq!(json["toolName"], "web_search");
        assert_eq!(json["state"], "input-streaming");
    }

    #[test]
    fn terminal_states() {
        assert!(!ToolCallState::InputStreaming.is_terminal());
        assert!(!ToolCallState::InputAvailable.is_terminal());
        assert!(ToolCallState::OutputAvailable.is_terminal());
        assert!(ToolCallState::OutputError.is_terminal());
    }
}
