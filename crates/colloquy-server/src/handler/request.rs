//! Chat request types.

use colloquy_chat::{TurnOptions, TurnRequest};
use colloquy_core::message::Message;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{Error, ErrorKind};

/// Request payload for running one chat turn.
///
/// Exactly one of `message` (a single new message, appended server-side)
/// or `messages` (a full transcript replacement, used for auto-send and
/// context-injection flows) must be present.
#[must_use]
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMessage {
    /// Single new user message.
    pub message: Option<Message>,
    /// Full transcript replacement.
    pub messages: Option<Vec<Message>>,
    /// Target chat; a new chat is created when absent.
    #[validate(length(min = 1, max = 256))]
    pub chat_id: Option<String>,
    /// Explicitly requested model id.
    #[validate(length(min = 1, max = 256))]
    pub model_id: Option<String>,
    /// Allow the model to search the web.
    #[serde(default)]
    pub enable_web_search: bool,
    /// Allow the model to generate images.
    #[serde(default)]
    pub enable_image: bool,
    /// Allow the model to generate video.
    #[serde(default)]
    pub enable_video: bool,
}

impl SendChatMessage {
    /// Validates field constraints and the message/messages exclusivity.
    pub fn validate_payload(&self) -> Result<(), Error> {
        self.validate()
            .map_err(|error| ErrorKind::BadRequest.with_message(error.to_string()))?;

        match (&self.message, &self.messages) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ErrorKind::BadRequest
                .with_message("Exactly one of `message` or `messages` is required.")),
        }
    }

    /// Converts this request into a producer turn request.
    pub fn into_turn_request(self, account_id: impl Into<String>) -> TurnRequest {
        TurnRequest {
            account_id: account_id.into(),
            chat_id: self.chat_id,
            message: self.message,
            messages: self.messages,
            model_id: self.model_id,
            options: TurnOptions {
                enable_web_search: self.enable_web_search,
                enable_image: self.enable_image,
                enable_video: self.enable_video,
            },
        }
    }
}
