//! The client-local message log.
//!
//! A transcript is a single-writer, append-only log: messages are only
//! ever appended, replaced-in-place at the last position (while that
//! message is still streaming), or rolled back by truncation when a turn
//! fails. All mutation happens from one logical task, so no interior
//! locking is needed.

use colloquy_core::message::Message;

/// An owned, append-only message log.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transcript seeded with existing history.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Returns the messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the transcript is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the last message, if any.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Appends a message.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Mutates the last message in place; a no-op when empty.
    pub fn replace_last(&mut self, update: impl FnOnce(&mut Message)) {
        if let Some(last) = self.messages.last_mut() {
            update(last);
        }
    }

    /// Rolls the transcript back to `len` messages; a no-op when already
    /// at or below that length.
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    /// Clears the transcript.
    pub fn reset(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_replace_last() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user("hello"));
        transcript.append(Message::streaming_assistant("m1"));

        transcript.replace_last(|message| {
            *message = Message::assistant("replaced");
        });

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.last().map(|m| m.text()), Some("replaced".into()));
        // The earlier message is untouched.
        assert_eq!(transcript.messages()[0].text(), "hello");
    }

    #[test]
    fn truncate_rolls_back_optimistic_messages() {
        let mut transcript = Transcript::from_messages(vec![Message::user("kept")]);
        let rollback = transcript.len();

        transcript.append(Message::user("optimistic"));
        transcript.append(Message::streaming_assistant("m1"));
        transcript.truncate(rollback);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.messages()[0].text(), "kept");
    }

    #[test]
    fn replace_last_on_empty_is_noop() {
        let mut transcript = Transcript::new();
        transcript.replace_last(|message| {
            *message = Message::assistant("ghost");
        });
        assert!(transcript.is_empty());
    }
}
