//! Model backend invocation.
//!
//! The backend is an external collaborator: given a model id and a
//! message history it either returns a stream of typed events or fails
//! with an error the producer can classify (context-length vs other).

use async_trait::async_trait;
use colloquy_core::event::StreamEvent;
use colloquy_core::message::Message;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A stream of events produced by one backend exchange.
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Per-turn capability toggles forwarded to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOptions {
    /// Allow the model to search the web.
    pub enable_web_search: bool,
    /// Allow the model to generate images.
    pub enable_image: bool,
    /// Allow the model to generate video.
    pub enable_video: bool,
}

/// Opens one streaming exchange with a language-model backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Starts a turn against `model_id` with the given history.
    ///
    /// A context-length rejection must surface as an error whose message
    /// or code classifies it (see [`crate::Error::is_context_exceeded`]);
    /// the producer retries that class exactly once with a trimmed
    /// payload.
    async fn stream_turn(
        &self,
        model_id: &str,
        messages: &[Message],
        options: &TurnOptions,
    ) -> Result<EventStream>;
}

#[cfg(feature = "test-utils")]
pub use mock::{MockBackend, MockCall};

#[cfg(feature = "test-utils")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
mod mock {
    use std::sync::{Arc, Mutex};

    use futures::StreamExt;

    use super::*;
    use crate::Error;

    /// One recorded invocation of the mock backend.
    #[derive(Debug, Clone)]
    pub struct MockCall {
        /// Model id the turn was opened against.
        pub model_id: String,
        /// Number of messages in the payload.
        pub message_count: usize,
        /// Total text characters in the payload.
        pub total_chars: usize,
    }

    #[derive(Debug, Clone)]
    enum ScriptItem {
        Event(StreamEvent),
        Error { code: Option<String>, message: String },
        /// Never yields; the stream stays open until cancelled.
        Stall,
    }

    /// A reason every invocation is rejected before streaming starts.
    #[derive(Debug, Clone)]
    struct Rejection {
        message: String,
    }

    /// Scriptable backend for testing the producer and the HTTP surface.
    ///
    /// Replays a fixed event script per call, optionally rejecting
    /// payloads over a character threshold with a context-length error,
    /// which makes the "fails untrimmed, succeeds trimmed" retry scenario
    /// a one-liner. Calls are recorded for assertions.
    #[derive(Debug, Clone, Default)]
    pub struct MockBackend {
        script: Vec<ScriptItem>,
        reject_over_chars: Option<usize>,
        reject_always: Option<Rejection>,
        calls: Arc<Mutex<Vec<MockCall>>>,
    }

    impl MockBackend {
        /// Creates a backend that replays the given events.
        pub fn scripted(events: impl IntoIterator<Item = StreamEvent>) -> Self {
            Self {
                script: events.into_iter().map(ScriptItem::Event).collect(),
                reject_over_chars: None,
                reject_always: None,
                calls: Arc::default(),
            }
        }

        /// Creates a backend that rejects every invocation with the given
        /// message, before any event is produced.
        pub fn rejecting(message: impl Into<String>) -> Self {
            Self {
                script: Vec::new(),
                reject_over_chars: None,
                reject_always: Some(Rejection {
                    message: message.into(),
                }),
                calls: Arc::default(),
            }
        }

        /// Creates a backend that streams `reply` as a complete turn:
        /// `start`, the text in small deltas, `finish`.
        pub fn completing(reply: &str) -> Self {
            let mut events = vec![StreamEvent::start("assistant-msg")];
            let mut remaining = reply;
            while !remaining.is_empty() {
                let split = remaining
                    .char_indices()
                    .nth(8)
                    .map(|(index, _)| index)
                    .unwrap_or(remaining.len());
                events.push(StreamEvent::text_delta(&remaining[..split]));
                remaining = &remaining[split..];
            }
            events.push(StreamEvent::finish_with_tokens(reply.len() as u64));
            Self::scripted(events)
        }

        /// Rejects payloads whose total text exceeds `max_chars` with a
        /// context-length error, before any event is produced.
        pub fn with_context_limit(mut self, max_chars: usize) -> Self {
            self.reject_over_chars = Some(max_chars);
            self
        }

        /// Appends a mid-stream failure after the scripted events.
        pub fn then_failing(mut self, message: impl Into<String>) -> Self {
            self.script.push(ScriptItem::Error {
                code: None,
                message: message.into(),
            });
            self
        }

        /// Keeps the stream open (pending forever) after the scripted
        /// events, for cancellation tests.
        pub fn then_stalling(mut self) -> Self {
            self.script.push(ScriptItem::Stall);
            self
        }

        /// Returns the recorded invocations.
        pub fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().expect("mock call log poisoned").clone()
        }
    }

    #[async_trait]
    impl ChatBackend for MockBackend {
        async fn stream_turn(
            &self,
            model_id: &str,
            messages: &[Message],
            _options: &TurnOptions,
        ) -> Result<EventStream> {
            let total_chars: usize = messages.iter().map(Message::text_len).sum();
            self.calls.lock().expect("mock call log poisoned").push(MockCall {
                model_id: model_id.to_owned(),
                message_count: messages.len(),
                total_chars,
            });

            if let Some(rejection) = &self.reject_always {
                return Err(Error::backend(&rejection.message));
            }

            if let Some(limit) = self.reject_over_chars {
                if total_chars > limit {
                    return Err(Error::backend_with_code(
                        "context_length_exceeded",
                        format!(
                            "this model's maximum context length is {limit} characters, \
                             received {total_chars}"
                        ),
                    ));
                }
            }

            let script = self.script.clone();
            let stream = async_stream::stream! {
                for item in script {
                    match item {
                        ScriptItem::Event(event) => yield Ok(event),
                        ScriptItem::Error { code, message } => {
                            match code {
                                Some(code) => yield Err(Error::backend_with_code(code, message)),
                                None => yield Err(Error::backend(message)),
                            }
                            return;
                        }
                        ScriptItem::Stall => {
                            futures::future::pending::<()>().await;
                        }
                    }
                }
            };
            Ok(stream.boxed())
        }
    }

}
