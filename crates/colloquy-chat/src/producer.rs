//! The chat turn state machine.
//!
//! One turn runs `Idle → Loading-History → Invoking-Backend → Streaming →
//! Finished`, with a single bounded detour through `Retrying` when the
//! backend rejects the payload for exceeding its context window. The
//! retry is invisible to the consumer: the same event stream comes out
//! either way, and the **original untrimmed** history is what gets
//! persisted. Budget trimming affects only what is sent to the backend,
//! never what is stored.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use colloquy_core::assemble::MessageAssembler;
use colloquy_core::budget::{
    BudgetPolicy, DEFAULT_CONTEXT_TOKENS, RETRY_MIN_TAIL_MESSAGES, RETRY_TEXT_CEILING,
};
use colloquy_core::event::StreamEvent;
use colloquy_core::message::{Message, ModelDescriptor};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{ChatBackend, EventStream, TurnOptions};
use crate::history::HistoryStore;
use crate::resolver::ModelResolver;
use crate::trim::{cap_text_parts, trim_messages};
use crate::{Error, Result};

/// Tracing target for turn production.
const TRACING_TARGET: &str = "colloquy_chat::producer";

/// Static configuration for the producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Model name used when resolution has nothing better to go on.
    pub fallback_model_name: String,
    /// Context-window assumption for models that report none.
    pub default_context_tokens: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            fallback_model_name: "colloquy".to_owned(),
            default_context_tokens: DEFAULT_CONTEXT_TOKENS,
        }
    }
}

/// One incoming user turn.
///
/// Either `message` (a single new message, appended server-side) or
/// `messages` (a full transcript replacement, used for auto-send and
/// context-injection flows) must be set.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Account the turn runs under.
    pub account_id: String,
    /// Target chat; a new chat is created when absent or unknown.
    pub chat_id: Option<String>,
    /// Single new user message.
    pub message: Option<Message>,
    /// Full transcript replacement.
    pub messages: Option<Vec<Message>>,
    /// Explicitly requested model id.
    pub model_id: Option<String>,
    /// Capability toggles forwarded to the backend.
    pub options: TurnOptions,
}

impl TurnRequest {
    /// Creates an empty request for the given account.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    /// Targets an existing chat.
    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Sets the single new message.
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    /// Sets the full transcript replacement.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Requests a specific model.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

/// The event stream for one running turn.
#[derive(Debug)]
pub struct TurnStream {
    chat_id: String,
    events: ReceiverStream<StreamEvent>,
}

impl TurnStream {
    /// Returns the id of the chat this turn belongs to.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

impl Stream for TurnStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Orchestrates one streaming chat turn end to end.
#[derive(Clone)]
pub struct ChatProducer {
    store: Arc<dyn HistoryStore>,
    backend: Arc<dyn ChatBackend>,
    resolver: ModelResolver,
    config: ProducerConfig,
}

impl ChatProducer {
    /// Creates a producer over its external collaborators.
    pub fn new(
        store: Arc<dyn HistoryStore>,
        backend: Arc<dyn ChatBackend>,
        resolver: ModelResolver,
        config: ProducerConfig,
    ) -> Self {
        Self {
            store,
            backend,
            resolver,
            config,
        }
    }

    /// Runs one turn: merges history, resolves the model, opens the
    /// exchange (retrying once on a context-length rejection), and
    /// returns the outgoing event stream.
    ///
    /// The transcript is persisted when the backend's `finish` event
    /// arrives, *before* `finish` is forwarded downstream, so a consumer
    /// that has seen `finish` may safely navigate away. Cancelling the
    /// token stops the exchange without persisting and without an error.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<TurnStream> {
        let (chat_id, history) = self.merge_history(&request).await?;

        tracing::debug!(
            target: TRACING_TARGET,
            chat_id = %chat_id,
            message_count = history.len(),
            "History loaded"
        );

        let resolved = self
            .resolver
            .resolve(
                request.model_id.as_deref(),
                &history,
                &self.config.fallback_model_name,
                &request.account_id,
            )
            .await;
        let budget = BudgetPolicy::for_context_tokens(
            resolved
                .context_tokens
                .unwrap_or(self.config.default_context_tokens),
        );

        let upstream = self
            .open_exchange(&resolved.descriptor.id, &history, budget, &request.options)
            .await?;

        tracing::info!(
            target: TRACING_TARGET,
            chat_id = %chat_id,
            model_id = %resolved.descriptor.id,
            "Turn streaming started"
        );

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(forward_turn(ForwardContext {
            upstream,
            tx,
            cancel,
            store: Arc::clone(&self.store),
            account_id: request.account_id,
            chat_id: chat_id.clone(),
            history,
            model: resolved.descriptor,
        }));

        Ok(TurnStream {
            chat_id,
            events: ReceiverStream::new(rx),
        })
    }

    /// Merges the incoming turn onto the persisted transcript, creating
    /// the chat on first message.
    async fn merge_history(&self, request: &TurnRequest) -> Result<(String, Vec<Message>)> {
        if let Some(messages) = &request.messages {
            let chat_id = match &request.chat_id {
                Some(id) if self.store.exists(id, &request.account_id).await? => id.clone(),
                Some(id) => {
                    self.store
                        .create(&request.account_id, Some(id), None)
                        .await?
                }
                None => self.store.create(&request.account_id, None, None).await?,
            };
            return Ok((chat_id, messages.clone()));
        }

        let Some(message) = &request.message else {
            return Err(Error::invalid_request(
                "a turn requires either `message` or `messages`",
            ));
        };

        match &request.chat_id {
            Some(id) => match self.store.load(id, &request.account_id).await? {
                Some(mut history) => {
                    history.push(message.clone());
                    Ok((id.clone(), history))
                }
                None => {
                    let chat_id = self
                        .store
                        .create(&request.account_id, Some(id), Some(message.clone()))
                        .await?;
                    Ok((chat_id, vec![message.clone()]))
                }
            },
            None => {
                let chat_id = self
                    .store
                    .create(&request.account_id, None, Some(message.clone()))
                    .await?;
                Ok((chat_id, vec![message.clone()]))
            }
        }
    }

    /// Opens the backend exchange, retrying exactly once (with the
    /// text-part filter and the budget trimmer applied) when the first
    /// attempt is rejected for context length. Any other error, and any
    /// error on the retry, propagates as-is.
    async fn open_exchange(
        &self,
        model_id: &str,
        history: &[Message],
        budget: BudgetPolicy,
        options: &TurnOptions,
    ) -> Result<EventStream> {
        match self.backend.stream_turn(model_id, history, options).await {
            Ok(stream) => Ok(stream),
            Err(error) if error.is_context_exceeded() => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    model_id,
                    max_chars = budget.max_chars,
                    error = %error,
                    "Context window exceeded, retrying once with trimmed history"
                );
                let reduced = trim_messages(
                    &cap_text_parts(history, RETRY_TEXT_CEILING),
                    budget.max_chars,
                    RETRY_MIN_TAIL_MESSAGES,
                );
                self.backend.stream_turn(model_id, &reduced, options).await
            }
            Err(error) => Err(error),
        }
    }
}

struct ForwardContext {
    upstream: EventStream,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    store: Arc<dyn HistoryStore>,
    account_id: String,
    chat_id: String,
    history: Vec<Message>,
    model: ModelDescriptor,
}

/// Pumps backend events downstream while folding them into the assistant
/// message, then persists on `finish`.
///
/// Closing the channel without having forwarded `finish` is the terminal
/// failure signal for the consumer; cancellation closes the same way but
/// is not an error.
async fn forward_turn(context: ForwardContext) {
    let ForwardContext {
        mut upstream,
        tx,
        cancel,
        store,
        account_id,
        chat_id,
        history,
        model,
    } = context;

    let mut history = Some(history);
    let mut assembler: Option<MessageAssembler> = None;

    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!(
                    target: TRACING_TARGET,
                    chat_id = %chat_id,
                    "Turn cancelled"
                );
                return;
            }

            item = upstream.next() => item,
        };

        let Some(item) = item else {
            tracing::warn!(
                target: TRACING_TARGET,
                chat_id = %chat_id,
                "Backend stream ended before finish"
            );
            return;
        };

        let event = match item {
            Ok(event) => event,
            Err(error) => {
                tracing::error!(
                    target: TRACING_TARGET,
                    chat_id = %chat_id,
                    error = %error,
                    "Backend stream failed mid-turn"
                );
                return;
            }
        };

        match event {
            StreamEvent::Unknown => {}

            StreamEvent::Start { id } => {
                let id = id.unwrap_or_else(|| Uuid::now_v7().to_string());
                let mut next = MessageAssembler::new(id.as_str());
                next.stamp_model(&model);
                assembler = Some(next);
                if tx.send(StreamEvent::start(id)).await.is_err() {
                    tracing::debug!(
                        target: TRACING_TARGET,
                        chat_id = %chat_id,
                        "Receiver dropped, stopping turn"
                    );
                    return;
                }
            }

            StreamEvent::Finish { .. } => {
                let mut done = match assembler.take() {
                    Some(assembler) => assembler,
                    None => {
                        let mut fresh = MessageAssembler::new(Uuid::now_v7().to_string());
                        fresh.stamp_model(&model);
                        fresh
                    }
                };
                done.apply(&event);

                let Some(mut transcript) = history.take() else {
                    return;
                };
                transcript.push(done.into_message());

                if let Err(error) = store.save(&chat_id, &account_id, transcript).await {
                    tracing::error!(
                        target: TRACING_TARGET,
                        chat_id = %chat_id,
                        error = %error,
                        "Failed to persist transcript, closing stream without finish"
                    );
                    return;
                }

                tracing::info!(
                    target: TRACING_TARGET,
                    chat_id = %chat_id,
                    "Turn finished and transcript persisted"
                );
                let _ = tx.send(event).await;
                return;
            }

            other => {
                if assembler.is_none() {
                    // Content arrived before `start`; synthesize the
                    // opening so downstream always sees a well-formed turn.
                    let id = Uuid::now_v7().to_string();
                    let mut fresh = MessageAssembler::new(id.as_str());
                    fresh.stamp_model(&model);
                    assembler = Some(fresh);
                    if tx.send(StreamEvent::start(id)).await.is_err() {
                        return;
                    }
                }
                let Some(current) = assembler.as_mut() else {
                    return;
                };
                current.apply(&other);

                if tx.send(other).await.is_err() {
                    tracing::debug!(
                        target: TRACING_TARGET,
                        chat_id = %chat_id,
                        "Receiver dropped, stopping turn"
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::backend::MockBackend;
    use crate::history::InMemoryHistoryStore;
    use crate::resolver::{AllowAll, ModelEntry, ModelResolver, StaticCatalog};

    fn resolver_with_context(context_window: u32) -> ModelResolver {
        let catalog = StaticCatalog::new(vec![ModelEntry::new("m-test", "Test Model")
            .with_metadata(serde_json::json!({"context_window": context_window}))
            .with_profile_image("https://models/test.png")]);
        ModelResolver::new(Arc::new(catalog), Arc::new(AllowAll))
    }

    fn producer(backend: &Arc<MockBackend>, store: &InMemoryHistoryStore) -> ChatProducer {
        ChatProducer::new(
            Arc::new(store.clone()),
            Arc::clone(backend) as Arc<dyn ChatBackend>,
            resolver_with_context(625), // 625 * 4 * 0.8 = 2000 char budget
            ProducerConfig::default(),
        )
    }

    async fn seeded_store(count: usize, chars_each: usize) -> (InMemoryHistoryStore, String) {
        let store = InMemoryHistoryStore::new();
        let history: Vec<Message> = (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user("u".repeat(chars_each))
                } else {
                    Message::assistant("a".repeat(chars_each))
                }
            })
            .collect();
        let chat_id = store
            .create("acct", Some("chat-1"), None)
            .await
            .expect("create");
        store.save(&chat_id, "acct", history).await.expect("save");
        (store, chat_id)
    }

    #[tokio::test]
    async fn context_exceeded_retries_once_and_persists_untrimmed_history() {
        // 49 stored messages + 1 new = 50 messages of 100 chars: 5000
        // chars, over the mock's 2000-char window.
        let (store, chat_id) = seeded_store(49, 100).await;
        let backend = Arc::new(
            MockBackend::completing("The answer is forty-two.").with_context_limit(2000),
        );
        let producer = producer(&backend, &store);

        let request = TurnRequest::new("acct")
            .with_chat_id(&chat_id)
            .with_message(Message::user("u".repeat(100)))
            .with_model_id("m-test");

        let turn = producer
            .run_turn(request, CancellationToken::new())
            .await
            .expect("retry should succeed");
        let events: Vec<StreamEvent> = turn.collect().await;
        assert!(matches!(events.last(), Some(event) if event.is_finish()));

        // Exactly one retry, with a payload that fits the budget.
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].total_chars, 5000);
        assert!(calls[1].total_chars <= 2000);
        assert!(calls[1].message_count < calls[0].message_count);

        // The original 50 messages (not the trimmed payload) plus the new
        // assistant reply are what got persisted.
        let persisted = store
            .load(&chat_id, "acct")
            .await
            .expect("load")
            .expect("chat exists");
        assert_eq!(persisted.len(), 51);

        let reply = persisted.last().expect("assistant reply");
        assert!(reply.is_assistant());
        assert_eq!(reply.text(), "The answer is forty-two.");
        assert_eq!(
            reply.metadata.model.as_ref().map(|m| m.id.as_str()),
            Some("m-test")
        );
        assert_eq!(
            reply.metadata.assistant_display_name.as_deref(),
            Some("Test Model")
        );
        assert_eq!(
            reply.metadata.assistant_image_url.as_deref(),
            Some("https://models/test.png")
        );
        assert!(reply.metadata.total_tokens.is_some());
    }

    #[tokio::test]
    async fn non_context_errors_are_not_retried() {
        let store = InMemoryHistoryStore::new();
        let backend = Arc::new(MockBackend::rejecting("rate limit exceeded"));
        let producer = producer(&backend, &store);

        let request = TurnRequest::new("acct").with_message(Message::user("hello"));
        let error = producer
            .run_turn(request, CancellationToken::new())
            .await
            .expect_err("terminal error should propagate");

        assert!(!error.is_context_exceeded());
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn second_context_failure_propagates() {
        // A single message over the retry ceiling cannot be trimmed into
        // compliance: both attempts fail.
        let store = InMemoryHistoryStore::new();
        let backend = Arc::new(MockBackend::completing("ok").with_context_limit(100));
        let producer = producer(&backend, &store);

        let request = TurnRequest::new("acct").with_message(Message::user("x".repeat(5000)));
        let error = producer
            .run_turn(request, CancellationToken::new())
            .await
            .expect_err("retry should also fail");

        assert!(error.is_context_exceeded());
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn first_message_creates_the_chat() {
        let store = InMemoryHistoryStore::new();
        let backend = Arc::new(MockBackend::completing("hi there"));
        let producer = producer(&backend, &store);

        let request = TurnRequest::new("acct").with_message(Message::user("hello"));
        let turn = producer
            .run_turn(request, CancellationToken::new())
            .await
            .expect("turn should start");
        let chat_id = turn.chat_id().to_owned();
        let _: Vec<StreamEvent> = turn.collect().await;

        let persisted = store
            .load(&chat_id, "acct")
            .await
            .expect("load")
            .expect("chat was created");
        assert_eq!(persisted.len(), 2);
        assert!(persisted[0].is_user());
        assert!(persisted[1].is_assistant());
    }

    #[tokio::test]
    async fn full_replacement_payload_is_used_verbatim() {
        let store = InMemoryHistoryStore::new();
        let backend = Arc::new(MockBackend::completing("ack"));
        let producer = producer(&backend, &store);

        let replacement = vec![
            Message::system("be brief"),
            Message::user("one"),
            Message::assistant("1"),
            Message::user("two"),
        ];
        let request = TurnRequest::new("acct").with_messages(replacement.clone());
        let turn = producer
            .run_turn(request, CancellationToken::new())
            .await
            .expect("turn should start");
        let chat_id = turn.chat_id().to_owned();
        let _: Vec<StreamEvent> = turn.collect().await;

        assert_eq!(backend.calls()[0].message_count, 4);
        let persisted = store
            .load(&chat_id, "acct")
            .await
            .expect("load")
            .expect("chat was created");
        assert_eq!(persisted.len(), 5);
        assert_eq!(persisted[0].id, replacement[0].id);
    }

    #[tokio::test]
    async fn mid_stream_failure_closes_without_finish_and_persists_nothing() {
        let store = InMemoryHistoryStore::new();
        let backend = Arc::new(
            MockBackend::scripted([
                StreamEvent::start("m1"),
                StreamEvent::text_delta("partial"),
            ])
            .then_failing("connection reset"),
        );
        let producer = producer(&backend, &store);

        let request = TurnRequest::new("acct").with_message(Message::user("hello"));
        let turn = producer
            .run_turn(request, CancellationToken::new())
            .await
            .expect("turn should start");
        let chat_id = turn.chat_id().to_owned();
        let events: Vec<StreamEvent> = turn.collect().await;

        assert!(!events.iter().any(StreamEvent::is_finish));

        // The chat exists (created on first message) but holds only the
        // user message: nothing was persisted for the failed turn.
        let persisted = store
            .load(&chat_id, "acct")
            .await
            .expect("load")
            .expect("chat exists");
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream_without_finish() {
        let store = InMemoryHistoryStore::new();
        let backend = Arc::new(
            MockBackend::scripted([
                StreamEvent::start("m1"),
                StreamEvent::text_delta("streaming"),
            ])
            .then_stalling(),
        );
        let producer = producer(&backend, &store);
        let cancel = CancellationToken::new();

        let request = TurnRequest::new("acct").with_message(Message::user("hello"));
        let mut turn = producer
            .run_turn(request, cancel.clone())
            .await
            .expect("turn should start");

        assert!(matches!(
            turn.next().await,
            Some(StreamEvent::Start { .. })
        ));
        assert!(matches!(turn.next().await, Some(StreamEvent::Text { .. })));

        cancel.cancel();
        assert_eq!(turn.next().await, None);
    }

    #[tokio::test]
    async fn missing_payload_is_rejected() {
        let store = InMemoryHistoryStore::new();
        let backend = Arc::new(MockBackend::completing("unused"));
        let producer = producer(&backend, &store);

        let error = producer
            .run_turn(TurnRequest::new("acct"), CancellationToken::new())
            .await
            .expect_err("empty request should be rejected");
        assert!(matches!(error, Error::InvalidRequest(_)));
    }
}
