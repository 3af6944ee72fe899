//! Persisted transcript access.
//!
//! The producer treats the history store as an atomic read/replace: it
//! loads the full transcript, appends, and saves the full transcript
//! back. There is no optimistic-concurrency token: `save` is last writer
//! wins, and concurrent turns on one chat id are prevented only by the
//! client-side single-flight cancellation. This is a known consistency
//! gap carried over deliberately; see DESIGN.md.

use std::collections::HashMap;

use async_trait::async_trait;
use colloquy_core::message::Message;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Result;

/// Storage for per-chat transcripts (external collaborator).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Returns true if the chat exists and belongs to the account.
    async fn exists(&self, chat_id: &str, account_id: &str) -> Result<bool>;

    /// Creates a chat, optionally with a caller-chosen id and an initial
    /// message, and returns the chat id.
    async fn create(
        &self,
        account_id: &str,
        chat_id: Option<&str>,
        initial: Option<Message>,
    ) -> Result<String>;

    /// Loads the transcript, or `None` if the chat does not exist.
    async fn load(&self, chat_id: &str, account_id: &str) -> Result<Option<Vec<Message>>>;

    /// Replaces the transcript wholesale.
    async fn save(&self, chat_id: &str, account_id: &str, messages: Vec<Message>) -> Result<()>;
}

/// In-memory history store for wiring, demos, and tests.
///
/// Cheap to clone; all clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryStore {
    chats: std::sync::Arc<RwLock<HashMap<(String, String), Vec<Message>>>>,
}

impl InMemoryHistoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(account_id: &str, chat_id: &str) -> (String, String) {
        (account_id.to_owned(), chat_id.to_owned())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn exists(&self, chat_id: &str, account_id: &str) -> Result<bool> {
        let chats = self.chats.read().await;
        Ok(chats.contains_key(&Self::key(account_id, chat_id)))
    }

    async fn create(
        &self,
        account_id: &str,
        chat_id: Option<&str>,
        initial: Option<Message>,
    ) -> Result<String> {
        let chat_id = chat_id
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let messages = initial.into_iter().collect();

        let mut chats = self.chats.write().await;
        chats.insert(Self::key(account_id, &chat_id), messages);
        Ok(chat_id)
    }

    async fn load(&self, chat_id: &str, account_id: &str) -> Result<Option<Vec<Message>>> {
        let chats = self.chats.read().await;
        Ok(chats.get(&Self::key(account_id, chat_id)).cloned())
    }

    async fn save(&self, chat_id: &str, account_id: &str, messages: Vec<Message>) -> Result<()> {
        let mut chats = self.chats.write().await;
        chats.insert(Self::key(account_id, chat_id), messages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_load_save_round_trip() {
        let store = InMemoryHistoryStore::new();

        let chat_id = store
            .create("acct", None, Some(Message::user("hello")))
            .await
            .expect("create should succeed");
        assert!(store.exists(&chat_id, "acct").await.expect("exists"));

        let mut history = store
            .load(&chat_id, "acct")
            .await
            .expect("load should succeed")
            .expect("chat should exist");
        assert_eq!(history.len(), 1);

        history.push(Message::assistant("hi"));
        store
            .save(&chat_id, "acct", history)
            .await
            .expect("save should succeed");

        let reloaded = store
            .load(&chat_id, "acct")
            .await
            .expect("load should succeed")
            .expect("chat should exist");
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn chats_are_scoped_per_account() {
        let store = InMemoryHistoryStore::new();
        let chat_id = store
            .create("alice", Some("c1"), None)
            .await
            .expect("create should succeed");

        assert!(store.exists(&chat_id, "alice").await.expect("exists"));
        assert!(!store.exists(&chat_id, "bob").await.expect("exists"));
        assert_eq!(store.load(&chat_id, "bob").await.expect("load"), None);
    }
}
