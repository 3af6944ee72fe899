//! Shared service state for the HTTP handlers.

use std::sync::Arc;

use colloquy_chat::{
    AccessPolicy, ChatBackend, ChatProducer, HistoryStore, ModelCatalog, ModelResolver,
    ProducerConfig,
};

/// Cloneable state handed to every handler.
#[derive(Clone)]
pub struct ServiceState {
    producer: Arc<ChatProducer>,
}

impl ServiceState {
    /// Creates state around an existing producer.
    pub fn new(producer: ChatProducer) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// Wires a producer from its external collaborators.
    pub fn from_parts(
        store: Arc<dyn HistoryStore>,
        backend: Arc<dyn ChatBackend>,
        catalog: Arc<dyn ModelCatalog>,
        access: Arc<dyn AccessPolicy>,
        config: ProducerConfig,
    ) -> Self {
        let resolver = ModelResolver::new(catalog, access);
        Self::new(ChatProducer::new(store, backend, resolver, config))
    }

    /// Returns the turn producer.
    pub fn producer(&self) -> &ChatProducer {
        &self.producer
    }
}
