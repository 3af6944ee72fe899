//! Resolving the model to invoke for a turn.
//!
//! Resolution is read-only and infallible: rather than failing the turn,
//! it degrades step by step down to a synthetic descriptor built from the
//! configured fallback name. The resolved descriptor is denormalized into
//! the assistant message's metadata so transcripts stay displayable after
//! models are renamed or removed.

use std::sync::Arc;

use async_trait::async_trait;
use colloquy_core::message::{Message, ModelDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TRACING_TARGET;

/// Metadata key names under which providers report a context-window
/// size, in preference order.
const CONTEXT_KEYS: [&str; 4] = ["context_window", "contextWindow", "context", "max_context"];

/// A model known to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Backend model identifier.
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Avatar URL for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    /// Free-form provider info (context window hints live here).
    #[serde(default)]
    pub metadata: Value,
}

impl ModelEntry {
    /// Creates an entry with the given id and name and no metadata.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            profile_image_url: None,
            metadata: Value::Null,
        }
    }

    /// Sets the provider metadata blob.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the profile image URL.
    pub fn with_profile_image(mut self, url: impl Into<String>) -> Self {
        self.profile_image_url = Some(url.into());
        self
    }

    /// Builds the denormalized descriptor for this entry.
    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            profile_image_url: self.profile_image_url.clone(),
        }
    }

    /// Extracts the context-window size from the provider metadata.
    ///
    /// Providers are inconsistent about where they report this, so
    /// several key spellings are tolerated, at the top level first and
    /// then nested under `details`; the first present wins.
    pub fn context_tokens(&self) -> Option<u32> {
        let object = self.metadata.as_object()?;
        for key in CONTEXT_KEYS {
            if let Some(tokens) = object.get(key).and_then(Value::as_u64) {
                return u32::try_from(tokens).ok();
            }
        }
        let details = object.get("details")?.as_object()?;
        for key in CONTEXT_KEYS {
            if let Some(tokens) = details.get(key).and_then(Value::as_u64) {
                return u32::try_from(tokens).ok();
            }
        }
        None
    }
}

/// Lookup of known models (external collaborator).
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Returns the entry for a model id, if known.
    async fn get(&self, model_id: &str) -> Option<ModelEntry>;

    /// Returns the entry whose name matches, if any.
    async fn find_by_name(&self, name: &str) -> Option<ModelEntry>;
}

/// Per-account model visibility (external collaborator).
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Returns true if the account may request this model explicitly.
    async fn can_read_model(&self, account_id: &str, model_id: &str) -> bool;
}

/// Access policy that permits everything; suitable for single-tenant
/// deployments and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessPolicy for AllowAll {
    async fn can_read_model(&self, _account_id: &str, _model_id: &str) -> bool {
        true
    }
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: Vec<ModelEntry>,
}

impl StaticCatalog {
    /// Creates a catalog over the given entries.
    pub fn new(entries: Vec<ModelEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl ModelCatalog for StaticCatalog {
    async fn get(&self, model_id: &str) -> Option<ModelEntry> {
        self.entries.iter().find(|entry| entry.id == model_id).cloned()
    }

    async fn find_by_name(&self, name: &str) -> Option<ModelEntry> {
        self.entries.iter().find(|entry| entry.name == name).cloned()
    }
}

/// Outcome of model resolution for one turn.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    /// Descriptor stamped into the assistant message metadata.
    pub descriptor: ModelDescriptor,
    /// Context-window size in tokens, when the catalog knows it.
    pub context_tokens: Option<u32>,
}

impl ResolvedModel {
    fn from_entry(entry: &ModelEntry) -> Self {
        Self {
            descriptor: entry.descriptor(),
            context_tokens: entry.context_tokens(),
        }
    }
}

/// Turns a requested model id (or historical message metadata) into a
/// concrete descriptor plus an optional context-window size.
#[derive(Clone)]
pub struct ModelResolver {
    catalog: Arc<dyn ModelCatalog>,
    access: Arc<dyn AccessPolicy>,
}

impl ModelResolver {
    /// Creates a resolver over a catalog and an access policy.
    pub fn new(catalog: Arc<dyn ModelCatalog>, access: Arc<dyn AccessPolicy>) -> Self {
        Self { catalog, access }
    }

    /// Resolves the model for a turn; first match wins.
    ///
    /// 1. The explicit `requested_id`, if the account is authorized to
    ///    read it (an authorized id unknown to the catalog still wins,
    ///    with a synthetic descriptor and no context size).
    /// 2. The `model` on the most recent user message's metadata,
    ///    scanned newest-first.
    /// 3. A catalog lookup by `fallback_name`.
    /// 4. A synthetic descriptor from the raw fallback name.
    pub async fn resolve(
        &self,
        requested_id: Option<&str>,
        messages: &[Message],
        fallback_name: &str,
        account_id: &str,
    ) -> ResolvedModel {
        if let Some(requested_id) = requested_id {
            if self.access.can_read_model(account_id, requested_id).await {
                if let Some(entry) = self.catalog.get(requested_id).await {
                    return ResolvedModel::from_entry(&entry);
                }
                tracing::debug!(
                    target: TRACING_TARGET,
                    model_id = requested_id,
                    "Requested model not in catalog, using synthetic descriptor"
                );
                return ResolvedModel {
                    descriptor: ModelDescriptor::synthetic(requested_id),
                    context_tokens: None,
                };
            }
            tracing::debug!(
                target: TRACING_TARGET,
                model_id = requested_id,
                "Requested model not readable by account, falling back"
            );
        }

        for message in messages.iter().rev() {
            if !message.is_user() {
                continue;
            }
            let Some(model) = &message.metadata.model else {
                continue;
            };
            if let Some(entry) = self.catalog.get(&model.id).await {
                return ResolvedModel::from_entry(&entry);
            }
            return ResolvedModel {
                descriptor: model.clone(),
                context_tokens: None,
            };
        }

        if let Some(entry) = self.catalog.find_by_name(fallback_name).await {
            return ResolvedModel::from_entry(&entry);
        }

        ResolvedModel {
            descriptor: ModelDescriptor::synthetic(fallback_name),
            context_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct DenyAll;

    #[async_trait]
    impl AccessPolicy for DenyAll {
        async fn can_read_model(&self, _account_id: &str, _model_id: &str) -> bool {
            false
        }
    }

    fn catalog() -> Arc<StaticCatalog> {
        Arc::new(StaticCatalog::new(vec![
            ModelEntry::new("m-large", "Large")
                .with_metadata(json!({"context_window": 32768}))
                .with_profile_image("https://models/large.png"),
            ModelEntry::new("m-small", "Small").with_metadata(json!({"details": {"context": 4096}})),
        ]))
    }

    fn resolver(access: Arc<dyn AccessPolicy>) -> ModelResolver {
        ModelResolver::new(catalog(), access)
    }

    #[tokio::test]
    async fn explicit_id_wins_when_authorized() {
        let resolved = resolver(Arc::new(AllowAll))
            .resolve(Some("m-large"), &[], "fallback", "acct")
            .await;
        assert_eq!(resolved.descriptor.id, "m-large");
        assert_eq!(resolved.context_tokens, Some(32768));
    }

    #[tokio::test]
    async fn unauthorized_explicit_id_falls_through() {
        let history = vec![Message::user("hi").with_model(ModelDescriptor::new("m-small", "Small"))];
        let resolved = resolver(Arc::new(DenyAll))
            .resolve(Some("m-large"), &history, "fallback", "acct")
            .await;
        assert_eq!(resolved.descriptor.id, "m-small");
        assert_eq!(resolved.context_tokens, Some(4096));
    }

    #[tokio::test]
    async fn history_metadata_is_scanned_newest_first() {
        let history = vec![
            Message::user("old").with_model(ModelDescriptor::new("m-small", "Small")),
            Message::assistant("reply"),
            Message::user("new").with_model(ModelDescriptor::new("m-large", "Large")),
        ];
        let resolved = resolver(Arc::new(AllowAll))
            .resolve(None, &history, "fallback", "acct")
            .await;
        assert_eq!(resolved.descriptor.id, "m-large");
    }

    #[tokio::test]
    async fn historical_model_missing_from_catalog_keeps_descriptor() {
        let history =
            vec![Message::user("hi").with_model(ModelDescriptor::new("m-retired", "Retired"))];
        let resolved = resolver(Arc::new(AllowAll))
            .resolve(None, &history, "fallback", "acct")
            .await;
        assert_eq!(resolved.descriptor.id, "m-retired");
        assert_eq!(resolved.context_tokens, None);
    }

    #[tokio::test]
    async fn falls_back_to_name_lookup_then_synthetic() {
        let resolver = resolver(Arc::new(AllowAll));

        let by_name = resolver.resolve(None, &[], "Small", "acct").await;
        assert_eq!(by_name.descriptor.id, "m-small");

        let synthetic = resolver.resolve(None, &[], "house-model", "acct").await;
        assert_eq!(synthetic.descriptor.id, "house-model");
        assert_eq!(synthetic.descriptor.name, "house-model");
        assert_eq!(synthetic.descriptor.profile_image_url, None);
        assert_eq!(synthetic.context_tokens, None);
    }

    #[test]
    fn context_tokens_tolerates_key_spellings() {
        for metadata in [
            json!({"context_window": 1024}),
            json!({"contextWindow": 1024}),
            json!({"context": 1024}),
            json!({"max_context": 1024}),
            json!({"details": {"max_context": 1024}}),
        ] {
            let entry = ModelEntry::new("m", "M").with_metadata(metadata.clone());
            assert_eq!(entry.context_tokens(), Some(1024), "{metadata}");
        }

        let top_level_wins = ModelEntry::new("m", "M")
            .with_metadata(json!({"context": 2048, "details": {"context": 1024}}));
        assert_eq!(top_level_wins.context_tokens(), Some(2048));

        let none = ModelEntry::new("m", "M").with_metadata(json!({"unrelated": true}));
        assert_eq!(none.context_tokens(), None);
    }
}
