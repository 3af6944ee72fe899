#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod backend;
mod error;
mod history;
mod producer;
pub mod resolver;
pub mod trim;

pub use backend::{ChatBackend, EventStream, TurnOptions};
#[cfg(feature = "test-utils")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub use backend::{MockBackend, MockCall};
pub use error::{Error, Result};
pub use history::{HistoryStore, InMemoryHistoryStore};
pub use producer::{ChatProducer, ProducerConfig, TurnRequest, TurnStream};
pub use resolver::{AccessPolicy, AllowAll, ModelCatalog, ModelEntry, ModelResolver, ResolvedModel, StaticCatalog};

/// Tracing target for the producer library.
pub const TRACING_TARGET: &str = "colloquy_chat";
