#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod controller;
mod error;
mod fetch;
mod reader;
mod reconciler;
mod transcript;

pub use controller::{TurnController, TurnOutcome, drive_turn};
pub use error::{Error, Result};
pub use fetch::ChatTransport;
pub use reader::event_stream;
pub use reconciler::TurnReconciler;
pub use transcript::Transcript;

/// Tracing target for the client library.
pub const TRACING_TARGET: &str = "colloquy_client";
