#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod assemble;
pub mod budget;
mod error;
pub mod event;
pub mod message;
pub mod wire;

pub use error::{BoxedError, Error, ErrorKind, Result};

/// Tracing target for the core library.
pub const TRACING_TARGET: &str = "colloquy_core";
