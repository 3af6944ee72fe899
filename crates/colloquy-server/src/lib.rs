#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;
mod extract;
pub mod handler;
mod service;

pub use error::{Error, ErrorKind, Result};
pub use extract::{AccountContext, AuthState};
pub use service::ServiceState;
