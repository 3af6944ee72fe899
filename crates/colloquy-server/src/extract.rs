//! Request extractors.
//!
//! Authentication and session issuance are external to this crate: the
//! deployment wraps the router in its own auth middleware, which installs
//! an [`AccountContext`] request extension. [`AuthState`] extracts it and
//! turns its absence into a 401.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::{Error, ErrorKind};

/// Identity of the authenticated account, installed by the (external)
/// auth middleware as a request extension.
#[derive(Debug, Clone)]
pub struct AccountContext {
    /// Opaque account identifier.
    pub account_id: String,
}

impl AccountContext {
    /// Creates a context for the given account.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

/// Extractor for the authenticated account.
#[derive(Debug, Clone)]
pub struct AuthState(pub AccountContext);

impl<S> FromRequestParts<S> for AuthState
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccountContext>()
            .cloned()
            .map(AuthState)
            .ok_or_else(|| {
                ErrorKind::Unauthorized.with_context("authentication middleware did not run")
            })
    }
}
