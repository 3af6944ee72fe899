//! All `axum::`[`Router`]s with related `axum::`[`Handler`]s.
//!
//! [`Router`]: axum::routing::Router
//! [`Handler`]: axum::handler::Handler

mod chat;
pub mod request;
pub mod response;

use axum::Router;

use crate::ServiceState;

/// Returns a [`Router`] with all API routes.
///
/// [`Router`]: axum::routing::Router
pub fn routes() -> Router<ServiceState> {
    Router::new().merge(chat::routes())
}
