//! Chat turn handler.
//!
//! ## Streaming
//!
//! `POST /api/chat/completions` answers with Server-Sent Events: each
//! frame's data is one protocol record (see `colloquy_core::wire`), and a
//! final `[DONE]` frame follows `finish`. Clients cancel generation by
//! closing the connection (e.g. `AbortController` in a browser); the
//! handler propagates the disconnect to the producer's cancellation
//! token.

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use colloquy_core::wire;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::extract::AuthState;
use crate::handler::request::SendChatMessage;
use crate::handler::response::HealthStatus;
use crate::service::ServiceState;
use crate::{ErrorKind, Result};

/// Tracing target for chat turn operations.
const TRACING_TARGET: &str = "colloquy_server::handler::chat";

/// Runs one chat turn and streams the response.
#[tracing::instrument(
    skip_all,
    fields(
        account_id = %auth_state.0.account_id,
        chat_id = request.chat_id.as_deref().unwrap_or("<new>"),
    )
)]
async fn send_message(
    State(state): State<ServiceState>,
    auth_state: AuthState,
    Json(request): Json<SendChatMessage>,
) -> Result<impl IntoResponse> {
    tracing::debug!(target: TRACING_TARGET, "Starting chat turn");

    request.validate_payload()?;

    let cancel = CancellationToken::new();
    let turn = state
        .producer()
        .run_turn(
            request.into_turn_request(&auth_state.0.account_id),
            cancel.clone(),
        )
        .await
        .map_err(|error| {
            tracing::error!(target: TRACING_TARGET, error = %error, "Failed to start chat turn");
            match error {
                colloquy_chat::Error::InvalidRequest(message) => {
                    ErrorKind::BadRequest.with_message(message)
                }
                other => ErrorKind::InternalServerError
                    .with_message("Failed to start chat.")
                    .with_context(other.to_string()),
            }
        })?;

    let chat_id = turn.chat_id().to_owned();
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(32);

    // Pump producer events into SSE frames; a failed send means the
    // client disconnected, which cancels the in-flight exchange.
    tokio::spawn(async move {
        let mut turn = std::pin::pin!(turn);
        let mut finished = false;

        while let Some(event) = turn.next().await {
            finished = event.is_finish();
            let frame = match wire::encode_frame(&event) {
                Ok(json) => Event::default().data(json),
                Err(error) => {
                    tracing::error!(
                        target: TRACING_TARGET,
                        chat_id = %chat_id,
                        error = %error,
                        "Failed to serialize stream event"
                    );
                    continue;
                }
            };

            if tx.send(Ok(frame)).await.is_err() {
                tracing::info!(
                    target: TRACING_TARGET,
                    chat_id = %chat_id,
                    "Client disconnected, cancelling chat turn"
                );
                cancel.cancel();
                return;
            }
        }

        // The marker only follows a complete turn; an abnormal close
        // without `finish` is the client's terminal-failure signal.
        if finished {
            let _ = tx.send(Ok(Event::default().data(wire::DONE_MARKER))).await;
        }

        tracing::debug!(
            target: TRACING_TARGET,
            chat_id = %chat_id,
            "Chat turn stream completed"
        );
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// Reports process liveness.
async fn health() -> Json<HealthStatus> {
    Json(HealthStatus::ok())
}

/// Returns a [`Router`] with all related routes.
///
/// [`Router`]: axum::routing::Router
pub fn routes() -> axum::Router<ServiceState> {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/chat/completions", post(send_message))
        .route("/api/health", get(health))
}
