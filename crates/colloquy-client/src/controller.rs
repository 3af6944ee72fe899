//! Cancellation ownership and the turn outcome policy.
//!
//! A single in-flight exchange owns one cancellation token. Starting a
//! new turn for the same chat silently cancels any still-open previous
//! exchange *before* the new turn's first network call; user-initiated
//! stop cancels the current one. An aborted exchange is not an
//! application error: no transcript rollback, no user-visible failure.
//! Any other failure rolls the optimistic local messages back out and
//! surfaces a single retryable error.

use std::pin::pin;

use colloquy_core::event::StreamEvent;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{Error, TRACING_TARGET, Transcript, TurnReconciler};

/// Owns the abort signal for the in-flight exchange (single-flight).
#[derive(Debug, Default)]
pub struct TurnController {
    current: Option<CancellationToken>,
}

impl TurnController {
    /// Creates a controller with no in-flight turn.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new turn, cancelling any still-open previous exchange
    /// first, and returns the new turn's token.
    pub fn begin(&mut self) -> CancellationToken {
        if let Some(previous) = self.current.take() {
            tracing::debug!(
                target: TRACING_TARGET,
                "Superseding in-flight turn"
            );
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.current = Some(token.clone());
        token
    }

    /// Cancels the in-flight turn, if any. Idempotent: aborting an
    /// already-cancelled or absent turn is a no-op.
    pub fn abort(&self) {
        if let Some(current) = &self.current {
            current.cancel();
        }
    }

    /// Returns true while a non-cancelled turn is in flight.
    pub fn is_active(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

/// How one driven turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// `finish` arrived; the transcript holds the complete reply and the
    /// server has already persisted it.
    Completed,
    /// The exchange was aborted; the partial reply is left in place.
    Cancelled,
    /// Terminal failure; optimistic messages were rolled back.
    Failed(Error),
}

impl TurnOutcome {
    /// Returns true if the turn completed normally.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if the turn was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Drives one turn's event stream into the transcript.
///
/// `rollback_len` is the transcript length from before any optimistic
/// append for this turn; on terminal failure the transcript is truncated
/// back to it. Cancellation, whether observed through the token or as a
/// read failure after the token fired, is not treated as a failure and
/// performs no rollback.
pub async fn drive_turn<S>(
    transcript: &mut Transcript,
    rollback_len: usize,
    events: S,
    cancel: &CancellationToken,
) -> TurnOutcome
where
    S: Stream<Item = Result<StreamEvent, Error>>,
{
    let mut reconciler = TurnReconciler::new();
    let mut events = pin!(events);

    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!(target: TRACING_TARGET, "Turn aborted by caller");
                return TurnOutcome::Cancelled;
            }

            item = events.next() => item,
        };

        match item {
            Some(Ok(event)) => {
                reconciler.apply(transcript, &event);
                if reconciler.is_finished() {
                    return TurnOutcome::Completed;
                }
            }
            Some(Err(error)) => {
                if cancel.is_cancelled() {
                    return TurnOutcome::Cancelled;
                }
                tracing::warn!(
                    target: TRACING_TARGET,
                    error = %error,
                    "Turn failed, rolling back optimistic messages"
                );
                transcript.truncate(rollback_len);
                return TurnOutcome::Failed(error);
            }
            None => {
                if cancel.is_cancelled() {
                    return TurnOutcome::Cancelled;
                }
                transcript.truncate(rollback_len);
                return TurnOutcome::Failed(Error::protocol(
                    "stream ended before finish",
                ));
            }
        }
    }
}
