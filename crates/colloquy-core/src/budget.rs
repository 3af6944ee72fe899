//! Context-budget policy derived from a model's context window.
//!
//! The policy is recomputed per turn and never persisted: a model's
//! context window (in tokens) is converted to a character ceiling with a
//! fixed chars-per-token estimate and a safety margin, and the trimmer in
//! `colloquy-chat` fits the history under that ceiling.

use serde::{Deserialize, Serialize};

/// Context-window assumption when a model reports none.
pub const DEFAULT_CONTEXT_TOKENS: u32 = 8192;

/// Rough estimate of characters per token.
pub const APPROX_CHARS_PER_TOKEN: usize = 4;

/// Fraction of the context window the history is allowed to fill.
pub const CONTEXT_UTILIZATION: f64 = 0.8;

/// Minimum recent tail preserved on the context-exceeded retry path.
pub const RETRY_MIN_TAIL_MESSAGES: usize = 8;

/// Per-message text ceiling applied before trimming on the retry path.
pub const RETRY_TEXT_CEILING: usize = 4000;

/// Character budget and tail policy for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Character ceiling for the outbound history.
    pub max_chars: usize,
    /// Number of most-recent non-system messages kept preferentially.
    pub min_tail_messages: usize,
}

impl BudgetPolicy {
    /// Derives a policy from a context-window size in tokens.
    pub fn for_context_tokens(context_tokens: u32) -> Self {
        let raw = context_tokens as f64 * APPROX_CHARS_PER_TOKEN as f64 * CONTEXT_UTILIZATION;
        Self {
            max_chars: raw as usize,
            min_tail_messages: RETRY_MIN_TAIL_MESSAGES,
        }
    }

    /// Overrides the preserved tail length.
    pub fn with_min_tail(mut self, min_tail_messages: usize) -> Self {
        self.min_tail_messages = min_tail_messages;
        self
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self::for_context_tokens(DEFAULT_CONTEXT_TOKENS)
    }
}
