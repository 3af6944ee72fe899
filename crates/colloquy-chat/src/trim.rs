//! Fitting a message history under a character budget.
//!
//! The trimmer only ever drops whole messages: truncating inside a
//! message risks cutting a tool call in half or losing coherence, so a
//! single message that alone exceeds the budget is still emitted whole
//! and the overflow surfaces upstream as a potential provider-side
//! rejection. The companion [`cap_text_parts`] bounds worst-case payload
//! size independently on the retry path.

use std::collections::VecDeque;

use colloquy_core::message::{Message, MessagePart};

use crate::TRACING_TARGET;

/// Fits `messages` under `max_chars`, preserving structure.
///
/// The first system message is preserved unconditionally and never counts
/// against the tail. The most recent `min_tail` non-system messages form
/// the starting tail; its oldest entries are dropped while the total
/// (system + tail) exceeds the budget, but the tail is never emptied.
/// If the trimmed tail leaves room, older messages are re-admitted
/// newest-to-oldest until the first one that would overflow. Output is
/// always an order-preserving subsequence of the input, and character
/// accounting covers text parts only.
pub fn trim_messages(messages: &[Message], max_chars: usize, min_tail: usize) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    let system_pos = messages.iter().position(Message::is_system);
    let system = system_pos.map(|index| &messages[index]);
    let rest: Vec<&Message> = messages
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != system_pos)
        .map(|(_, message)| message)
        .collect();

    if rest.is_empty() {
        return system.into_iter().cloned().collect();
    }

    let system_chars = system.map(Message::text_len).unwrap_or(0);
    let tail_start = rest.len().saturating_sub(min_tail.max(1));
    let head = &rest[..tail_start];
    let mut tail: VecDeque<&Message> = rest[tail_start..].iter().copied().collect();

    let mut tail_chars: usize = tail.iter().map(|message| message.text_len()).sum();
    while tail.len() > 1 && system_chars + tail_chars > max_chars {
        if let Some(dropped) = tail.pop_front() {
            tail_chars -= dropped.text_len();
        }
    }

    let mut total = system_chars + tail_chars;
    let mut admitted: Vec<&Message> = Vec::new();
    if total <= max_chars {
        for candidate in head.iter().rev() {
            let chars = candidate.text_len();
            if total + chars > max_chars {
                break;
            }
            total += chars;
            admitted.push(candidate);
        }
    }
    admitted.reverse();

    if admitted.len() < head.len() {
        tracing::debug!(
            target: TRACING_TARGET,
            dropped = head.len() - admitted.len(),
            kept = admitted.len() + tail.len(),
            max_chars,
            "Trimmed history to fit context budget"
        );
    }

    let mut output = Vec::with_capacity(1 + admitted.len() + tail.len());
    if let Some(system) = system {
        output.push(system.clone());
    }
    output.extend(admitted.into_iter().cloned());
    output.extend(tail.into_iter().cloned());
    output
}

/// Caps each message's concatenated text at `ceiling` characters and
/// drops non-text parts.
///
/// Applied before [`trim_messages`] on the context-exceeded retry path to
/// bound the worst-case payload independently of the trimmer (which never
/// cuts inside a message).
pub fn cap_text_parts(messages: &[Message], ceiling: usize) -> Vec<Message> {
    messages
        .iter()
        .map(|message| {
            let text = message.text();
            let capped = if text.chars().count() > ceiling {
                text.chars().take(ceiling).collect()
            } else {
                text
            };
            Message {
                id: message.id.clone(),
                role: message.role,
                parts: vec![MessagePart::text(capped)],
                metadata: message.metadata.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> Message {
        Message::user(text)
    }

    fn total_chars(messages: &[Message]) -> usize {
        messages.iter().map(Message::text_len).sum()
    }

    fn is_subsequence(output: &[Message], input: &[Message]) -> bool {
        let mut cursor = input.iter();
        output
            .iter()
            .all(|needle| cursor.any(|candidate| candidate.id == needle.id))
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(trim_messages(&[], 100, 4).is_empty());
    }

    #[test]
    fn under_budget_history_is_untouched() {
        let messages = vec![user("one"), user("two"), user("three")];
        let trimmed = trim_messages(&messages, 1000, 2);
        assert_eq!(trimmed, messages);
    }

    #[test]
    fn system_message_is_always_preserved() {
        let messages = vec![
            Message::system("rules"),
            user("aaaaaaaaaa"),
            user("bbbbbbbbbb"),
            user("cccccccccc"),
        ];
        // Budget fits the system message plus one tail message.
        let trimmed = trim_messages(&messages, 16, 1);
        assert!(trimmed[0].is_system());
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[1].id, messages[3].id);
    }

    #[test]
    fn tail_drops_from_oldest_end() {
        let messages = vec![user("aaaa"), user("bbbb"), user("cccc"), user("dddd")];
        let trimmed = trim_messages(&messages, 8, 4);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].id, messages[2].id);
        assert_eq!(trimmed[1].id, messages[3].id);
    }

    #[test]
    fn head_is_readmitted_newest_first_until_first_overflow() {
        let messages = vec![
            user("aaaa"),     // 4 chars, would overflow: admission stops here
            user("bb"),       // 2 chars, admitted
            user("cccc"),     // tail
            user("dd"),       // tail
        ];
        let trimmed = trim_messages(&messages, 9, 2);
        let ids: Vec<&str> = trimmed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                messages[1].id.as_str(),
                messages[2].id.as_str(),
                messages[3].id.as_str()
            ]
        );
        assert!(total_chars(&trimmed) <= 9);
    }

    #[test]
    fn single_oversized_message_is_emitted_whole() {
        let big = user(&"x".repeat(500));
        let trimmed = trim_messages(std::slice::from_ref(&big), 100, 4);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].text_len(), 500);
    }

    #[test]
    fn oversized_tail_collapses_to_minimal_suffix() {
        let messages = vec![
            user(&"a".repeat(300)),
            user(&"b".repeat(300)),
            user(&"c".repeat(300)),
        ];
        let trimmed = trim_messages(&messages, 100, 3);
        // Still over budget, but never an empty result: the newest
        // message survives alone.
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].id, messages[2].id);
    }

    #[test]
    fn budget_invariant_holds_when_tail_fits() {
        let messages: Vec<Message> = (0..20).map(|i| user(&format!("message {i:02}"))).collect();
        for max_chars in [30, 60, 90, 200] {
            let trimmed = trim_messages(&messages, max_chars, 4);
            let tail_chars: usize = messages[16..].iter().map(Message::text_len).sum();
            if tail_chars <= max_chars {
                assert!(
                    total_chars(&trimmed) <= max_chars,
                    "budget violated at max_chars={max_chars}"
                );
            }
        }
    }

    #[test]
    fn trim_is_idempotent() {
        let messages: Vec<Message> = (0..12)
            .map(|i| user(&"z".repeat(10 + i * 3)))
            .collect();
        for (max_chars, min_tail) in [(50, 4), (120, 2), (10, 8), (10_000, 4)] {
            let once = trim_messages(&messages, max_chars, min_tail);
            let twice = trim_messages(&once, max_chars, min_tail);
            assert_eq!(once, twice, "not idempotent at ({max_chars}, {min_tail})");
        }
    }

    #[test]
    fn output_is_order_preserving_subsequence() {
        let messages: Vec<Message> = (0..15).map(|i| user(&"m".repeat(i + 1))).collect();
        for max_chars in [5, 25, 60, 1000] {
            let trimmed = trim_messages(&messages, max_chars, 3);
            assert!(is_subsequence(&trimmed, &messages));
        }
    }

    #[test]
    fn cap_text_parts_bounds_each_message() {
        let long = user(&"w".repeat(5000));
        let short = user("short");
        let capped = cap_text_parts(&[long, short], 4000);
        assert_eq!(capped[0].text_len(), 4000);
        assert_eq!(capped[1].text_len(), 5);
    }

    #[test]
    fn cap_text_parts_drops_non_text_parts() {
        use colloquy_core::message::{ToolCallPart, ToolCallState};

        let message = user("answer")
            .with_part(MessagePart::reasoning("hidden"))
            .with_part(MessagePart::ToolCall(ToolCallPart::new(
                "call-1",
                ToolCallState::OutputAvailable,
            )));
        let capped = cap_text_parts(std::slice::from_ref(&message), 4000);
        assert_eq!(capped[0].parts, vec![MessagePart::text("answer")]);
        assert_eq!(capped[0].id, message.id);
    }
}
