//! Wire framing for the event stream.
//!
//! One HTTP response body carries a sequence of discrete records, each
//! independently parseable, terminated by an explicit end-of-stream
//! marker. Records travel as single-line JSON, optionally wrapped in an
//! SSE `data:` frame; [`decode_frame`] accepts both framings so the same
//! codec serves the server handler, the relay backend, and the browser
//! client.
//!
//! Decoding is deliberately tolerant: a malformed record or an
//! unrecognized event type yields [`Frame::Skip`] rather than an error,
//! because one bad record must never lose an otherwise-valid transcript.

use crate::event::StreamEvent;
use crate::{Error, Result, TRACING_TARGET};

/// The end-of-stream marker sent after the final `finish` record.
pub const DONE_MARKER: &str = "[DONE]";

/// SSE frame prefix accepted (and produced) by this codec.
const DATA_PREFIX: &str = "data:";

/// Result of decoding one line of the stream body.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed event record.
    Event(StreamEvent),
    /// The end-of-stream marker; no further records follow.
    Done,
    /// A blank line, comment, malformed record, or unknown event type.
    Skip,
}

/// Encodes an event as a single JSON line (no framing, no newline).
pub fn encode_frame(event: &StreamEvent) -> Result<String> {
    serde_json::to_string(event).map_err(|err| {
        Error::serialization()
            .with_message("failed to encode stream event")
            .with_source(err)
    })
}

/// Encodes an event as an SSE data frame, trailing blank line included.
pub fn encode_data_frame(event: &StreamEvent) -> Result<String> {
    Ok(format!("data: {}\n\n", encode_frame(event)?))
}

/// The end-of-stream marker as an SSE data frame.
pub fn done_data_frame() -> String {
    format!("data: {DONE_MARKER}\n\n")
}

/// Decodes one line of the stream body.
pub fn decode_frame(line: &str) -> Frame {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Frame::Skip;
    }

    let payload = line
        .strip_prefix(DATA_PREFIX)
        .map(str::trim_start)
        .unwrap_or(line);

    if payload == DONE_MARKER {
        return Frame::Done;
    }

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(StreamEvent::Unknown) => {
            tracing::trace!(target: TRACING_TARGET, "Skipping unrecognized event type");
            Frame::Skip
        }
        Ok(event) => Frame::Event(event),
        Err(error) => {
            tracing::debug!(
                target: TRACING_TARGET,
                error = %error,
                "Skipping malformed event record"
            );
            Frame::Skip
        }
    }
}
