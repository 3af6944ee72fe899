//! Incremental parsing of the event stream off a response body.

use bytes::BytesMut;
use colloquy_core::event::StreamEvent;
use colloquy_core::wire::{self, Frame};
use futures::{Stream, StreamExt};

use crate::Error;

/// Decodes a chunked byte stream into events.
///
/// Frames are newline-delimited and may arrive split across chunk
/// boundaries; both bare JSON lines and SSE `data:` frames are accepted.
/// Malformed records and unknown event types are skipped, never fatal.
/// The stream ends at the `[DONE]` marker or at EOF; reaching EOF
/// without having seen `finish` is for the caller to interpret (see
/// [`crate::drive_turn`]).
pub fn event_stream<S, E>(body: S) -> impl Stream<Item = Result<StreamEvent, Error>>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: std::fmt::Display,
{
    async_stream::stream! {
        let mut body = std::pin::pin!(body);
        let mut buffer = BytesMut::new();
        let mut done = false;

        'read: while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    yield Err(Error::transport(error));
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let line = buffer.split_to(newline + 1);
                let line = String::from_utf8_lossy(&line);
                match wire::decode_frame(&line) {
                    Frame::Event(event) => yield Ok(event),
                    Frame::Done => {
                        done = true;
                        break 'read;
                    }
                    Frame::Skip => {}
                }
            }
        }

        // A final unterminated line still counts as a frame.
        if !done && !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer);
            if let Frame::Event(event) = wire::decode_frame(&line) {
                yield Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::stream;

    use super::*;

    type ChunkResult = Result<Bytes, std::convert::Infallible>;

    fn chunks(parts: &[&str]) -> impl Stream<Item = ChunkResult> {
        let owned: Vec<ChunkResult> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part.as_bytes())))
            .collect();
        stream::iter(owned)
    }

    async fn collect(parts: &[&str]) -> Vec<StreamEvent> {
        event_stream(chunks(parts))
            .map(|item| item.expect("stream should not error"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn frames_split_across_chunks_are_reassembled() {
        let events = collect(&[
            "{\"type\":\"start\",\"id\":\"m1\"}\n{\"type\":\"te",
            "xt\",\"delta\":\"hel",
            "lo\"}\n{\"type\":\"finish\"}\n",
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::start("m1"),
                StreamEvent::text_delta("hello"),
                StreamEvent::finish(),
            ]
        );
    }

    #[tokio::test]
    async fn sse_framing_and_keepalives_are_handled() {
        let events = collect(&[
            "data: {\"type\":\"start\",\"id\":\"m1\"}\n\n",
            ": keep-alive\n\n",
            "data: {\"type\":\"text\",\"delta\":\"hi\"}\n\n",
            "data: {\"type\":\"finish\"}\n\ndata: [DONE]\n\n",
        ])
        .await;

        assert_eq!(events.len(), 3);
        assert!(events[2].is_finish());
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let events = collect(&[
            "{\"type\":\"text\",\"delta\":\"keep\"}\n",
            "{broken json\n",
            "{\"type\":\"never-heard-of-it\"}\n",
            "{\"type\":\"text\",\"delta\":\" going\"}\n",
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::text_delta("keep"),
                StreamEvent::text_delta(" going"),
            ]
        );
    }

    #[tokio::test]
    async fn nothing_is_read_past_the_done_marker() {
        let events = collect(&[
            "{\"type\":\"finish\"}\n[DONE]\n{\"type\":\"text\",\"delta\":\"late\"}\n",
        ])
        .await;

        assert_eq!(events, vec![StreamEvent::finish()]);
    }

    #[tokio::test]
    async fn trailing_unterminated_frame_is_decoded() {
        let events = collect(&["{\"type\":\"finish\"}"]).await;
        assert_eq!(events, vec![StreamEvent::finish()]);
    }

    #[tokio::test]
    async fn transport_errors_surface_once() {
        let parts: Vec<Result<Bytes, &str>> = vec![
            Ok(Bytes::from_static(b"{\"type\":\"start\",\"id\":\"m1\"}\n")),
            Err("connection reset"),
        ];
        let items: Vec<Result<StreamEvent, Error>> =
            event_stream(stream::iter(parts)).collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::Transport(_))));
    }
}
