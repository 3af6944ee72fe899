//! Folding arriving events into the transcript.

use colloquy_core::assemble::MessageAssembler;
use colloquy_core::event::StreamEvent;
use uuid::Uuid;

use crate::Transcript;

/// Client-side state machine for one streaming turn.
///
/// Processes events strictly in arrival order: `start` appends a fresh
/// streaming assistant message to the transcript, every subsequent event
/// mutates only that last message (through the shared
/// [`MessageAssembler`] fold), and `finish` completes the turn: the
/// point at which the caller may safely navigate away, since the server
/// persists before forwarding `finish`.
#[derive(Debug, Default)]
pub struct TurnReconciler {
    assembler: Option<MessageAssembler>,
    finished: bool,
}

impl TurnReconciler {
    /// Creates a reconciler for a new turn.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once `finish` has been processed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Applies one event to the transcript.
    pub fn apply(&mut self, transcript: &mut Transcript, event: &StreamEvent) {
        match event {
            StreamEvent::Unknown => {}

            StreamEvent::Start { id } => {
                let id = id
                    .clone()
                    .unwrap_or_else(|| Uuid::now_v7().to_string());
                let assembler = MessageAssembler::new(id);
                transcript.append(assembler.message().clone());
                self.assembler = Some(assembler);
            }

            event => {
                // Tolerate a stream that skips `start`: open the
                // assistant message on first content.
                if self.assembler.is_none() {
                    let assembler = MessageAssembler::new(Uuid::now_v7().to_string());
                    transcript.append(assembler.message().clone());
                    self.assembler = Some(assembler);
                }
                let Some(assembler) = self.assembler.as_mut() else {
                    return;
                };

                assembler.apply(event);
                let updated = assembler.message().clone();
                transcript.replace_last(|last| *last = updated);

                if assembler.is_finished() {
                    self.finished = true;
                }
            }
        }
    }
}
