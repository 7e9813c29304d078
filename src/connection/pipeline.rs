//! Decode → dispatch → encode.
//!
//! A [`Pipeline`] pairs one [`FrameDecoder`] with one [`CommandHandler`].
//! Network connections, snapshot loading and snapshot saving all drive the
//! keyspace through this same type; they differ only in where the input
//! chunks come from and whether replies are kept.

use crate::commands::{CommandHandler, Outcome};
use crate::protocol::{DecodeError, FrameDecoder};
use std::ops::ControlFlow;

pub struct Pipeline {
    decoder: FrameDecoder,
    handler: CommandHandler,
    commands: u64,
}

impl Pipeline {
    pub fn new(handler: CommandHandler) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            handler,
            commands: 0,
        }
    }

    pub fn handler(&self) -> &CommandHandler {
        &self.handler
    }

    /// Commands executed so far.
    pub fn commands(&self) -> u64 {
        self.commands
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.decoder.is_idle()
    }

    /// Decodes `chunk`, executing every frame as soon as it completes.
    ///
    /// Replies are encoded onto `sink` in execution order; with no sink they
    /// are dropped. A `QUIT` returns `Break` and discards the rest of the
    /// chunk. On a decode error, replies for frames that completed before
    /// the fault are already in the sink.
    pub fn process(
        &mut self,
        chunk: &[u8],
        mut sink: Option<&mut Vec<u8>>,
    ) -> Result<ControlFlow<()>, DecodeError> {
        let handler = &mut self.handler;
        let commands = &mut self.commands;

        self.decoder.feed(chunk, |frame| {
            *commands += 1;
            match handler.execute(frame) {
                Outcome::Reply(reply) => {
                    if let Some(out) = sink.as_deref_mut() {
                        reply.serialize_into(out);
                    }
                    ControlFlow::Continue(())
                }
                Outcome::Transcript(replies) => {
                    if let Some(out) = sink.as_deref_mut() {
                        for reply in &replies {
                            reply.serialize_into(out);
                        }
                    }
                    ControlFlow::Continue(())
                }
                Outcome::Close => ControlFlow::Break(()),
            }
        })
    }
}
