//! Stream framing
//!
//! Splits a continuous byte stream into discrete protocol units. The
//! milter wire format prefixes every unit with a 4-byte big-endian
//! length, but the same reassembly problem recurs at other boundary
//! interfaces (line-delimited control messages, for instance), so the
//! framer is a standalone abstraction parameterized by strategy.
//!
//! One [`FrameBuffer`] belongs to exactly one connection. Bytes arrive
//! in whatever chunks the transport produces: a chunk may hold zero,
//! one, or many complete frames, and a single frame may straddle any
//! number of chunks.

use crate::error::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};

/// How frame boundaries are recognized in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Each frame is announced by a 4-byte big-endian length prefix.
    /// The prefix itself is not part of the yielded payload. A frame
    /// announcing more than `max_frame` bytes is rejected.
    LengthPrefixed { max_frame: usize },
    /// Frames are separated by a single delimiter byte, which is
    /// consumed but not yielded. `max_frame` bounds how far the buffer
    /// may grow while waiting for a delimiter.
    Delimited { delimiter: u8, max_frame: usize },
}

/// Per-connection reassembly buffer.
#[derive(Debug)]
pub struct FrameBuffer {
    framing: Framing,
    buf: BytesMut,
}

impl FrameBuffer {
    #[must_use]
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: BytesMut::new(),
        }
    }

    /// Append a chunk of raw bytes received from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Try to take the next complete frame out of the buffer.
    ///
    /// Returns `Ok(None)` when the buffered bytes do not yet form a
    /// complete frame; the partial frame stays in place and the caller
    /// should wait for more data. A zero-length payload is a valid
    /// frame and is yielded as an empty `Bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] when a length prefix exceeds
    /// the configured maximum, or when a delimited buffer outgrows it
    /// without a delimiter in sight. The connection should be closed:
    /// the stream position can no longer be trusted.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        match self.framing {
            Framing::LengthPrefixed { max_frame } => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                let mut prefix = [0u8; 4];
                prefix.copy_from_slice(&self.buf[..4]);
                let len = usize::try_from(u32::from_be_bytes(prefix)).unwrap_or(usize::MAX);
                if len > max_frame {
                    return Err(Error::FrameTooLarge {
                        got: len,
                        max: max_frame,
                    });
                }
                if self.buf.len() < 4 + len {
                    return Ok(None);
                }
                self.buf.advance(4);
                Ok(Some(self.buf.split_to(len).freeze()))
            }
            Framing::Delimited {
                delimiter,
                max_frame,
            } => {
                if let Some(pos) = self.buf.iter().position(|b| *b == delimiter) {
                    let frame = self.buf.split_to(pos).freeze();
                    self.buf.advance(1);
                    Ok(Some(frame))
                } else if self.buf.len() > max_frame {
                    Err(Error::FrameTooLarge {
                        got: self.buf.len(),
                        max: max_frame,
                    })
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Number of buffered bytes not yet consumed by a complete frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
