//! Milter wire protocol: command alphabet, response alphabet, and
//! frame encoding
//!
//! Every wire unit is a 4-byte big-endian length followed by that many
//! payload bytes. A command payload begins with one ASCII command-code
//! byte; a response payload begins with one ASCII response-code byte.
//! The capability-negotiation reply additionally carries three
//! big-endian `u32` fields.

use crate::error::{Error, Result};

/// Milter protocol version advertised in the negotiation reply.
pub const PROTOCOL_VERSION: u32 = 6;

/// Content-modification actions advertised in the negotiation reply.
/// All actions are advertised even though this server never modifies
/// content; the MTA only needs to know what it may legally request.
pub const ACTION_MASK: u32 = 0x1FF;

/// Protocol steps the filter wants to receive. All steps.
pub const STEP_MASK: u32 = 0x001F_FFFF;

/// A command sent by the MTA, identified by the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `O` -- capability negotiation handshake.
    OptNeg,
    /// `C` -- a new SMTP client connected to the MTA.
    Connect,
    /// `H` -- the SMTP client identified itself.
    Helo,
    /// `M` -- envelope sender declared.
    MailFrom,
    /// `R` -- envelope recipient declared.
    RcptTo,
    /// `L` -- one message header observed.
    Header,
    /// `N` -- header block finished.
    EndOfHeaders,
    /// `B` -- a slice of the message body.
    BodyChunk,
    /// `E` -- message fully received.
    EndOfBody,
    /// `A` -- current transaction cancelled by the MTA.
    Abort,
    /// `Q` -- the MTA is ending the session.
    Quit,
    /// Any command code this server does not interpret.
    Unknown(u8),
}

impl Command {
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            b'O' => Self::OptNeg,
            b'C' => Self::Connect,
            b'H' => Self::Helo,
            b'M' => Self::MailFrom,
            b'R' => Self::RcptTo,
            b'L' => Self::Header,
            b'N' => Self::EndOfHeaders,
            b'B' => Self::BodyChunk,
            b'E' => Self::EndOfBody,
            b'A' => Self::Abort,
            b'Q' => Self::Quit,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn byte(self) -> u8 {
        match self {
            Self::OptNeg => b'O',
            Self::Connect => b'C',
            Self::Helo => b'H',
            Self::MailFrom => b'M',
            Self::RcptTo => b'R',
            Self::Header => b'L',
            Self::EndOfHeaders => b'N',
            Self::BodyChunk => b'B',
            Self::EndOfBody => b'E',
            Self::Abort => b'A',
            Self::Quit => b'Q',
            Self::Unknown(other) => other,
        }
    }
}

/// A response written back to the MTA.
///
/// The full response alphabet is represented, but an inspecting-only
/// filter emits just three shapes: `Continue` after every intermediate
/// command, `Accept` at end-of-body, and the negotiation reply. The
/// reject/discard/temp-fail codes exist so downstream policy layers
/// can speak the same alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// `c` -- proceed with the next command.
    Continue,
    /// `a` -- accept the message.
    Accept,
    /// `r` -- reject the message.
    Reject,
    /// `d` -- silently discard the message.
    Discard,
    /// `t` -- temporary failure, the MTA should retry later.
    TempFail,
    /// `O` -- structured capability-negotiation reply.
    OptNeg {
        version: u32,
        actions: u32,
        steps: u32,
    },
}

impl Response {
    /// The negotiation reply this server advertises: protocol version
    /// 6, every modification action, every protocol step.
    #[must_use]
    pub const fn negotiation() -> Self {
        Self::OptNeg {
            version: PROTOCOL_VERSION,
            actions: ACTION_MASK,
            steps: STEP_MASK,
        }
    }

    /// The ASCII response-code byte.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Continue => b'c',
            Self::Accept => b'a',
            Self::Reject => b'r',
            Self::Discard => b'd',
            Self::TempFail => b't',
            Self::OptNeg { .. } => b'O',
        }
    }

    /// Encode the response as one fully framed buffer.
    ///
    /// The result holds the length prefix and the payload together so
    /// a single write keeps the response atomic on the wire. Plain
    /// responses frame exactly one byte; the negotiation reply frames
    /// 13 (code byte plus three big-endian `u32` fields).
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        match self {
            Self::OptNeg {
                version,
                actions,
                steps,
            } => {
                let mut out = Vec::with_capacity(17);
                out.extend_from_slice(&13u32.to_be_bytes());
                out.push(self.code());
                out.extend_from_slice(&version.to_be_bytes());
                out.extend_from_slice(&actions.to_be_bytes());
                out.extend_from_slice(&steps.to_be_bytes());
                out
            }
            plain => vec![0, 0, 0, 1, plain.code()],
        }
    }
}

/// Frame an arbitrary payload with the 4-byte big-endian length
/// prefix.
///
/// # Errors
///
/// Returns an error if the payload does not fit in a `u32` length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Protocol(format!("payload of {} bytes too large", payload.len())))?;
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
