//! Milter protocol server library
//!
//! A binary, stateful protocol endpoint that a mail transfer agent
//! (MTA) connects to in order to stream an in-progress SMTP
//! transaction command-by-command. The server reassembles the
//! length-prefixed wire framing, drives a per-connection transaction
//! state machine, and emits one immutable [`EmailMessage`] per
//! completed transaction to broadcast subscribers.
//!
//! This is an inspecting-only filter: every intermediate command is
//! answered with `continue` and every completed message with
//! `accept`. Policy decisions, content modification, and TLS are out
//! of scope.

mod config;
mod error;
mod fields;
mod framing;
mod message;
mod protocol;
mod server;
mod session;

pub use config::{DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_FRAME, MilterConfig};
pub use error::{Error, Result};
pub use fields::{extract_address, split_fields};
pub use framing::{FrameBuffer, Framing};
pub use message::{Attachment, DEFAULT_SUBJECT, EmailMessage};
pub use protocol::{ACTION_MASK, Command, PROTOCOL_VERSION, Response, STEP_MASK, encode_frame};
pub use server::MilterServer;
pub use session::{Outcome, Session};
