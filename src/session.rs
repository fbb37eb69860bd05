//! Per-connection command dispatch and transaction assembly
//!
//! A [`Session`] owns everything one MTA connection accumulates: the
//! in-progress transaction record and the emit handle. Sessions are
//! never shared between connections -- the transaction record and the
//! connection's frame buffer are both stateful, and leaking either
//! across connections would corrupt concurrent transactions.
//!
//! Every dispatched command ends in exactly one of two outcomes: a
//! response written back to the MTA, or a closed connection. A command
//! is never silently dropped, because an MTA waiting on a missing
//! reply stalls its whole SMTP session.

use crate::fields::{extract_address, split_fields};
use crate::message::{DEFAULT_SUBJECT, EmailMessage};
use crate::protocol::{Command, Response};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

/// What the connection loop must do after a command was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Write this response to the MTA, then keep reading.
    Reply(Response),
    /// Close the connection without a response.
    Close,
}

/// The partial message accumulated across one transaction.
///
/// Every field is either unset or holds the most recently observed
/// value; a populated field is never overwritten with a blank one.
#[derive(Debug, Default)]
struct Transaction {
    id: Option<String>,
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    body: String,
    headers: HashMap<String, String>,
    received_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Fresh state for a new transaction: empty collections and a new
    /// received timestamp.
    fn reset(&mut self) {
        *self = Self {
            received_at: Some(Utc::now()),
            ..Self::default()
        };
    }

    /// Drop all accumulated state, timestamp included.
    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Freeze the record into an immutable message and reset for a
    /// possible pipelined follow-up transaction on the same
    /// connection.
    fn finalize(&mut self) -> EmailMessage {
        let message = EmailMessage {
            id: self.id.take().unwrap_or_else(generate_message_id),
            from: self.from.take().unwrap_or_default(),
            to: std::mem::take(&mut self.to),
            cc: std::mem::take(&mut self.cc),
            bcc: Vec::new(),
            subject: self
                .subject
                .take()
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            body: std::mem::take(&mut self.body),
            headers: std::mem::take(&mut self.headers),
            attachments: Vec::new(),
            received_at: self.received_at.unwrap_or_else(Utc::now),
        };
        self.reset();
        message
    }
}

fn generate_message_id() -> String {
    format!("<{}@milterd>", Uuid::new_v4())
}

/// Command dispatcher and transaction assembler for one connection.
pub struct Session {
    txn: Transaction,
    emitter: broadcast::Sender<EmailMessage>,
}

impl Session {
    /// Create the session for a newly accepted connection. The
    /// transaction timestamp starts now; a `connect` command refreshes
    /// it.
    #[must_use]
    pub fn new(emitter: broadcast::Sender<EmailMessage>) -> Self {
        let mut txn = Transaction::default();
        txn.reset();
        Self { txn, emitter }
    }

    /// Dispatch one complete frame payload.
    ///
    /// The first byte selects the handler; the rest is command data.
    /// Malformed data (missing fields, empty payloads, unknown command
    /// codes) degrades to a no-op that still answers `Continue` --
    /// this server fails open rather than stall the SMTP pipeline.
    pub fn on_frame(&mut self, payload: &[u8]) -> Outcome {
        let Some((&code, data)) = payload.split_first() else {
            return Outcome::Reply(Response::Continue);
        };

        let command = Command::from_byte(code);
        trace!("dispatching {:?} with {} data bytes", command, data.len());

        match command {
            Command::OptNeg => Outcome::Reply(Response::negotiation()),
            Command::Connect => {
                self.txn.reset();
                Outcome::Reply(Response::Continue)
            }
            Command::MailFrom => {
                self.on_mail_from(data);
                Outcome::Reply(Response::Continue)
            }
            Command::RcptTo => {
                self.on_rcpt_to(data);
                Outcome::Reply(Response::Continue)
            }
            Command::Header => {
                self.on_header(data);
                Outcome::Reply(Response::Continue)
            }
            Command::BodyChunk => {
                self.txn.body.push_str(&String::from_utf8_lossy(data));
                Outcome::Reply(Response::Continue)
            }
            Command::EndOfBody => {
                self.emit();
                Outcome::Reply(Response::Accept)
            }
            Command::Abort => {
                self.txn.clear();
                Outcome::Reply(Response::Continue)
            }
            Command::Quit => Outcome::Close,
            Command::Helo | Command::EndOfHeaders | Command::Unknown(_) => {
                Outcome::Reply(Response::Continue)
            }
        }
    }

    fn on_mail_from(&mut self, data: &[u8]) {
        let fields = split_fields(data);
        let Some(raw) = fields.first() else { return };
        let address = extract_address(raw);
        if !address.is_empty() {
            self.txn.from = Some(address);
        }
    }

    fn on_rcpt_to(&mut self, data: &[u8]) {
        let fields = split_fields(data);
        let Some(raw) = fields.first() else { return };
        let address = extract_address(raw);
        if !address.is_empty() {
            self.txn.to.push(address);
        }
    }

    /// Store one `name NUL value NUL` header pair. Payloads that do
    /// not carry both fields are skipped.
    fn on_header(&mut self, data: &[u8]) {
        let mut fields = split_fields(data);
        if fields.len() < 2 {
            return;
        }
        let value = fields.swap_remove(1);
        let name = fields.swap_remove(0).to_lowercase();

        match name.as_str() {
            "subject" if !value.is_empty() => self.txn.subject = Some(value.clone()),
            "message-id" if !value.is_empty() => self.txn.id = Some(value.clone()),
            "cc" => {
                for part in value.split(',') {
                    let address = extract_address(part);
                    if !address.is_empty() {
                        self.txn.cc.push(address);
                    }
                }
            }
            _ => {}
        }

        self.txn.headers.insert(name, value);
    }

    fn emit(&mut self) {
        let message = self.txn.finalize();
        debug!(
            "assembled message {} from {} to {} recipient(s)",
            message.id,
            message.from,
            message.to.len()
        );
        // No subscribers is fine; the message is simply not observed.
        self.emitter.send(message).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Session, broadcast::Receiver<EmailMessage>) {
        let (tx, rx) = broadcast::channel(8);
        (Session::new(tx), rx)
    }

    fn payload(code: u8, data: &[u8]) -> Vec<u8> {
        let mut out = vec![code];
        out.extend_from_slice(data);
        out
    }

    fn continue_reply() -> Outcome {
        Outcome::Reply(Response::Continue)
    }

    #[test]
    fn full_transaction_assembles_one_message() {
        let (mut session, mut rx) = session();

        assert_eq!(
            session.on_frame(&payload(b'O', &[0; 12])),
            Outcome::Reply(Response::negotiation())
        );
        assert_eq!(session.on_frame(&payload(b'C', b"client\0")), continue_reply());
        assert_eq!(session.on_frame(&payload(b'H', b"client\0")), continue_reply());
        assert_eq!(session.on_frame(&payload(b'M', b"<u@x.com>\0")), continue_reply());
        assert_eq!(session.on_frame(&payload(b'R', b"<v@y.com>\0")), continue_reply());
        assert_eq!(
            session.on_frame(&payload(b'L', b"Subject\0Hi\0")),
            continue_reply()
        );
        assert_eq!(session.on_frame(&payload(b'N', b"")), continue_reply());
        assert_eq!(session.on_frame(&payload(b'B', b"hello")), continue_reply());
        assert_eq!(
            session.on_frame(&payload(b'E', b"")),
            Outcome::Reply(Response::Accept)
        );

        let message = rx.try_recv().unwrap();
        assert_eq!(message.from, "u@x.com");
        assert_eq!(message.to, vec!["v@y.com"]);
        assert_eq!(message.subject, "Hi");
        assert_eq!(message.body, "hello");
        assert!(!message.id.is_empty());
        assert!(message.bcc.is_empty());
        assert!(message.attachments.is_empty());

        // Exactly one message per transaction.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn message_id_header_is_used_when_present() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(b'L', b"Message-ID\0<known@x.com>\0"));
        session.on_frame(&payload(b'E', b""));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.id, "<known@x.com>");
        assert_eq!(message.headers["message-id"], "<known@x.com>");
    }

    #[test]
    fn subject_defaults_to_placeholder() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(b'E', b""));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.subject, DEFAULT_SUBJECT);
    }

    #[test]
    fn cc_header_is_comma_split_and_extracted() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(
            b'L',
            b"Cc\0Ann <a@x.com>, b@y.com\0",
        ));
        session.on_frame(&payload(b'E', b""));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.cc, vec!["a@x.com", "b@y.com"]);
    }

    #[test]
    fn duplicate_header_keeps_last_value() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(b'L', b"X-Spam\0no\0"));
        session.on_frame(&payload(b'L', b"X-SPAM\0yes\0"));
        session.on_frame(&payload(b'E', b""));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.headers["x-spam"], "yes");
    }

    #[test]
    fn malformed_header_is_skipped_but_answered() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        assert_eq!(
            session.on_frame(&payload(b'L', b"no-terminators-here")),
            continue_reply()
        );
        session.on_frame(&payload(b'E', b""));

        let message = rx.try_recv().unwrap();
        assert!(message.headers.is_empty());
    }

    #[test]
    fn body_chunks_concatenate() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(b'B', b"first "));
        session.on_frame(&payload(b'B', b"second"));
        session.on_frame(&payload(b'E', b""));

        assert_eq!(rx.try_recv().unwrap().body, "first second");
    }

    #[test]
    fn abort_discards_accumulated_state() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(b'M', b"<old@x.com>\0"));
        session.on_frame(&payload(b'R', b"<old@y.com>\0"));
        assert_eq!(session.on_frame(&payload(b'A', b"")), continue_reply());

        session.on_frame(&payload(b'M', b"<new@x.com>\0"));
        session.on_frame(&payload(b'R', b"<new@y.com>\0"));
        session.on_frame(&payload(b'E', b""));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.from, "new@x.com");
        assert_eq!(message.to, vec!["new@y.com"]);
    }

    #[test]
    fn second_transaction_inherits_nothing() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(b'M', b"<first@x.com>\0"));
        session.on_frame(&payload(b'L', b"Subject\0First\0"));
        session.on_frame(&payload(b'B', b"body one"));
        session.on_frame(&payload(b'E', b""));
        rx.try_recv().unwrap();

        // Pipelined follow-up without an intervening connect command.
        session.on_frame(&payload(b'M', b"<second@x.com>\0"));
        session.on_frame(&payload(b'E', b""));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.from, "second@x.com");
        assert_eq!(message.subject, DEFAULT_SUBJECT);
        assert!(message.body.is_empty());
        assert!(message.to.is_empty());
    }

    #[test]
    fn duplicate_recipients_are_preserved_in_order() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(b'M', b"<u@x.com>\0"));
        session.on_frame(&payload(b'R', b"<v@y.com>\0"));
        session.on_frame(&payload(b'R', b"<w@z.com>\0"));
        session.on_frame(&payload(b'R', b"<v@y.com>\0"));
        session.on_frame(&payload(b'E', b""));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.to, vec!["v@y.com", "w@z.com", "v@y.com"]);
    }

    #[test]
    fn empty_mail_from_does_not_blank_sender() {
        let (mut session, mut rx) = session();
        session.on_frame(&payload(b'C', b""));
        session.on_frame(&payload(b'M', b"<u@x.com>\0"));
        session.on_frame(&payload(b'M', b"\0"));
        session.on_frame(&payload(b'E', b""));

        assert_eq!(rx.try_recv().unwrap().from, "u@x.com");
    }

    #[test]
    fn unknown_command_fails_open() {
        let (mut session, _rx) = session();
        assert_eq!(session.on_frame(&payload(b'z', b"whatever")), continue_reply());
    }

    #[test]
    fn empty_payload_fails_open() {
        let (mut session, _rx) = session();
        assert_eq!(session.on_frame(b""), continue_reply());
    }

    #[test]
    fn quit_closes_without_response() {
        let (mut session, _rx) = session();
        assert_eq!(session.on_frame(&payload(b'Q', b"")), Outcome::Close);
    }

    #[test]
    fn no_subscribers_is_not_an_error() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let mut session = Session::new(tx);
        session.on_frame(&payload(b'C', b""));
        assert_eq!(
            session.on_frame(&payload(b'E', b"")),
            Outcome::Reply(Response::Accept)
        );
    }
}
