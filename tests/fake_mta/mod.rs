//! Fake MTA client for integration testing
//!
//! This module plays the sendmail/postfix side of the milter
//! protocol: it connects to a `MilterServer`, frames commands with
//! the 4-byte big-endian length prefix, and reads framed responses.
//!
//! ## How the milter protocol works (educational overview)
//!
//! A milter is a mail *filter* the MTA consults while an SMTP
//! transaction is still in progress. The MTA opens a long-lived
//! stream connection to the filter and replays each SMTP event as a
//! binary command:
//!
//! ```text
//!   MTA                              filter
//!    |-- O optneg ------------------->|   capability handshake
//!    |<------------- O reply ---------|
//!    |-- C connect ------------------>|   SMTP client connected
//!    |<------------- c continue ------|
//!    |-- M mail-from ---------------->|
//!    |<------------- c continue ------|
//!    |-- R rcpt-to ------------------>|
//!    |<------------- c continue ------|
//!    |-- L header (repeated) -------->|
//!    |-- N end-of-headers ----------->|
//!    |-- B body chunk (repeated) ---->|
//!    |-- E end-of-body -------------->|
//!    |<------------- a accept --------|
//!    |-- Q quit --------------------->|   connection closes
//! ```
//!
//! Every unit on the wire is `[u32 big-endian length][payload]`, and
//! the first payload byte is the command or response code. The MTA
//! blocks its SMTP session on each reply, which is why the filter
//! must answer every command.

mod client;

pub use client::MtaClient;
