//! Assembled email data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subject used when a transaction completes without ever observing a
/// `Subject` header.
pub const DEFAULT_SUBJECT: &str = "(no subject)";

/// One complete email assembled from a filter transaction.
///
/// Immutable once emitted: the server hands out owned clones and never
/// touches an emitted message again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Message identifier, taken from the `Message-ID` header or
    /// generated when the transaction never carried one.
    pub id: String,
    /// Envelope sender address.
    pub from: String,
    /// Envelope recipient addresses, in declaration order. Duplicates
    /// are preserved.
    pub to: Vec<String>,
    /// Addresses from the `Cc` header.
    pub cc: Vec<String>,
    /// Blind-carbon-copy addresses. No milter command carries these,
    /// so the list is always empty; the field exists so consumers see
    /// a complete address model.
    pub bcc: Vec<String>,
    /// Message subject, or [`DEFAULT_SUBJECT`].
    pub subject: String,
    /// Concatenated body text.
    pub body: String,
    /// All observed headers, keyed by lower-cased name. Duplicate
    /// names keep the last observed value.
    pub headers: HashMap<String, String>,
    /// MIME attachments. Reconstructing these from the raw body is a
    /// consumer concern; no handler populates the list.
    pub attachments: Vec<Attachment>,
    /// When the SMTP client connection behind this message began.
    pub received_at: DateTime<Utc>,
}

/// A decoded MIME attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub data: Vec<u8>,
}
