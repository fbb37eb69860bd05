//! Field-level parsing for command payloads
//!
//! Milter command payloads pack several string fields back-to-back,
//! each terminated by a single NUL byte. There is no per-field length
//! hint beyond the outer frame length, so the only way to recover the
//! fields is to scan for terminators.

/// Split a NUL-delimited payload into its string fields.
///
/// One field is produced per NUL byte: the bytes since the previous
/// terminator (or the start of the payload). Bytes after the last NUL
/// with no terminator of their own are not emitted; the MTA terminates
/// every field it sends, so a dangling tail means a truncated or
/// malformed payload. Fields are decoded as UTF-8 with lossy
/// replacement. An empty payload yields no fields.
#[must_use]
pub fn split_fields(payload: &[u8]) -> Vec<String> {
    let mut fields = Vec::new();
    let mut start = 0;
    for (i, byte) in payload.iter().enumerate() {
        if *byte == 0 {
            fields.push(String::from_utf8_lossy(&payload[start..i]).into_owned());
            start = i + 1;
        }
    }
    fields
}

/// Extract a bare address from an envelope or header address string.
///
/// If the string contains an angle-bracket pair, the substring
/// strictly between the brackets is returned (`Name <a@b.com>` becomes
/// `a@b.com`); otherwise the whole string is returned with surrounding
/// whitespace trimmed. No address syntax validation is performed.
#[must_use]
pub fn extract_address(raw: &str) -> String {
    if let (Some(open), Some(close)) = (raw.find('<'), raw.rfind('>')) {
        if open < close {
            return raw[open + 1..close].to_string();
        }
    }
    raw.trim().to_string()
}
