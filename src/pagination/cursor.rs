//! Cursor Codec
//!
//! A cursor names the last row of the previous page: its primary sort value
//! and its id. On the wire it is an opaque URL-safe string (unpadded
//! base64url over `tag:id:value`), so it can travel in a query parameter.
//!
//! Timestamps are written as fixed-width RFC 3339 with nanoseconds, which
//! keeps their lexicographic order equal to their chronological order.
//! Decoding never defaults: anything malformed is `InvalidCursor`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use super::sort::SortValue;
use crate::error::{Error, Result};

/// Longest accepted cursor string.
pub const MAX_CURSOR_LEN: usize = 1024;

const TAG_TIMESTAMP: &str = "ts";
const TAG_COUNT: &str = "n";
const TAG_TEXT: &str = "s";
const TAG_NULL: &str = "null";

/// Decoded pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub primary: SortValue,
    pub tie_break: Uuid,
}

impl Cursor {
    pub fn new(primary: SortValue, tie_break: Uuid) -> Self {
        Self { primary, tie_break }
    }

    /// Encode to the opaque wire form.
    pub fn encode(&self) -> String {
        encode(&self.primary, self.tie_break)
    }

    /// Decode from the opaque wire form.
    pub fn decode(raw: &str) -> Result<Self> {
        decode(raw)
    }
}

/// Encode a primary sort value and tie-break id into an opaque cursor.
pub fn encode(primary: &SortValue, tie_break: Uuid) -> String {
    let (tag, value) = match primary {
        SortValue::Timestamp(ts) => (
            TAG_TIMESTAMP,
            ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
        ),
        SortValue::Count(n) => (TAG_COUNT, n.to_string()),
        SortValue::Text(s) => (TAG_TEXT, s.clone()),
        SortValue::Null => (TAG_NULL, String::new()),
    };
    let plain = format!("{}:{}:{}", tag, tie_break.as_simple(), value);
    URL_SAFE_NO_PAD.encode(plain.as_bytes())
}

/// Decode an opaque cursor back into its primary value and tie-break id.
pub fn decode(raw: &str) -> Result<Cursor> {
    if raw.is_empty() {
        return Err(Error::InvalidCursor("empty cursor".to_string()));
    }
    if raw.len() > MAX_CURSOR_LEN {
        return Err(Error::InvalidCursor(format!(
            "cursor longer than {} bytes",
            MAX_CURSOR_LEN
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|e| Error::InvalidCursor(format!("not base64url: {}", e)))?;
    let plain = String::from_utf8(bytes)
        .map_err(|_| Error::InvalidCursor("not valid UTF-8".to_string()))?;

    // The value goes last so text values may contain the separator.
    let mut fields = plain.splitn(3, ':');
    let (tag, id, value) = match (fields.next(), fields.next(), fields.next()) {
        (Some(tag), Some(id), Some(value)) => (tag, id, value),
        _ => {
            return Err(Error::InvalidCursor(
                "expected 3 fields (tag:id:value)".to_string(),
            ))
        }
    };

    let tie_break = Uuid::parse_str(id)
        .map_err(|e| Error::InvalidCursor(format!("bad tie-break id '{}': {}", id, e)))?;

    let primary = match tag {
        TAG_TIMESTAMP => {
            let ts = DateTime::parse_from_rfc3339(value).map_err(|e| {
                Error::InvalidCursor(format!("bad timestamp '{}': {}", value, e))
            })?;
            SortValue::Timestamp(ts.with_timezone(&Utc))
        }
        TAG_COUNT => {
            let n = value
                .parse::<i64>()
                .map_err(|e| Error::InvalidCursor(format!("bad count '{}': {}", value, e)))?;
            SortValue::Count(n)
        }
        TAG_TEXT => SortValue::Text(value.to_string()),
        TAG_NULL if value.is_empty() => SortValue::Null,
        TAG_NULL => {
            return Err(Error::InvalidCursor(
                "null cursor carries a value".to_string(),
            ))
        }
        other => {
            return Err(Error::InvalidCursor(format!(
                "unknown value tag '{}'",
                other
            )))
        }
    };

    Ok(Cursor { primary, tie_break })
}

// =============================================================================
// Tests
// =============================================================================
