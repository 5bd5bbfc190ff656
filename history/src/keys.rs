//! Row key and column layout for chat history.
//!
//! Every turn is one row in the `messages` column family:
//!
//! ```text
//! {userId}#user#{YYYYMMDDhhmmss.nnnnnnnnn}  → user_text, timestamp, sender
//! {userId}#bot#{YYYYMMDDhhmmss.nnnnnnnnn}   → bot_text,  timestamp, sender
//! ```
//!
//! The user id must not contain the separator, so `{userId}#` is a prefix of
//! that user's rows and of no other user's rows.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::HistoryError;
use crate::types::Role;

/// Separator between key segments.
pub const SEPARATOR: char = '#';

/// Column family holding every turn field.
pub const COLUMN_FAMILY: &str = "messages";
pub const USER_TEXT_QUALIFIER: &str = "user_text";
pub const BOT_TEXT_QUALIFIER: &str = "bot_text";
pub const TIMESTAMP_QUALIFIER: &str = "timestamp";
pub const SENDER_QUALIFIER: &str = "sender";

/// Width of [sortable_timestamp] output.
pub const SORTABLE_TIMESTAMP_LEN: usize = 24;

const SORTABLE_FORMAT: &str = "%Y%m%d%H%M%S%.9f";
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Check that a user id can own a key range.
pub fn validate_user_id(user_id: &str) -> Result<(), HistoryError> {
    if user_id.is_empty() {
        return Err(HistoryError::InvalidUserId(user_id.to_string(), "must not be empty"));
    }
    if user_id.contains(SEPARATOR) {
        return Err(HistoryError::InvalidUserId(
            user_id.to_string(),
            "must not contain '#'",
        ));
    }
    Ok(())
}

/// Fixed-width UTC encoding whose byte order matches chronological order.
/// Format: "YYYYMMDDhhmmss.nnnnnnnnn"
pub fn sortable_timestamp(t: DateTime<Utc>) -> String {
    t.format(SORTABLE_FORMAT).to_string()
}

/// RFC 3339 string stored in the timestamp column.
pub fn column_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Human-readable form of a stored timestamp column value.
/// Values that do not parse as RFC 3339 are returned unchanged.
pub fn display_timestamp(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t.with_timezone(&Utc).format(DISPLAY_FORMAT).to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Row key for one turn.
/// Format: "{userId}#{role}#{sortable}"
pub fn row_key(user_id: &str, role: Role, t: DateTime<Utc>) -> Result<String, HistoryError> {
    validate_user_id(user_id)?;
    Ok(format!(
        "{user_id}{SEPARATOR}{role}{SEPARATOR}{}",
        sortable_timestamp(t)
    ))
}

/// Prefix covering every row of a user.
/// Format: "{userId}#"
pub fn user_prefix(user_id: &str) -> String {
    format!("{user_id}{SEPARATOR}")
}

/// Segments of a row key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub user_id: &'a str,
    pub role: &'a str,
    pub timestamp: &'a str,
}

/// Split a row key on its last two separators.
pub fn parse_row_key(key: &str) -> Option<ParsedKey<'_>> {
    let mut parts = key.rsplitn(3, SEPARATOR);
    let timestamp = parts.next()?;
    let role = parts.next()?;
    let user_id = parts.next()?;
    if user_id.is_empty() || role.is_empty() || timestamp.is_empty() {
        return None;
    }
    Some(ParsedKey {
        user_id,
        role,
        timestamp,
    })
}
