use std::cmp::Ordering;

use chatlog_kv::{ColumnStore, Row};
use tracing::debug;

use crate::error::HistoryError;
use crate::keys::{
    COLUMN_FAMILY, SENDER_QUALIFIER, TIMESTAMP_QUALIFIER, display_timestamp, parse_row_key,
    user_prefix, validate_user_id,
};
use crate::types::{HistoryEntry, Role};

/// Rebuilds a user's conversation from a prefix scan.
pub struct HistoryReader<'s> {
    store: &'s dyn ColumnStore,
}

impl<'s> HistoryReader<'s> {
    pub fn new(store: &'s dyn ColumnStore) -> Self {
        Self { store }
    }

    /// Return every decodable turn of `user_id` in chronological order.
    /// A scan failure is returned as an error with no partial result.
    pub async fn read_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        validate_user_id(user_id)?;

        let rows = self.store.read_rows(&user_prefix(user_id)).await?;
        let scanned = rows.len();

        let mut entries: Vec<HistoryEntry> = rows
            .iter()
            .filter_map(|row| decode_row(user_id, row))
            .collect();
        entries.sort_by(history_order);

        debug!(user_id, scanned, returned = entries.len(), "history read");
        Ok(entries)
    }
}

/// Decode one scanned row. Rows without text, or whose key does not belong
/// to `user_id`, are skipped.
pub fn decode_row(user_id: &str, row: &Row) -> Option<HistoryEntry> {
    let Some(parsed) = parse_row_key(&row.key) else {
        debug!(key = %row.key, "skipping row with malformed key");
        return None;
    };
    if parsed.user_id != user_id {
        debug!(key = %row.key, "skipping row owned by another user");
        return None;
    }

    let sender = row.value_str(COLUMN_FAMILY, SENDER_QUALIFIER);
    let role = match parsed.role.parse::<Role>() {
        Ok(role) => {
            if let Some(sender) = sender.filter(|s| *s != role.as_str()) {
                debug!(key = %row.key, sender, "sender column disagrees with key, using key");
            }
            role
        }
        Err(_) => {
            debug!(key = %row.key, role = parsed.role, "skipping row with unknown role");
            return None;
        }
    };

    let text = [role, role.counterpart()]
        .iter()
        .filter_map(|r| row.value_str(COLUMN_FAMILY, r.text_qualifier()))
        .find(|t| !t.is_empty());
    let Some(text) = text else {
        debug!(key = %row.key, "skipping row without text");
        return None;
    };

    let raw_ts = row.value_str(COLUMN_FAMILY, TIMESTAMP_QUALIFIER).unwrap_or_default();

    Some(HistoryEntry {
        key: row.key.clone(),
        display_timestamp: display_timestamp(raw_ts),
        sender: role,
        text: text.to_string(),
    })
}

/// Chronological order: the key's timestamp segment, then user before bot,
/// then the full key.
pub fn history_order(a: &HistoryEntry, b: &HistoryEntry) -> Ordering {
    timestamp_segment(a)
        .cmp(timestamp_segment(b))
        .then_with(|| a.sender.cmp(&b.sender))
        .then_with(|| a.key.cmp(&b.key))
}

fn timestamp_segment(e: &HistoryEntry) -> &str {
    parse_row_key(&e.key).map(|p| p.timestamp).unwrap_or_default()
}
