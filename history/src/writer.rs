use chatlog_kv::{ColumnStore, StoreError};
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::error::HistoryError;
use crate::keys::validate_user_id;
use crate::types::{ConversationTurn, FALLBACK_REPLY, Role, RowError, WriteOutcome};

/// Writes a user/bot turn pair as one bulk call.
pub struct TurnWriter<'s> {
    store: &'s dyn ColumnStore,
}

impl<'s> TurnWriter<'s> {
    pub fn new(store: &'s dyn ColumnStore) -> Self {
        Self { store }
    }

    /// Store both turns of an exchange under the shared `timestamp`.
    ///
    /// Only input validation returns `Err`. A failed bulk call yields an
    /// outcome with `success == false`; rows rejected inside a delivered
    /// bulk call are reported in `row_errors`. Nothing is retried.
    pub async fn write_turn_pair(
        &self,
        user_id: &str,
        user_text: &str,
        bot_text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<WriteOutcome, HistoryError> {
        validate_user_id(user_id)?;
        if user_text.is_empty() {
            return Err(HistoryError::EmptyUserText);
        }
        let bot_text = if bot_text.is_empty() { FALLBACK_REPLY } else { bot_text };

        let turns = [
            ConversationTurn::new(user_id, Role::User, user_text, timestamp),
            ConversationTurn::new(user_id, Role::Bot, bot_text, timestamp),
        ];
        let keys = turns
            .iter()
            .map(ConversationTurn::row_key)
            .collect::<Result<Vec<_>, _>>()?;
        let mutations: Vec<_> = turns.iter().map(ConversationTurn::mutation).collect();

        let results = match self.store.apply_bulk(&keys, &mutations).await {
            Ok(results) => results,
            Err(e) => {
                error!(user_id, error = %e, "failed to apply bulk mutations");
                return Ok(WriteOutcome::failed());
            }
        };

        // A row without a result is not known to be written.
        let mut results = results.into_iter();
        let mut row_errors = Vec::new();
        for key in &keys {
            let result = results
                .next()
                .unwrap_or_else(|| Err(StoreError::Storage("no result returned for row".into())));
            if let Err(e) = result {
                warn!(key = %key, error = %e, "error writing row in bulk");
                row_errors.push(RowError {
                    key: key.clone(),
                    error: e.to_string(),
                });
            }
        }
        debug!(user_id, failed = row_errors.len(), "turn pair written");

        Ok(WriteOutcome {
            success: true,
            row_errors,
        })
    }
}
