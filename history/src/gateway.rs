//! Conversation gateway: pairs an AI completion with durable storage of the
//! exchange, and serves ordered history.
//!
//! The gateway owns the long-lived store handle and lends it to a
//! [TurnWriter] or [HistoryReader] per call. Every store call is bounded by
//! [GatewayConfig::store_timeout].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatlog_kv::ColumnStore;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::{CompletionError, HistoryError};
use crate::keys::validate_user_id;
use crate::reader::HistoryReader;
use crate::types::{ChatReply, FALLBACK_REPLY, HistoryEntry, WriteOutcome};
use crate::writer::TurnWriter;

/// Produces the bot reply for a user query.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, query: &str) -> Result<String, CompletionError>;
}

/// Gateway tuning.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// Upper bound on each store call. Zero disables the bound.
    pub store_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(10),
        }
    }
}

/// Orchestrates chat and history requests. Safe for concurrent use.
pub struct Gateway {
    store: Arc<dyn ColumnStore>,
    completer: Arc<dyn Completer>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn ColumnStore>,
        completer: Arc<dyn Completer>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            completer,
            clock,
            config,
        }
    }

    /// Answer a query and record the exchange.
    ///
    /// Once the input is valid the reply is always returned; whether it was
    /// stored is reported in [ChatReply::saved] and [ChatReply::row_errors].
    pub async fn chat(&self, user_id: &str, query: &str) -> Result<ChatReply, HistoryError> {
        validate_user_id(user_id)?;
        if query.trim().is_empty() {
            return Err(HistoryError::EmptyUserText);
        }

        let timestamp = self.clock.now();

        let response = match self.completer.complete(query).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(user_id, "completion was empty, using fallback reply");
                FALLBACK_REPLY.to_string()
            }
            Err(e) => {
                warn!(user_id, error = %e, "completion failed, using fallback reply");
                FALLBACK_REPLY.to_string()
            }
        };

        let outcome = match self.record_turn_pair(user_id, query, &response, timestamp).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(user_id, error = %e, "turn pair not recorded");
                WriteOutcome::failed()
            }
        };
        if outcome.is_complete() {
            info!(user_id, "chat turn recorded");
        }

        Ok(ChatReply {
            response,
            saved: outcome.success,
            row_errors: outcome.row_errors,
        })
    }

    /// Ordered history of a user.
    pub async fn history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        self.fetch_history(user_id).await
    }

    /// Write one turn pair. A timeout counts as a failed bulk call.
    pub async fn record_turn_pair(
        &self,
        user_id: &str,
        user_text: &str,
        bot_text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<WriteOutcome, HistoryError> {
        validate_user_id(user_id)?;
        let writer = TurnWriter::new(self.store.as_ref());
        match self
            .bounded(writer.write_turn_pair(user_id, user_text, bot_text, timestamp))
            .await
        {
            Some(result) => result,
            None => {
                error!(user_id, timeout = ?self.config.store_timeout, "bulk write timed out");
                Ok(WriteOutcome::failed())
            }
        }
    }

    /// Read a user's history. A timeout is reported as an error.
    pub async fn fetch_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        validate_user_id(user_id)?;
        let reader = HistoryReader::new(self.store.as_ref());
        match self.bounded(reader.read_history(user_id)).await {
            Some(result) => result,
            None => {
                error!(user_id, timeout = ?self.config.store_timeout, "history scan timed out");
                Err(HistoryError::Timeout(self.config.store_timeout))
            }
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        if self.config.store_timeout.is_zero() {
            return Some(fut.await);
        }
        tokio::time::timeout(self.config.store_timeout, fut).await.ok()
    }
}
