use std::time::Duration;

use chatlog_kv::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history: invalid user id {0:?}: {1}")]
    InvalidUserId(String, &'static str),

    #[error("history: user text is empty")]
    EmptyUserText,

    #[error("history: store error: {0}")]
    Store(#[from] StoreError),

    #[error("history: store call timed out after {0:?}")]
    Timeout(Duration),
}

impl HistoryError {
    /// Reports whether the error was caused by caller input rather than
    /// by the store.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, HistoryError::InvalidUserId(..) | HistoryError::EmptyUserText)
    }
}

/// Failure reported by an AI completion backend.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("completion: request failed: {0}")]
    Request(String),

    #[error("completion: api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("completion: malformed response: {0}")]
    Response(String),
}
