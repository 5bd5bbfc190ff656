//! Chat history storage and retrieval.
//!
//! Each exchange is stored as two immutable rows, one per role, keyed by
//! user, role and a sortable timestamp. History for a user is rebuilt with a
//! prefix scan and returned in chronological order.

pub mod clock;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod reader;
pub mod types;
pub mod writer;

pub use clock::{Clock, SystemClock, now_nano};
pub use error::{CompletionError, HistoryError};
pub use gateway::{Completer, Gateway, GatewayConfig};
pub use reader::HistoryReader;
pub use types::{
    ChatReply, ConversationTurn, FALLBACK_REPLY, HistoryEntry, Role, RowError, WriteOutcome,
};
pub use writer::TurnWriter;

#[cfg(test)]
mod tests;
