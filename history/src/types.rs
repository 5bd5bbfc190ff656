use std::fmt;
use std::str::FromStr;

use chatlog_kv::Mutation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::keys::{
    BOT_TEXT_QUALIFIER, COLUMN_FAMILY, SENDER_QUALIFIER, TIMESTAMP_QUALIFIER,
    USER_TEXT_QUALIFIER, column_timestamp, row_key,
};

/// Stored in place of an empty or failed completion.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Author of a turn. `User` orders before `Bot` so that a pair sharing a
/// timestamp reads question first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "bot")]
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }

    /// Column holding this role's text.
    pub fn text_qualifier(&self) -> &'static str {
        match self {
            Role::User => USER_TEXT_QUALIFIER,
            Role::Bot => BOT_TEXT_QUALIFIER,
        }
    }

    /// The other side of the exchange.
    pub fn counterpart(&self) -> Role {
        match self {
            Role::User => Role::Bot,
            Role::Bot => Role::User,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "bot" => Ok(Role::Bot),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationTurn
// ---------------------------------------------------------------------------

/// One side of an exchange. Both turns of a pair share `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user_id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        user_id: impl Into<String>,
        role: Role,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            text: text.into(),
            timestamp,
        }
    }

    pub fn row_key(&self) -> Result<String, HistoryError> {
        row_key(&self.user_id, self.role, self.timestamp)
    }

    /// Column writes for this turn: role text, timestamp and sender, all
    /// versioned at the turn's timestamp in microseconds.
    pub fn mutation(&self) -> Mutation {
        let version = self.timestamp.timestamp_micros();
        let mut m = Mutation::new();
        m.set(COLUMN_FAMILY, self.role.text_qualifier(), version, self.text.clone())
            .set(COLUMN_FAMILY, TIMESTAMP_QUALIFIER, version, column_timestamp(self.timestamp))
            .set(COLUMN_FAMILY, SENDER_QUALIFIER, version, self.role.as_str());
        m
    }
}

// ---------------------------------------------------------------------------
// History output
// ---------------------------------------------------------------------------

/// A turn reconstructed from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "rowKey")]
    pub key: String,

    #[serde(rename = "timestamp")]
    pub display_timestamp: String,

    pub sender: Role,

    pub text: String,
}

// ---------------------------------------------------------------------------
// Write outcome
// ---------------------------------------------------------------------------

/// A row that failed inside an otherwise delivered bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub key: String,
    pub error: String,
}

/// Result of writing a turn pair.
///
/// `success` is false only when the bulk call itself failed. Rows that
/// failed individually are listed in `row_errors` while `success` stays true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub success: bool,
    pub row_errors: Vec<RowError>,
}

impl WriteOutcome {
    pub fn failed() -> Self {
        Self {
            success: false,
            row_errors: Vec::new(),
        }
    }

    /// Both rows were acknowledged.
    pub fn is_complete(&self) -> bool {
        self.success && self.row_errors.is_empty()
    }

    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.row_errors.iter().map(|e| e.key.as_str())
    }
}

/// Reply handed back to a chat caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// Completion text, or the fallback reply.
    pub response: String,
    /// Whether the bulk write reached the store.
    pub saved: bool,
    pub row_errors: Vec<RowError>,
}
