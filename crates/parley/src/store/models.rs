//! Conversation and message data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// A titled, pinnable container for an ordered list of messages.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Opaque unique identifier (UUID v4).
    pub id: String,
    /// Display title; `None` until renamed or auto-titled.
    pub title: Option<String>,
    pub pinned: bool,
    /// Unix timestamp in milliseconds, immutable.
    pub created_at: i64,
    /// Unix timestamp in milliseconds, non-decreasing. Bumped on rename,
    /// pin/unpin and message append.
    pub updated_at: i64,
}

/// One turn of text within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque unique identifier (UUID v4).
    pub id: String,
    pub conversation_id: String,
    /// Message role (`user` or `assistant`).
    pub role: String,
    pub content: String,
    /// Unix timestamp in milliseconds, immutable.
    pub created_at: i64,
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Unknown message role: {}", s)),
        }
    }
}
