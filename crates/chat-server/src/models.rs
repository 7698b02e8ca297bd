//! Chat data model
//!
//! Threads, messages and the summaries built from them. Identifiers that
//! arrive from clients are parsed here, before any store access.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ChatError;

/// Opaque chat thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(Uuid);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a client-supplied thread id.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| ChatError::InvalidInput(format!("malformed thread id: {raw}")))
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Property identifier issued by the property directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(Uuid);

impl PropertyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a client-supplied property id.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| ChatError::InvalidInput(format!("malformed property id: {raw}")))
    }
}

impl Default for PropertyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single chat message.
///
/// `seq` is 1-based and strictly increasing within a thread; it is the
/// authoritative append order. Only `read` changes after the append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub seq: i64,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// A buyer/owner conversation about one property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: ThreadId,
    pub property_id: PropertyId,
    pub owner_id: String,
    pub participants: [String; 2],
    pub created_at: DateTime<Utc>,
    pub last_message: Option<Message>,
}

impl Thread {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that is not `user_id`, if `user_id` is one of them.
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        match &self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// Returns the participant pair in canonical (sorted) order.
pub fn participant_pair(a: &str, b: &str) -> [String; 2] {
    if a <= b {
        [a.to_string(), b.to_string()]
    } else {
        [b.to_string(), a.to_string()]
    }
}

/// Thread plus its full history, as returned by open-or-get
#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub thread_id: ThreadId,
    pub property_id: PropertyId,
    pub owner_id: String,
    pub participants: [String; 2],
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadSummary {
    pub thread_id: ThreadId,
    pub property_id: PropertyId,
    pub unread_count: i64,
}

/// Unread summary plus its total, as served by `/chat/notifications`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadNotifications {
    pub total_unread: i64,
    pub threads: Vec<UnreadSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub thread_id: ThreadId,
    pub property_id: PropertyId,
    pub counterpart: String,
    pub last_message: Option<Message>,
    pub unread_count: i64,
}

/// A message published on a thread's relay channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub thread_id: ThreadId,
    pub message: Message,
}

/// Authenticated caller as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// Property record held by the property directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub property_id: PropertyId,
    pub owner_id: String,
    pub title: String,
    pub category: String,
    pub location: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(us: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(us).single().unwrap_or_default()
}
