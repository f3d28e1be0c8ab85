use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parse_timestamp;

/// A registered user. Identity comes from the verified session token; the row
/// supplies display data for broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// A stored Looproom.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LooproomRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub creator_id: String,
    pub is_live: bool,
    pub current_session_id: Option<String>,
    pub stream_url: Option<String>,
    pub chat_enabled: bool,
    pub slow_mode_seconds: i64,
    pub max_participants: i64,
    pub created_at: String,
}

impl LooproomRow {
    pub fn is_creator(&self, user_id: &str) -> bool {
        self.creator_id == user_id
    }

    /// Capacity as a count. Non-positive values mean "no limit".
    pub fn capacity(&self) -> Option<usize> {
        usize::try_from(self.max_participants).ok().filter(|c| *c > 0)
    }
}

/// Lifecycle status of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Ended,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }
}

/// One live period of a Looproom.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub looproom_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
    pub peak_participants: i64,
    pub total_messages: i64,
    pub duration_seconds: Option<i64>,
}

impl SessionRow {
    pub fn status(&self) -> Option<SessionStatus> {
        SessionStatus::parse(&self.status)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.started_at)
    }
}

/// Persisted room membership. Survives disconnects so bans and moderator
/// status apply across reconnects.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ParticipantRow {
    pub looproom_id: String,
    pub user_id: String,
    pub mood: Option<String>,
    pub is_moderator: bool,
    pub is_active: bool,
    pub is_muted: bool,
    pub muted_until: Option<String>,
    pub is_banned: bool,
    pub banned_until: Option<String>,
    pub warning_count: i64,
    pub joined_at: String,
    pub left_at: Option<String>,
}

impl ParticipantRow {
    pub fn banned_until(&self) -> Option<DateTime<Utc>> {
        self.banned_until.as_deref().and_then(parse_timestamp)
    }

    pub fn muted_until(&self) -> Option<DateTime<Utc>> {
        self.muted_until.as_deref().and_then(parse_timestamp)
    }
}

/// Kind of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Message,
    System,
    Announcement,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::System => "system",
            Self::Announcement => "announcement",
        }
    }
}

/// A stored Looproom message. Author name is joined in from `users`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub looproom_id: String,
    pub session_id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub user_role: String,
    pub content: String,
    pub message_type: String,
    pub is_pinned: bool,
    pub is_deleted: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
}

/// Parameters for inserting a message.
pub struct InsertMessageParams<'a> {
    pub id: &'a str,
    pub looproom_id: &'a str,
    pub session_id: Option<&'a str>,
    pub user_id: &'a str,
    pub content: &'a str,
    pub message_type: MessageType,
    pub created_at: &'a str,
}

/// An append-only moderation audit record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModerationLogRow {
    pub id: String,
    pub looproom_id: String,
    pub moderator_id: String,
    pub target_user_id: Option<String>,
    pub action: String,
    pub reason: Option<String>,
    pub metadata: String,
    pub created_at: String,
}

/// Parameters for appending a moderation log entry.
pub struct CreateModerationLogParams<'a> {
    pub id: &'a str,
    pub looproom_id: &'a str,
    pub moderator_id: &'a str,
    pub target_user_id: Option<&'a str>,
    pub action: &'a str,
    pub reason: Option<&'a str>,
    pub metadata: &'a serde_json::Value,
}
