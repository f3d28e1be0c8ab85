//! Wire format of the real-time channel.
//!
//! Inbound frames are `{"event", "data", "ackId"?}`; outbound frames are
//! `{"event", "data"}`, plus `{"event": "ack", "ackId", "data"}` replies.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::moderation::ModerationAction;
use crate::db::models::{LooproomRow, MessageRow, SessionRow, SessionStatus};
use crate::db::queries::reactions::ReactionMap;
use crate::error::RoomError;

// ── Inbound ─────────────────────────────────────────────────────────

/// A frame as received, before the payload is decoded for its event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub ack_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLooproom {
    pub looproom_id: String,
    #[serde(default)]
    pub mood: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LooproomRef {
    pub looproom_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub looproom_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub looproom_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactToMessage {
    pub message_id: String,
    pub emoji: String,
    /// When given, the message must belong to this room.
    #[serde(default)]
    pub looproom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub looproom_id: String,
    #[serde(default)]
    pub stream_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStream {
    pub looproom_id: String,
    /// `null` or an empty string clears the stream.
    #[serde(default)]
    pub stream_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerateUser {
    pub looproom_id: String,
    pub target_user_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub action: ModerationAction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: String,
    pub looproom_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAnnouncement {
    pub looproom_id: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettings {
    pub looproom_id: String,
    #[serde(default)]
    pub chat_enabled: Option<bool>,
    #[serde(default)]
    pub slow_mode_seconds: Option<i64>,
    #[serde(default)]
    pub max_participants: Option<i64>,
}

/// A decoded client event.
#[derive(Debug)]
pub enum ClientEvent {
    JoinLooproom(JoinLooproom),
    LeaveLooproom(LooproomRef),
    SendMessage(SendMessage),
    Typing(Typing),
    ReactToMessage(ReactToMessage),
    StartSession(StartSession),
    EndSession(LooproomRef),
    PauseSession(LooproomRef),
    ResumeSession(LooproomRef),
    UpdateStream(UpdateStream),
    ModerateUser(ModerateUser),
    DeleteMessage(MessageRef),
    PinMessage(MessageRef),
    UnpinMessage(MessageRef),
    SendAnnouncement(SendAnnouncement),
    UpdateSettings(UpdateSettings),
}

fn payload<T: DeserializeOwned>(data: Value) -> Result<T, RoomError> {
    serde_json::from_value(data).map_err(|e| RoomError::InvalidInput(format!("invalid payload: {e}")))
}

impl ClientEvent {
    /// Decode the payload of a named event.
    pub fn parse(event: &str, data: Value) -> Result<Self, RoomError> {
        Ok(match event {
            "join-looproom" => Self::JoinLooproom(payload(data)?),
            "leave-looproom" => Self::LeaveLooproom(payload(data)?),
            "send-message" => Self::SendMessage(payload(data)?),
            "typing" => Self::Typing(payload(data)?),
            "react-to-message" => Self::ReactToMessage(payload(data)?),
            "start-session" => Self::StartSession(payload(data)?),
            "end-session" => Self::EndSession(payload(data)?),
            "pause-session" => Self::PauseSession(payload(data)?),
            "resume-session" => Self::ResumeSession(payload(data)?),
            "update-stream" => Self::UpdateStream(payload(data)?),
            "moderate-user" => Self::ModerateUser(payload(data)?),
            "delete-message" => Self::DeleteMessage(payload(data)?),
            "pin-message" => Self::PinMessage(payload(data)?),
            "unpin-message" => Self::UnpinMessage(payload(data)?),
            "send-announcement" => Self::SendAnnouncement(payload(data)?),
            "update-settings" => Self::UpdateSettings(payload(data)?),
            other => return Err(RoomError::InvalidInput(format!("unknown event: {other}"))),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinLooproom(_) => "join-looproom",
            Self::LeaveLooproom(_) => "leave-looproom",
            Self::SendMessage(_) => "send-message",
            Self::Typing(_) => "typing",
            Self::ReactToMessage(_) => "react-to-message",
            Self::StartSession(_) => "start-session",
            Self::EndSession(_) => "end-session",
            Self::PauseSession(_) => "pause-session",
            Self::ResumeSession(_) => "resume-session",
            Self::UpdateStream(_) => "update-stream",
            Self::ModerateUser(_) => "moderate-user",
            Self::DeleteMessage(_) => "delete-message",
            Self::PinMessage(_) => "pin-message",
            Self::UnpinMessage(_) => "unpin-message",
            Self::SendAnnouncement(_) => "send-announcement",
            Self::UpdateSettings(_) => "update-settings",
        }
    }

    /// Room the event targets, if the payload names one.
    pub fn looproom_id(&self) -> Option<&str> {
        match self {
            Self::JoinLooproom(e) => Some(e.looproom_id.as_str()),
            Self::LeaveLooproom(e)
            | Self::EndSession(e)
            | Self::PauseSession(e)
            | Self::ResumeSession(e) => Some(e.looproom_id.as_str()),
            Self::SendMessage(e) => Some(e.looproom_id.as_str()),
            Self::Typing(e) => Some(e.looproom_id.as_str()),
            Self::ReactToMessage(e) => e.looproom_id.as_deref(),
            Self::StartSession(e) => Some(e.looproom_id.as_str()),
            Self::UpdateStream(e) => Some(e.looproom_id.as_str()),
            Self::ModerateUser(e) => Some(e.looproom_id.as_str()),
            Self::DeleteMessage(e) | Self::PinMessage(e) | Self::UnpinMessage(e) => {
                Some(e.looproom_id.as_str())
            }
            Self::SendAnnouncement(e) => Some(e.looproom_id.as_str()),
            Self::UpdateSettings(e) => Some(e.looproom_id.as_str()),
        }
    }
}

// ── Shared payloads ─────────────────────────────────────────────────

/// A message as clients see it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub looproom_id: String,
    pub content: String,
    pub user_id: String,
    pub user_name: String,
    /// Author's account role.
    pub user_type: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub timestamp: String,
    pub is_pinned: bool,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    pub reactions: ReactionMap,
}

impl MessagePayload {
    pub fn from_row(row: MessageRow, reactions: ReactionMap) -> Self {
        Self {
            id: row.id,
            looproom_id: row.looproom_id,
            content: row.content,
            user_id: row.user_id,
            user_name: row.user_name,
            user_type: row.user_role,
            message_type: row.message_type,
            timestamp: row.created_at,
            is_pinned: row.is_pinned,
            is_deleted: row.is_deleted,
            deleted_by: row.deleted_by,
            reactions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub status: SessionStatus,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub peak_participants: i64,
    pub total_messages: i64,
    pub duration_seconds: Option<i64>,
}

impl From<&SessionRow> for SessionSummary {
    fn from(row: &SessionRow) -> Self {
        Self {
            id: row.id.clone(),
            status: row.status().unwrap_or(SessionStatus::Ended),
            started_at: row.started_at.clone(),
            ended_at: row.ended_at.clone(),
            peak_participants: row.peak_participants,
            total_messages: row.total_messages,
            duration_seconds: row.duration_seconds,
        }
    }
}

/// Room metadata as clients see it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LooproomSummary {
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
}

impl From<&LooproomRow> for LooproomSummary {
    fn from(row: &LooproomRow) -> Self {
        Self {
            id: row.id.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            category: row.category.clone(),
            creator_id: row.creator_id.clone(),
            is_live: row.is_live,
            current_session_id: row.current_session_id.clone(),
            stream_url: row.stream_url.clone(),
            chat_enabled: row.chat_enabled,
            slow_mode_seconds: row.slow_mode_seconds,
            max_participants: row.max_participants,
        }
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// Events pushed to room members.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    UserJoined {
        looproom_id: String,
        user_id: String,
        name: String,
        mood: Option<String>,
        participant_count: usize,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        looproom_id: String,
        user_id: String,
        name: String,
        participant_count: usize,
        timestamp: DateTime<Utc>,
    },
    NewMessage(MessagePayload),
    UserTyping {
        looproom_id: String,
        user_id: String,
        name: String,
        is_typing: bool,
    },
    MessageReactionUpdated {
        looproom_id: String,
        message_id: String,
        reactions: ReactionMap,
    },
    SessionStarted {
        looproom_id: String,
        session: SessionSummary,
        stream_url: Option<String>,
    },
    SessionEnded {
        looproom_id: String,
        session_id: String,
        peak_participants: i64,
        total_messages: i64,
        /// Seconds.
        duration: i64,
    },
    SessionPaused {
        looproom_id: String,
        session_id: String,
    },
    SessionResumed {
        looproom_id: String,
        session_id: String,
    },
    StreamUpdated {
        looproom_id: String,
        stream_url: Option<String>,
    },
    UserModerated {
        looproom_id: String,
        user_id: String,
        action: &'static str,
        moderator_id: String,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Sent only to the target's own connections.
    ModerationAction {
        looproom_id: String,
        action: &'static str,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    MessageDeleted {
        looproom_id: String,
        message_id: String,
        deleted_by: String,
    },
    MessagePinned {
        looproom_id: String,
        message_id: String,
        pinned_by: String,
    },
    MessageUnpinned {
        looproom_id: String,
        message_id: String,
    },
    SettingsUpdated {
        looproom_id: String,
        chat_enabled: bool,
        slow_mode_seconds: i64,
        max_participants: i64,
    },
    Announcement {
        looproom_id: String,
        id: String,
        content: String,
        creator_name: String,
        timestamp: String,
    },
}

/// Body of an acknowledgement.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckBody {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AckBody {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            code: None,
            retry_after: None,
            data,
        }
    }

    pub fn from_error(err: &RoomError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            code: Some(err.code()),
            retry_after: err.retry_after_secs(),
            data: None,
        }
    }
}

/// Reply to an inbound frame that carried an `ackId`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    event: &'static str,
    pub ack_id: u64,
    pub data: AckBody,
}

impl AckFrame {
    pub fn new(ack_id: u64, data: AckBody) -> Self {
        Self {
            event: "ack",
            ack_id,
            data,
        }
    }
}

/// Anything queued for a connection's writer.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Event(ServerEvent),
    Ack(AckFrame),
}
