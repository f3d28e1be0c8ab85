use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::db::format_timestamp;
use crate::db::queries::participants;
use crate::error::{RoomError, RoomResult};

/// Longest accepted restriction, in minutes (one year).
pub const MAX_DURATION_MINUTES: u64 = 525_600;

/// A moderation action with its own payload. `duration` is in minutes;
/// omitted means permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ModerationAction {
    Mute {
        #[serde(default)]
        duration: Option<u64>,
    },
    Unmute,
    Kick,
    Ban {
        #[serde(default)]
        duration: Option<u64>,
    },
    Unban,
    Warn,
    Promote,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mute { .. } => "mute",
            Self::Unmute => "unmute",
            Self::Kick => "kick",
            Self::Ban { .. } => "ban",
            Self::Unban => "unban",
            Self::Warn => "warn",
            Self::Promote => "promote",
        }
    }

    pub fn duration_minutes(&self) -> Option<u64> {
        match self {
            Self::Mute { duration } | Self::Ban { duration } => *duration,
            Self::Unmute | Self::Kick | Self::Unban | Self::Warn | Self::Promote => None,
        }
    }

    pub fn validate(&self) -> RoomResult<()> {
        match self.duration_minutes() {
            Some(0) => Err(RoomError::InvalidInput("duration must be positive".into())),
            Some(d) if d > MAX_DURATION_MINUTES => Err(RoomError::InvalidInput(format!(
                "duration too long (max {MAX_DURATION_MINUTES} minutes)"
            ))),
            _ => Ok(()),
        }
    }

    /// When a timed restriction lapses. `None` for permanent restrictions
    /// and for actions that set no restriction.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let minutes = i64::try_from(self.duration_minutes()?).ok()?;
        Some(now + Duration::minutes(minutes))
    }

    /// Whether the target's live connections are removed from the room.
    pub fn evicts(&self) -> bool {
        matches!(self, Self::Kick | Self::Ban { .. })
    }

    /// Granting moderator status is reserved to the room creator.
    pub fn creator_only(&self) -> bool {
        matches!(self, Self::Promote)
    }
}

/// Result of applying an action to the target's membership record.
#[derive(Debug, Default, PartialEq)]
pub struct Applied {
    pub expires_at: Option<DateTime<Utc>>,
    pub warning_count: Option<i64>,
}

/// Write the action's effect on the target's membership record. A record is
/// created (inactive) if the target never joined, so bans can be issued
/// ahead of a visit.
pub async fn apply(
    pool: &SqlitePool,
    looproom_id: &str,
    target_user_id: &str,
    action: ModerationAction,
    now: DateTime<Utc>,
) -> RoomResult<Applied> {
    let now_str = format_timestamp(now);
    participants::ensure_participant(pool, looproom_id, target_user_id, &now_str).await?;

    let expires_at = action.expires_at(now);
    let until = expires_at.map(format_timestamp);
    let mut applied = Applied {
        expires_at,
        warning_count: None,
    };

    match action {
        ModerationAction::Mute { .. } => {
            participants::set_muted(pool, looproom_id, target_user_id, true, until.as_deref()).await?;
        }
        ModerationAction::Unmute => {
            participants::set_muted(pool, looproom_id, target_user_id, false, None).await?;
        }
        ModerationAction::Kick => {
            participants::mark_inactive(pool, looproom_id, target_user_id, &now_str).await?;
        }
        ModerationAction::Ban { .. } => {
            participants::set_banned(pool, looproom_id, target_user_id, true, until.as_deref()).await?;
        }
        ModerationAction::Unban => {
            participants::set_banned(pool, looproom_id, target_user_id, false, None).await?;
        }
        ModerationAction::Warn => {
            applied.warning_count =
                participants::add_warning(pool, looproom_id, target_user_id).await?;
        }
        ModerationAction::Promote => {
            participants::set_moderator(pool, looproom_id, target_user_id, true).await?;
        }
    }

    Ok(applied)
}
