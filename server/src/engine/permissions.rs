//! Authorization guards for room actions.
//!
//! Every guard is a pure function of the persisted room and participant
//! records plus the current time. Callers load fresh records for every
//! action; nothing here is cached.

use bitflags::bitflags;
use chrono::{DateTime, Utc};

use crate::db::models::{LooproomRow, ParticipantRow};
use crate::error::{RoomError, RoomResult};

bitflags! {
    /// What an actor may currently do in a room.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Has an active membership record.
        const PARTICIPATE       = 1 << 0;
        const CHAT              = 1 << 1;
        const REACT             = 1 << 2;
        /// Moderate users, delete and pin messages.
        const MODERATE          = 1 << 3;
        /// Session lifecycle, stream, announcements, settings, promote.
        const MANAGE_ROOM       = 1 << 4;
    }
}

/// Capabilities of the room creator.
pub const CREATOR: Capabilities = Capabilities::all();

/// Capabilities of an active, unrestricted participant.
pub const PARTICIPANT: Capabilities = Capabilities::PARTICIPATE
    .union(Capabilities::CHAT)
    .union(Capabilities::REACT);

/// The single "is this restriction in force" check used for bans and mutes.
/// A set flag with no expiry is permanent.
pub fn is_restriction_active(flag: bool, until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    flag && until.is_none_or(|until| until > now)
}

fn is_banned(participant: &ParticipantRow, now: DateTime<Utc>) -> bool {
    is_restriction_active(participant.is_banned, participant.banned_until(), now)
}

fn is_muted(participant: &ParticipantRow, now: DateTime<Utc>) -> bool {
    is_restriction_active(participant.is_muted, participant.muted_until(), now)
}

/// Compute an actor's capabilities in a room.
///
///   1. The creator gets everything.
///   2. A banned or inactive participant gets nothing.
///   3. An active participant can participate, chat and react.
///   4. A mute removes CHAT.
///   5. The moderator flag adds MODERATE.
pub fn effective_capabilities(
    room: &LooproomRow,
    participant: Option<&ParticipantRow>,
    user_id: &str,
    now: DateTime<Utc>,
) -> Capabilities {
    if room.is_creator(user_id) {
        return CREATOR;
    }

    let Some(p) = participant else {
        return Capabilities::empty();
    };
    if !p.is_active || is_banned(p, now) {
        return Capabilities::empty();
    }

    let mut caps = PARTICIPANT;
    if is_muted(p, now) {
        caps.remove(Capabilities::CHAT);
    }
    if p.is_moderator {
        caps |= Capabilities::MODERATE;
    }
    caps
}

// ── Guards ──────────────────────────────────────────────────────────

pub fn require_creator(room: &LooproomRow, user_id: &str) -> RoomResult<()> {
    if room.is_creator(user_id) {
        Ok(())
    } else {
        Err(RoomError::Forbidden("not creator".into()))
    }
}

/// The creator, or a participant with an active moderator record.
pub fn require_moderator_or_creator(
    room: &LooproomRow,
    participant: Option<&ParticipantRow>,
    user_id: &str,
) -> RoomResult<()> {
    if room.is_creator(user_id) {
        return Ok(());
    }
    match participant {
        Some(p) if p.is_active && p.is_moderator => Ok(()),
        _ => Err(RoomError::Forbidden("not authorized".into())),
    }
}

/// Used on join, before any membership is marked active.
pub fn require_not_banned(participant: Option<&ParticipantRow>, now: DateTime<Utc>) -> RoomResult<()> {
    match participant {
        Some(p) if is_banned(p, now) => Err(RoomError::Forbidden("banned".into())),
        _ => Ok(()),
    }
}

/// An active membership that is not under a ban. The creator always passes.
pub fn require_active_participant(
    room: &LooproomRow,
    participant: Option<&ParticipantRow>,
    user_id: &str,
    now: DateTime<Utc>,
) -> RoomResult<()> {
    if room.is_creator(user_id) {
        return Ok(());
    }
    let Some(p) = participant.filter(|p| p.is_active) else {
        return Err(RoomError::Forbidden("not a participant".into()));
    };
    if is_banned(p, now) {
        return Err(RoomError::Forbidden("banned".into()));
    }
    Ok(())
}

/// Active participant check plus the mute restriction.
pub fn require_can_chat(
    room: &LooproomRow,
    participant: Option<&ParticipantRow>,
    user_id: &str,
    now: DateTime<Utc>,
) -> RoomResult<()> {
    require_active_participant(room, participant, user_id, now)?;
    if room.is_creator(user_id) {
        return Ok(());
    }
    match participant {
        Some(p) if is_muted(p, now) => Err(RoomError::Forbidden("muted".into())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn room() -> LooproomRow {
        LooproomRow {
            id: "r1".into(),
            name: "Calm Corner".into(),
            description: None,
            category: None,
            creator_id: "creator".into(),
            is_live: false,
            current_session_id: None,
            stream_url: None,
            chat_enabled: true,
            slow_mode_seconds: 0,
            max_participants: 100,
            created_at: "2026-03-01T00:00:00.000Z".into(),
        }
    }

    fn participant(user_id: &str) -> ParticipantRow {
        ParticipantRow {
            looproom_id: "r1".into(),
            user_id: user_id.into(),
            mood: None,
            is_moderator: false,
            is_active: true,
            is_muted: false,
            muted_until: None,
            is_banned: false,
            banned_until: None,
            warning_count: 0,
            joined_at: "2026-03-01T00:00:00.000Z".into(),
            left_at: None,
        }
    }

    fn ts(at: DateTime<Utc>) -> Option<String> {
        Some(crate::db::format_timestamp(at))
    }

    #[test]
    fn test_restriction_expiry() {
        let now = Utc::now();
        assert!(!is_restriction_active(false, None, now));
        assert!(is_restriction_active(true, None, now));
        assert!(is_restriction_active(true, Some(now + Duration::minutes(5)), now));
        assert!(!is_restriction_active(true, Some(now - Duration::seconds(1)), now));
        assert!(!is_restriction_active(true, Some(now), now));
    }

    #[test]
    fn test_creator_guard() {
        let room = room();
        assert!(require_creator(&room, "creator").is_ok());
        let err = require_creator(&room, "u1").unwrap_err();
        assert_eq!(err.to_string(), "not creator");
    }

    #[test]
    fn test_moderator_or_creator() {
        let room = room();
        let mut p = participant("mod");
        assert!(require_moderator_or_creator(&room, None, "creator").is_ok());

        let err = require_moderator_or_creator(&room, Some(&p), "mod").unwrap_err();
        assert_eq!(err.to_string(), "not authorized");

        p.is_moderator = true;
        assert!(require_moderator_or_creator(&room, Some(&p), "mod").is_ok());

        // An inactive moderator record does not count.
        p.is_active = false;
        assert!(require_moderator_or_creator(&room, Some(&p), "mod").is_err());
    }

    #[test]
    fn test_active_participant_and_ban() {
        let room = room();
        let now = Utc::now();
        let mut p = participant("u1");
        assert!(require_active_participant(&room, Some(&p), "u1", now).is_ok());

        let err = require_active_participant(&room, None, "u1", now).unwrap_err();
        assert_eq!(err.to_string(), "not a participant");

        p.is_banned = true;
        let err = require_active_participant(&room, Some(&p), "u1", now).unwrap_err();
        assert_eq!(err.to_string(), "banned");

        p.banned_until = ts(now - Duration::minutes(1));
        assert!(require_active_participant(&room, Some(&p), "u1", now).is_ok());

        p.banned_until = ts(now + Duration::minutes(1));
        assert!(require_active_participant(&room, Some(&p), "u1", now).is_err());
    }

    #[test]
    fn test_not_banned_on_join() {
        let now = Utc::now();
        assert!(require_not_banned(None, now).is_ok());

        let mut p = participant("u1");
        p.is_active = false;
        p.is_banned = true;
        assert!(require_not_banned(Some(&p), now).is_err());

        p.banned_until = ts(now - Duration::hours(1));
        assert!(require_not_banned(Some(&p), now).is_ok());
    }

    #[test]
    fn test_can_chat_respects_mute() {
        let room = room();
        let now = Utc::now();
        let mut p = participant("u1");
        p.is_muted = true;
        p.muted_until = ts(now + Duration::minutes(10));

        let err = require_can_chat(&room, Some(&p), "u1", now).unwrap_err();
        assert_eq!(err.to_string(), "muted");
        assert!(require_can_chat(&room, Some(&p), "u1", now + Duration::minutes(11)).is_ok());

        // Ban wins over mute.
        p.is_banned = true;
        let err = require_can_chat(&room, Some(&p), "u1", now).unwrap_err();
        assert_eq!(err.to_string(), "banned");
    }

    #[test]
    fn test_effective_capabilities() {
        let room = room();
        let now = Utc::now();
        assert_eq!(effective_capabilities(&room, None, "creator", now), CREATOR);
        assert_eq!(effective_capabilities(&room, None, "u1", now), Capabilities::empty());

        let mut p = participant("u1");
        assert_eq!(effective_capabilities(&room, Some(&p), "u1", now), PARTICIPANT);

        p.is_moderator = true;
        p.is_muted = true;
        let caps = effective_capabilities(&room, Some(&p), "u1", now);
        assert!(caps.contains(Capabilities::MODERATE));
        assert!(!caps.contains(Capabilities::CHAT));
        assert!(!caps.contains(Capabilities::MANAGE_ROOM));

        p.is_banned = true;
        assert_eq!(effective_capabilities(&room, Some(&p), "u1", now), Capabilities::empty());
    }
}
