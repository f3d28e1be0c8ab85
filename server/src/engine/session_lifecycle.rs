//! Live-session state machine of a Looproom.
//!
//! ```text
//! offline --start--> active --pause--> paused --resume--> active
//!                      |                  |
//!                      +-------end--------+--> ended (room offline again)
//! ```
//!
//! Every transition is creator-only and counted by the session limiter.
//! Transitions are re-checked by conditional writes, so two racing
//! requests cannot both succeed.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::{ServerEvent, SessionSummary};
use super::hub::{ConnectionHub, ConnectionId};
use super::permissions::require_creator;
use super::rate_limiter::ActionLimiters;
use super::room_manager::{Broadcaster, RoomManager};
use super::validation;
use crate::db::format_timestamp;
use crate::db::models::{LooproomRow, SessionStatus};
use crate::db::queries::{looprooms, participants, sessions};
use crate::error::{RoomError, RoomResult};

pub struct SessionController {
    pool: SqlitePool,
    rooms: Arc<RoomManager>,
    hub: Arc<ConnectionHub>,
    limiters: Arc<ActionLimiters>,
}

impl SessionController {
    pub fn new(
        pool: SqlitePool,
        rooms: Arc<RoomManager>,
        hub: Arc<ConnectionHub>,
        limiters: Arc<ActionLimiters>,
    ) -> Self {
        Self {
            pool,
            rooms,
            hub,
            limiters,
        }
    }

    /// Load the room and run the creator and rate-limit checks shared by
    /// every transition.
    async fn authorize(&self, actor: &str, looproom_id: &str) -> RoomResult<LooproomRow> {
        let room = looprooms::get_looproom(&self.pool, looproom_id)
            .await?
            .ok_or_else(|| RoomError::not_found("looproom"))?;
        require_creator(&room, actor)?;
        self.limiters
            .session
            .check(actor)
            .map_err(|retry_after| RoomError::RateLimited { retry_after })?;
        Ok(room)
    }

    fn live_session_id(room: &LooproomRow) -> RoomResult<String> {
        match (&room.current_session_id, room.is_live) {
            (Some(id), true) => Ok(id.clone()),
            _ => Err(RoomError::Conflict("not live".into())),
        }
    }

    /// Take an offline room live. If `connection` is joined to the room it
    /// becomes the room's broadcaster.
    pub async fn start(
        &self,
        actor: &str,
        looproom_id: &str,
        stream_url: Option<&str>,
        connection: Option<ConnectionId>,
    ) -> RoomResult<SessionSummary> {
        let room = self.authorize(actor, looproom_id).await?;
        if room.is_live {
            return Err(RoomError::Conflict("already live".into()));
        }

        let stream_url = stream_url.map(str::trim).filter(|u| !u.is_empty());
        if let Some(url) = stream_url {
            validation::validate_stream_url(url).map_err(RoomError::InvalidInput)?;
        }

        let session_id = Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        let peak = self.rooms.participant_count(looproom_id) as i64;

        let started = sessions::start_session(
            &self.pool,
            &session_id,
            looproom_id,
            &now,
            peak,
            stream_url,
        )
        .await?;
        if !started {
            return Err(RoomError::Conflict("already live".into()));
        }

        let session = sessions::get_session(&self.pool, &session_id)
            .await?
            .ok_or_else(|| RoomError::Internal(format!("session {session_id} vanished after insert")))?;
        let summary = SessionSummary::from(&session);

        if let Some(connection_id) = connection
            && self.rooms.is_connection_in_room(looproom_id, connection_id)
            && let Err(e) = self.rooms.set_broadcaster(
                looproom_id,
                Broadcaster {
                    connection_id,
                    user_id: actor.to_string(),
                },
            )
        {
            warn!(%looproom_id, error = %e, "could not claim broadcaster slot");
        }

        let stream_url = stream_url.map(str::to_string).or(room.stream_url);
        self.hub.broadcast(
            looproom_id,
            &ServerEvent::SessionStarted {
                looproom_id: looproom_id.to_string(),
                session: summary.clone(),
                stream_url,
            },
            None,
        );

        info!(%looproom_id, %session_id, peak, "session started");
        Ok(summary)
    }

    /// End the live session, publish its final figures and clear the room.
    pub async fn end(&self, actor: &str, looproom_id: &str) -> RoomResult<SessionSummary> {
        let room = self.authorize(actor, looproom_id).await?;
        let session_id = Self::live_session_id(&room)?;

        let session = sessions::get_session(&self.pool, &session_id)
            .await?
            .ok_or_else(|| RoomError::not_found("session"))?;
        let started_at = session.started_at().ok_or_else(|| {
            RoomError::Internal(format!("session {session_id} has malformed start time"))
        })?;

        let now = Utc::now();
        let duration = (now - started_at).num_seconds().max(0);
        let live_peak = self
            .rooms
            .get_stats(looproom_id)
            .map(|s| s.peak_count as i64)
            .unwrap_or(0);
        let now_str = format_timestamp(now);

        let ended = sessions::end_session(
            &self.pool,
            &sessions::EndSessionParams {
                session_id: &session_id,
                looproom_id,
                ended_at: &now_str,
                duration_seconds: duration,
                peak_participants: session.peak_participants.max(live_peak),
            },
        )
        .await?
        .ok_or_else(|| RoomError::Conflict("not live".into()))?;

        self.rooms.clear_broadcaster(looproom_id);
        self.hub.broadcast(
            looproom_id,
            &ServerEvent::SessionEnded {
                looproom_id: looproom_id.to_string(),
                session_id: session_id.clone(),
                peak_participants: ended.peak_participants,
                total_messages: ended.total_messages,
                duration: ended.duration_seconds.unwrap_or(duration),
            },
            None,
        );

        if let Err(e) = participants::mark_all_inactive(&self.pool, looproom_id, &now_str).await {
            error!(%looproom_id, error = %e, "failed to deactivate participants after session end");
        }
        let evicted = self.hub.evict_room(looproom_id);
        self.rooms.remove_room(looproom_id);

        info!(
            %looproom_id,
            %session_id,
            duration,
            peak = ended.peak_participants,
            evicted = evicted.len(),
            "session ended"
        );
        Ok(SessionSummary::from(&ended))
    }

    pub async fn pause(&self, actor: &str, looproom_id: &str) -> RoomResult<SessionSummary> {
        self.transition(actor, looproom_id, SessionStatus::Active, SessionStatus::Paused)
            .await
    }

    pub async fn resume(&self, actor: &str, looproom_id: &str) -> RoomResult<SessionSummary> {
        self.transition(actor, looproom_id, SessionStatus::Paused, SessionStatus::Active)
            .await
    }

    async fn transition(
        &self,
        actor: &str,
        looproom_id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> RoomResult<SessionSummary> {
        let room = self.authorize(actor, looproom_id).await?;
        let session_id = Self::live_session_id(&room)?;

        if !sessions::transition_status(&self.pool, &session_id, from, to).await? {
            let session = sessions::get_session(&self.pool, &session_id)
                .await?
                .ok_or_else(|| RoomError::not_found("session"))?;
            return Err(RoomError::Conflict(format!(
                "session is {}, not {}",
                session.status,
                from.as_str()
            )));
        }

        let session = sessions::get_session(&self.pool, &session_id)
            .await?
            .ok_or_else(|| RoomError::not_found("session"))?;

        let event = match to {
            SessionStatus::Paused => ServerEvent::SessionPaused {
                looproom_id: looproom_id.to_string(),
                session_id: session_id.clone(),
            },
            _ => ServerEvent::SessionResumed {
                looproom_id: looproom_id.to_string(),
                session_id: session_id.clone(),
            },
        };
        self.hub.broadcast(looproom_id, &event, None);

        info!(%looproom_id, %session_id, status = to.as_str(), "session status changed");
        Ok(SessionSummary::from(&session))
    }

    /// The room's current session, if it is live.
    pub async fn current(&self, looproom_id: &str) -> RoomResult<Option<SessionSummary>> {
        let room = looprooms::get_looproom(&self.pool, looproom_id)
            .await?
            .ok_or_else(|| RoomError::not_found("looproom"))?;
        let Some(session_id) = room.current_session_id else {
            return Ok(None);
        };
        let session = sessions::get_session(&self.pool, &session_id).await?;
        Ok(session.as_ref().map(SessionSummary::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsSection;
    use crate::db::fixtures::{seed_room, seed_user, setup_db};
    use crate::db::models::UserRow;
    use crate::db::queries::users;
    use crate::engine::events::Outbound;
    use crate::engine::room_manager::ParticipantInfo;

    struct Harness {
        pool: SqlitePool,
        rooms: Arc<RoomManager>,
        hub: Arc<ConnectionHub>,
        controller: SessionController,
    }

    async fn harness(limits: LimitsSection) -> Harness {
        let pool = setup_db().await;
        seed_room(&pool, "r1", "creator").await;
        seed_user(&pool, "u1", "Alice").await;
        let rooms = Arc::new(RoomManager::new());
        let hub = Arc::new(ConnectionHub::new(64));
        let limiters = Arc::new(ActionLimiters::from_config(&limits));
        let controller =
            SessionController::new(pool.clone(), rooms.clone(), hub.clone(), limiters);
        Harness {
            pool,
            rooms,
            hub,
            controller,
        }
    }

    async fn connect(h: &Harness, user_id: &str) -> (ConnectionId, tokio::sync::mpsc::Receiver<Outbound>) {
        let user: UserRow = users::get_user(&h.pool, user_id).await.unwrap().unwrap();
        let (conn, rx) = h.hub.register(&user);
        h.hub.join_channel("r1", conn.id);
        h.rooms.join_room(
            "r1",
            conn.id,
            ParticipantInfo {
                user_id: user.id.clone(),
                name: user.name.clone(),
                mood: None,
                joined_at: Utc::now(),
            },
        );
        (conn.id, rx)
    }

    fn events(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let v = serde_json::to_value(frame).unwrap();
            names.push(v["event"].as_str().unwrap().to_string());
        }
        names
    }

    #[tokio::test]
    async fn test_start_goes_live_and_claims_broadcaster() {
        let h = harness(LimitsSection::default()).await;
        let (creator_conn, mut rx) = connect(&h, "creator").await;
        connect(&h, "u1").await;

        let summary = h
            .controller
            .start("creator", "r1", Some("https://cdn.vybe.live/r1.m3u8"), Some(creator_conn))
            .await
            .unwrap();
        assert_eq!(summary.status, SessionStatus::Active);
        assert_eq!(summary.peak_participants, 2);

        let room = looprooms::get_looproom(&h.pool, "r1").await.unwrap().unwrap();
        assert!(room.is_live);
        assert_eq!(room.current_session_id.as_deref(), Some(summary.id.as_str()));
        assert_eq!(h.rooms.get_broadcaster("r1").unwrap().connection_id, creator_conn);
        assert_eq!(events(&mut rx), vec!["session-started"]);
    }

    #[tokio::test]
    async fn test_start_twice_conflicts() {
        let h = harness(LimitsSection::default()).await;
        h.controller.start("creator", "r1", None, None).await.unwrap();

        let err = h.controller.start("creator", "r1", None, None).await.unwrap_err();
        assert!(matches!(err, RoomError::Conflict(ref m) if m == "already live"));
    }

    #[tokio::test]
    async fn test_only_creator_controls_sessions() {
        let h = harness(LimitsSection::default()).await;
        let err = h.controller.start("u1", "r1", None, None).await.unwrap_err();
        assert!(matches!(err, RoomError::Forbidden(ref m) if m == "not creator"));

        let err = h.controller.start("creator", "missing", None, None).await.unwrap_err();
        assert!(matches!(err, RoomError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_end_offline_room_conflicts() {
        let h = harness(LimitsSection::default()).await;
        let err = h.controller.end("creator", "r1").await.unwrap_err();
        assert!(matches!(err, RoomError::Conflict(ref m) if m == "not live"));
        let err = h.controller.pause("creator", "r1").await.unwrap_err();
        assert!(matches!(err, RoomError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_end_reports_stats_and_clears_room() {
        let h = harness(LimitsSection::default()).await;
        let (creator_conn, mut rx_creator) = connect(&h, "creator").await;
        let (_u1_conn, mut rx_u1) = connect(&h, "u1").await;
        h.controller.start("creator", "r1", None, Some(creator_conn)).await.unwrap();

        let ended = h.controller.end("creator", "r1").await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.duration_seconds.is_some());
        assert_eq!(ended.peak_participants, 2);

        let room = looprooms::get_looproom(&h.pool, "r1").await.unwrap().unwrap();
        assert!(!room.is_live);
        assert!(room.current_session_id.is_none());
        assert!(h.rooms.get_stats("r1").is_none());
        assert!(h.hub.channel_members("r1").is_empty());
        assert_eq!(events(&mut rx_creator), vec!["session-started", "session-ended"]);
        assert_eq!(events(&mut rx_u1), vec!["session-started", "session-ended"]);
    }

    #[tokio::test]
    async fn test_pause_resume_cycle() {
        let h = harness(LimitsSection::default()).await;
        h.controller.start("creator", "r1", None, None).await.unwrap();

        let paused = h.controller.pause("creator", "r1").await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);
        let err = h.controller.pause("creator", "r1").await.unwrap_err();
        assert!(matches!(err, RoomError::Conflict(_)));

        let resumed = h.controller.resume("creator", "r1").await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        let err = h.controller.resume("creator", "r1").await.unwrap_err();
        assert!(matches!(err, RoomError::Conflict(_)));

        // Ending from paused is allowed.
        h.controller.pause("creator", "r1").await.unwrap();
        let ended = h.controller.end("creator", "r1").await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn test_session_actions_are_rate_limited() {
        let h = harness(LimitsSection {
            session_actions_per_minute: 2,
            ..LimitsSection::default()
        })
        .await;
        h.controller.start("creator", "r1", None, None).await.unwrap();
        h.controller.pause("creator", "r1").await.unwrap();

        let err = h.controller.resume("creator", "r1").await.unwrap_err();
        assert!(matches!(err, RoomError::RateLimited { .. }));
        let session = h.controller.current("r1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
    }

    #[tokio::test]
    async fn test_invalid_stream_url_rejected_before_going_live() {
        let h = harness(LimitsSection::default()).await;
        let err = h
            .controller
            .start("creator", "r1", Some("javascript:alert(1)"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::InvalidInput(_)));
        assert!(h.controller.current("r1").await.unwrap().is_none());
    }
}
