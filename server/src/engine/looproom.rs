use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tracing::{error, warn};
use uuid::Uuid;

use super::audit::audited;
use super::events::{
    ClientEvent, JoinLooproom, LooproomSummary, MessagePayload, ModerateUser, ReactToMessage,
    SendAnnouncement, SendMessage, ServerEvent, SessionSummary, Typing, UpdateSettings,
    UpdateStream,
};
use super::hub::{Connection, ConnectionHub, ConnectionId};
use super::moderation;
use super::permissions::{
    require_active_participant, require_can_chat, require_creator, require_moderator_or_creator,
    require_not_banned,
};
use super::rate_limiter::{ActionLimiters, RateLimiter};
use super::room_manager::{ParticipantInfo, RoomManager};
use super::session_lifecycle::SessionController;
use super::validation;
use crate::db::models::{CreateModerationLogParams, InsertMessageParams, LooproomRow, MessageType};
use crate::db::queries::reactions::ReactionMap;
use crate::db::queries::{
    looprooms, messages, moderation_log, participants, reactions, sessions, users,
};
use crate::db::{format_timestamp, parse_timestamp};
use crate::error::{RoomError, RoomResult};

/// Handles every client event of the real-time channel. REST endpoints call
/// the same methods so both surfaces broadcast identical events.
pub struct LooproomService {
    pool: SqlitePool,
    rooms: Arc<RoomManager>,
    hub: Arc<ConnectionHub>,
    limiters: Arc<ActionLimiters>,
    sessions: SessionController,
    max_message_length: usize,
}

fn limit(limiter: &RateLimiter, key: &str) -> RoomResult<()> {
    limiter
        .check(key)
        .map_err(|retry_after| RoomError::RateLimited { retry_after })
}

fn reply<T: Serialize>(value: T) -> RoomResult<Option<Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| RoomError::Internal(format!("failed to encode reply: {e}")))
}

impl LooproomService {
    pub fn new(
        pool: SqlitePool,
        rooms: Arc<RoomManager>,
        hub: Arc<ConnectionHub>,
        limiters: Arc<ActionLimiters>,
        max_message_length: usize,
    ) -> Self {
        let sessions =
            SessionController::new(pool.clone(), rooms.clone(), hub.clone(), limiters.clone());
        Self {
            pool,
            rooms,
            hub,
            limiters,
            sessions,
            max_message_length,
        }
    }

    pub fn sessions(&self) -> &SessionController {
        &self.sessions
    }

    async fn load_room(&self, looproom_id: &str) -> RoomResult<LooproomRow> {
        looprooms::get_looproom(&self.pool, looproom_id)
            .await?
            .ok_or_else(|| RoomError::not_found("looproom"))
    }

    /// Run one client event and produce the data for its acknowledgement.
    pub async fn dispatch(
        &self,
        conn: &Connection,
        event: ClientEvent,
    ) -> RoomResult<Option<Value>> {
        let action = event.name();
        let looproom_id = event.looproom_id().map(str::to_string);
        audited(
            action,
            &conn.user_id,
            looproom_id.as_deref(),
            self.handle(conn, event),
        )
        .await
    }

    async fn handle(&self, conn: &Connection, event: ClientEvent) -> RoomResult<Option<Value>> {
        let actor = conn.user_id.as_str();
        match event {
            ClientEvent::JoinLooproom(req) => self.join(conn, req).await.map(Some),
            ClientEvent::LeaveLooproom(req) => {
                self.leave(conn, &req.looproom_id).await?;
                Ok(None)
            }
            ClientEvent::SendMessage(req) => reply(self.send_message(conn, req).await?),
            ClientEvent::Typing(req) => {
                self.typing(conn, req)?;
                Ok(None)
            }
            ClientEvent::ReactToMessage(req) => {
                let message_id = req.message_id.clone();
                let reactions = self.react(actor, req).await?;
                Ok(Some(json!({ "messageId": message_id, "reactions": reactions })))
            }
            ClientEvent::StartSession(req) => reply(
                self.sessions
                    .start(actor, &req.looproom_id, req.stream_url.as_deref(), Some(conn.id))
                    .await?,
            ),
            ClientEvent::EndSession(req) => reply(self.sessions.end(actor, &req.looproom_id).await?),
            ClientEvent::PauseSession(req) => {
                reply(self.sessions.pause(actor, &req.looproom_id).await?)
            }
            ClientEvent::ResumeSession(req) => {
                reply(self.sessions.resume(actor, &req.looproom_id).await?)
            }
            ClientEvent::UpdateStream(req) => {
                let stream_url = self.update_stream(actor, req).await?;
                Ok(Some(json!({ "streamUrl": stream_url })))
            }
            ClientEvent::ModerateUser(req) => self.moderate(actor, req).await.map(Some),
            ClientEvent::DeleteMessage(req) => {
                self.delete_message(actor, &req.looproom_id, &req.message_id)
                    .await?;
                Ok(None)
            }
            ClientEvent::PinMessage(req) => {
                self.pin_message(actor, &req.looproom_id, &req.message_id)
                    .await?;
                Ok(None)
            }
            ClientEvent::UnpinMessage(req) => {
                self.unpin_message(actor, &req.looproom_id, &req.message_id)
                    .await?;
                Ok(None)
            }
            ClientEvent::SendAnnouncement(req) => reply(self.send_announcement(conn, req).await?),
            ClientEvent::UpdateSettings(req) => reply(self.update_settings(actor, req).await?),
        }
    }

    // ── Presence ────────────────────────────────────────────────────

    pub async fn join(&self, conn: &Connection, req: JoinLooproom) -> RoomResult<Value> {
        let room = self.load_room(&req.looproom_id).await?;
        let mood = validation::normalize_mood(req.mood.as_deref()).map_err(RoomError::InvalidInput)?;
        let now = Utc::now();

        let existing = participants::get_participant(&self.pool, &room.id, &conn.user_id).await?;
        require_not_banned(existing.as_ref(), now)?;

        participants::upsert_active(
            &self.pool,
            &room.id,
            &conn.user_id,
            mood.as_deref(),
            &format_timestamp(now),
        )
        .await?;

        // The creator is never turned away from their own room.
        let capacity = if room.is_creator(&conn.user_id) {
            None
        } else {
            room.capacity()
        };
        let info = ParticipantInfo {
            user_id: conn.user_id.clone(),
            name: conn.name.clone(),
            mood: mood.clone(),
            joined_at: now,
        };
        let Some(counts) = self.rooms.try_join_room(&room.id, conn.id, info, capacity) else {
            if self.rooms.connections_for_user(&room.id, &conn.user_id).is_empty() {
                participants::mark_inactive(&self.pool, &room.id, &conn.user_id, &format_timestamp(now))
                    .await?;
            }
            return Err(RoomError::Conflict("room full".into()));
        };
        self.hub.join_channel(&room.id, conn.id);

        self.hub.broadcast(
            &room.id,
            &ServerEvent::UserJoined {
                looproom_id: room.id.clone(),
                user_id: conn.user_id.clone(),
                name: conn.name.clone(),
                mood,
                participant_count: counts.current_count,
                timestamp: now,
            },
            Some(conn.id),
        );

        let session = match &room.current_session_id {
            Some(id) => sessions::get_session(&self.pool, id).await?,
            None => None,
        };
        Ok(json!({
            "looproom": LooproomSummary::from(&room),
            "session": session.as_ref().map(SessionSummary::from),
            "participantCount": counts.current_count,
            "participants": self.rooms.get_participants(&room.id),
        }))
    }

    /// Leaving a room the connection never joined is a no-op.
    pub async fn leave(&self, conn: &Connection, looproom_id: &str) -> RoomResult<()> {
        self.depart(conn.id, &conn.user_id, looproom_id).await?;
        Ok(())
    }

    /// Remove one connection from a room's presence and channel. The
    /// membership record goes inactive once the user has no connection left
    /// in the room. Returns false if the connection was not in the room.
    async fn depart(
        &self,
        connection_id: ConnectionId,
        user_id: &str,
        looproom_id: &str,
    ) -> RoomResult<bool> {
        self.hub.leave_channel(looproom_id, connection_id);
        let Some(info) = self.rooms.leave_room(looproom_id, connection_id) else {
            return Ok(false);
        };

        let now = Utc::now();
        if self.rooms.connections_for_user(looproom_id, user_id).is_empty() {
            participants::mark_inactive(&self.pool, looproom_id, user_id, &format_timestamp(now))
                .await?;
        }

        self.hub.broadcast(
            looproom_id,
            &ServerEvent::UserLeft {
                looproom_id: looproom_id.to_string(),
                user_id: info.user_id,
                name: info.name,
                participant_count: self.rooms.participant_count(looproom_id),
                timestamp: now,
            },
            None,
        );
        Ok(true)
    }

    /// Connection lost: leave every joined room, then forget the connection.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(conn) = self.hub.get(connection_id) else {
            return;
        };
        for looproom_id in self.rooms.rooms_for_connection(connection_id) {
            if let Err(e) = self.depart(connection_id, &conn.user_id, &looproom_id).await {
                warn!(%connection_id, %looproom_id, error = %e, "cleanup on disconnect failed");
            }
        }
        self.hub.unregister(connection_id);
    }

    // ── Chat ────────────────────────────────────────────────────────

    pub async fn send_message(
        &self,
        conn: &Connection,
        req: SendMessage,
    ) -> RoomResult<MessagePayload> {
        let room = self.load_room(&req.looproom_id).await?;
        if !self.rooms.is_connection_in_room(&room.id, conn.id) {
            return Err(RoomError::Forbidden("not in room".into()));
        }
        let is_creator = room.is_creator(&conn.user_id);
        if !room.chat_enabled && !is_creator {
            return Err(RoomError::Conflict("chat disabled".into()));
        }

        let now = Utc::now();
        let participant = participants::get_participant(&self.pool, &room.id, &conn.user_id).await?;
        require_can_chat(&room, participant.as_ref(), &conn.user_id, now)?;

        let content = validation::sanitize_content(&req.content, self.max_message_length)
            .map_err(RoomError::InvalidInput)?;

        if !is_creator && room.slow_mode_seconds > 0 {
            let last = messages::last_message_at(&self.pool, &room.id, &conn.user_id).await?;
            if let Some(last) = last.as_deref().and_then(parse_timestamp) {
                let next_allowed = last + chrono::Duration::seconds(room.slow_mode_seconds);
                if next_allowed > now {
                    let retry_after = (next_allowed - now).to_std().unwrap_or_default();
                    return Err(RoomError::RateLimited { retry_after });
                }
            }
        }

        // Charged last so rejected sends leave the budget untouched.
        if !is_creator {
            limit(&self.limiters.message, &conn.user_id)?;
        }

        let id = Uuid::new_v4().to_string();
        let created_at = format_timestamp(now);
        messages::insert_message(
            &self.pool,
            &InsertMessageParams {
                id: &id,
                looproom_id: &room.id,
                session_id: room.current_session_id.as_deref(),
                user_id: &conn.user_id,
                content: &content,
                message_type: MessageType::Message,
                created_at: &created_at,
            },
        )
        .await?;

        self.rooms.increment_message_count(&room.id);
        if let Some(session_id) = &room.current_session_id {
            sessions::increment_total_messages(&self.pool, session_id).await?;
        }

        let payload = MessagePayload {
            id,
            looproom_id: room.id.clone(),
            content,
            user_id: conn.user_id.clone(),
            user_name: conn.name.clone(),
            user_type: conn.role.clone(),
            message_type: MessageType::Message.as_str().to_string(),
            timestamp: created_at,
            is_pinned: false,
            is_deleted: false,
            deleted_by: None,
            reactions: ReactionMap::new(),
        };
        self.hub
            .broadcast(&room.id, &ServerEvent::NewMessage(payload.clone()), None);
        Ok(payload)
    }

    /// Typing indicators are relayed to the other members only.
    pub fn typing(&self, conn: &Connection, req: Typing) -> RoomResult<()> {
        if !self.rooms.is_connection_in_room(&req.looproom_id, conn.id) {
            return Err(RoomError::Forbidden("not in room".into()));
        }
        self.hub.broadcast(
            &req.looproom_id,
            &ServerEvent::UserTyping {
                looproom_id: req.looproom_id.clone(),
                user_id: conn.user_id.clone(),
                name: conn.name.clone(),
                is_typing: req.is_typing,
            },
            Some(conn.id),
        );
        Ok(())
    }

    /// Toggle the actor's reaction and return the message's full map.
    pub async fn react(&self, actor: &str, req: ReactToMessage) -> RoomResult<ReactionMap> {
        validation::validate_emoji(&req.emoji).map_err(RoomError::InvalidInput)?;

        let message = messages::get_message(&self.pool, &req.message_id)
            .await?
            .filter(|m| !m.is_deleted)
            .filter(|m| req.looproom_id.as_ref().is_none_or(|r| *r == m.looproom_id))
            .ok_or_else(|| RoomError::not_found("message"))?;

        let room = self.load_room(&message.looproom_id).await?;
        let participant = participants::get_participant(&self.pool, &room.id, actor).await?;
        require_active_participant(&room, participant.as_ref(), actor, Utc::now())?;

        reactions::toggle_reaction(
            &self.pool,
            &message.id,
            actor,
            &req.emoji,
            &format_timestamp(Utc::now()),
        )
        .await?;
        let map = reactions::reaction_map(&self.pool, &message.id).await?;

        self.hub.broadcast(
            &room.id,
            &ServerEvent::MessageReactionUpdated {
                looproom_id: room.id.clone(),
                message_id: message.id,
                reactions: map.clone(),
            },
            None,
        );
        Ok(map)
    }

    // ── Moderation ──────────────────────────────────────────────────

    /// Shared gate for moderator actions: fresh room and actor records,
    /// the moderator-or-creator guard, then the moderation limiter.
    async fn authorize_moderator(&self, actor: &str, looproom_id: &str) -> RoomResult<LooproomRow> {
        let room = self.load_room(looproom_id).await?;
        let record = participants::get_participant(&self.pool, &room.id, actor).await?;
        require_moderator_or_creator(&room, record.as_ref(), actor)?;
        limit(&self.limiters.moderation, actor)?;
        Ok(room)
    }

    /// Append a moderation log entry. A failed write is logged, not
    /// surfaced: the action itself has already taken effect.
    async fn record(
        &self,
        looproom_id: &str,
        moderator_id: &str,
        target_user_id: Option<&str>,
        action: &str,
        reason: Option<&str>,
        metadata: Value,
    ) {
        let id = Uuid::new_v4().to_string();
        let params = CreateModerationLogParams {
            id: &id,
            looproom_id,
            moderator_id,
            target_user_id,
            action,
            reason,
            metadata: &metadata,
        };
        if let Err(e) = moderation_log::create_entry(&self.pool, &params).await {
            error!(%looproom_id, %moderator_id, action, error = %e, "failed to write moderation log");
        }
    }

    pub async fn moderate(&self, actor: &str, req: ModerateUser) -> RoomResult<Value> {
        let room = self.authorize_moderator(actor, &req.looproom_id).await?;
        req.action.validate()?;
        if req.action.creator_only() {
            require_creator(&room, actor)?;
        }
        if room.is_creator(&req.target_user_id) {
            return Err(RoomError::Forbidden("cannot moderate the room creator".into()));
        }
        if req.target_user_id == actor {
            return Err(RoomError::InvalidInput("cannot moderate yourself".into()));
        }
        let reason = validation::normalize_reason(req.reason.as_deref())
            .map_err(RoomError::InvalidInput)?;
        users::get_user(&self.pool, &req.target_user_id)
            .await?
            .ok_or_else(|| RoomError::not_found("user"))?;

        let now = Utc::now();
        let applied = moderation::apply(&self.pool, &room.id, &req.target_user_id, req.action, now).await?;

        // The action is committed from here on; eviction failures are logged.
        if req.action.evicts() {
            let target = req.target_user_id.as_str();
            for connection_id in self.rooms.connections_for_user(&room.id, target) {
                if let Err(e) = self.depart(connection_id, target, &room.id).await {
                    warn!(%connection_id, looproom_id = %room.id, error = %e, "eviction cleanup failed");
                }
            }
            // Covers a target present in the channel without a presence entry.
            for connection_id in self.hub.connections_of_user_in_room(&room.id, target) {
                self.hub.leave_channel(&room.id, connection_id);
            }
            if let Err(e) =
                participants::mark_inactive(&self.pool, &room.id, target, &format_timestamp(now)).await
            {
                warn!(looproom_id = %room.id, user_id = target, error = %e, "failed to deactivate evicted user");
            }
        }

        self.record(
            &room.id,
            actor,
            Some(req.target_user_id.as_str()),
            req.action.as_str(),
            reason.as_deref(),
            json!({
                "duration": req.action.duration_minutes(),
                "expiresAt": applied.expires_at,
                "warningCount": applied.warning_count,
            }),
        )
        .await;

        self.hub.broadcast(
            &room.id,
            &ServerEvent::UserModerated {
                looproom_id: room.id.clone(),
                user_id: req.target_user_id.clone(),
                action: req.action.as_str(),
                moderator_id: actor.to_string(),
                reason: reason.clone(),
                expires_at: applied.expires_at,
            },
            None,
        );
        self.hub.send_to_user(
            &req.target_user_id,
            &ServerEvent::ModerationAction {
                looproom_id: room.id.clone(),
                action: req.action.as_str(),
                reason,
                expires_at: applied.expires_at,
            },
        );

        Ok(json!({
            "targetUserId": req.target_user_id,
            "action": req.action.as_str(),
            "expiresAt": applied.expires_at,
            "warningCount": applied.warning_count,
        }))
    }

    pub async fn delete_message(
        &self,
        actor: &str,
        looproom_id: &str,
        message_id: &str,
    ) -> RoomResult<()> {
        let room = self.authorize_moderator(actor, looproom_id).await?;
        let message = messages::get_message(&self.pool, message_id)
            .await?
            .filter(|m| m.looproom_id == room.id)
            .ok_or_else(|| RoomError::not_found("message"))?;

        let now = format_timestamp(Utc::now());
        if !messages::soft_delete(&self.pool, &message.id, actor, &now).await? {
            return Err(RoomError::Conflict("message already deleted".into()));
        }

        self.record(
            &room.id,
            actor,
            Some(message.user_id.as_str()),
            "delete_message",
            None,
            json!({ "messageId": message.id, "wasPinned": message.is_pinned }),
        )
        .await;

        self.hub.broadcast(
            &room.id,
            &ServerEvent::MessageDeleted {
                looproom_id: room.id.clone(),
                message_id: message.id,
                deleted_by: actor.to_string(),
            },
            None,
        );
        Ok(())
    }

    /// Pin a message. Any previously pinned message in the room is unpinned
    /// in the same transaction.
    pub async fn pin_message(
        &self,
        actor: &str,
        looproom_id: &str,
        message_id: &str,
    ) -> RoomResult<()> {
        let room = self.authorize_moderator(actor, looproom_id).await?;
        if !room.chat_enabled {
            return Err(RoomError::Conflict("chat disabled".into()));
        }
        if !messages::pin_message(&self.pool, &room.id, message_id).await? {
            return Err(RoomError::not_found("message"));
        }

        self.record(
            &room.id,
            actor,
            None,
            "pin_message",
            None,
            json!({ "messageId": message_id }),
        )
        .await;

        self.hub.broadcast(
            &room.id,
            &ServerEvent::MessagePinned {
                looproom_id: room.id.clone(),
                message_id: message_id.to_string(),
                pinned_by: actor.to_string(),
            },
            None,
        );
        Ok(())
    }

    pub async fn unpin_message(
        &self,
        actor: &str,
        looproom_id: &str,
        message_id: &str,
    ) -> RoomResult<()> {
        let room = self.authorize_moderator(actor, looproom_id).await?;
        if !messages::unpin_message(&self.pool, &room.id, message_id).await? {
            return Err(RoomError::Conflict("message is not pinned".into()));
        }

        self.record(
            &room.id,
            actor,
            None,
            "unpin_message",
            None,
            json!({ "messageId": message_id }),
        )
        .await;

        self.hub.broadcast(
            &room.id,
            &ServerEvent::MessageUnpinned {
                looproom_id: room.id.clone(),
                message_id: message_id.to_string(),
            },
            None,
        );
        Ok(())
    }

    // ── Creator channel ─────────────────────────────────────────────

    /// Set or clear the room's stream URL.
    pub async fn update_stream(&self, actor: &str, req: UpdateStream) -> RoomResult<Option<String>> {
        let room = self.load_room(&req.looproom_id).await?;
        require_creator(&room, actor)?;
        limit(&self.limiters.session, actor)?;

        let stream_url = req
            .stream_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());
        if let Some(url) = stream_url {
            validation::validate_stream_url(url).map_err(RoomError::InvalidInput)?;
        }

        if !looprooms::set_stream_url(&self.pool, &room.id, stream_url).await? {
            return Err(RoomError::not_found("looproom"));
        }

        let stream_url = stream_url.map(str::to_string);
        self.hub.broadcast(
            &room.id,
            &ServerEvent::StreamUpdated {
                looproom_id: room.id.clone(),
                stream_url: stream_url.clone(),
            },
            None,
        );
        Ok(stream_url)
    }

    /// Post an announcement. Not subject to slow mode or the message limiter.
    pub async fn send_announcement(
        &self,
        conn: &Connection,
        req: SendAnnouncement,
    ) -> RoomResult<MessagePayload> {
        let room = self.load_room(&req.looproom_id).await?;
        require_creator(&room, &conn.user_id)?;
        let content = validation::sanitize_content(&req.content, self.max_message_length)
            .map_err(RoomError::InvalidInput)?;

        let id = Uuid::new_v4().to_string();
        let created_at = format_timestamp(Utc::now());
        messages::insert_message(
            &self.pool,
            &InsertMessageParams {
                id: &id,
                looproom_id: &room.id,
                session_id: room.current_session_id.as_deref(),
                user_id: &conn.user_id,
                content: &content,
                message_type: MessageType::Announcement,
                created_at: &created_at,
            },
        )
        .await?;

        self.hub.broadcast(
            &room.id,
            &ServerEvent::Announcement {
                looproom_id: room.id.clone(),
                id: id.clone(),
                content: content.clone(),
                creator_name: conn.name.clone(),
                timestamp: created_at.clone(),
            },
            None,
        );

        Ok(MessagePayload {
            id,
            looproom_id: room.id,
            content,
            user_id: conn.user_id.clone(),
            user_name: conn.name.clone(),
            user_type: conn.role.clone(),
            message_type: MessageType::Announcement.as_str().to_string(),
            timestamp: created_at,
            is_pinned: false,
            is_deleted: false,
            deleted_by: None,
            reactions: ReactionMap::new(),
        })
    }

    pub async fn update_settings(
        &self,
        actor: &str,
        req: UpdateSettings,
    ) -> RoomResult<LooproomSummary> {
        let room = self.load_room(&req.looproom_id).await?;
        require_creator(&room, actor)?;

        if req.chat_enabled.is_none()
            && req.slow_mode_seconds.is_none()
            && req.max_participants.is_none()
        {
            return Err(RoomError::InvalidInput("no settings to update".into()));
        }
        if let Some(seconds) = req.slow_mode_seconds {
            validation::validate_slow_mode(seconds).map_err(RoomError::InvalidInput)?;
        }
        if let Some(max) = req.max_participants {
            validation::validate_max_participants(max).map_err(RoomError::InvalidInput)?;
        }

        let updated = looprooms::update_settings(
            &self.pool,
            &room.id,
            req.chat_enabled,
            req.slow_mode_seconds,
            req.max_participants,
        )
        .await?
        .ok_or_else(|| RoomError::not_found("looproom"))?;

        self.hub.broadcast(
            &updated.id,
            &ServerEvent::SettingsUpdated {
                looproom_id: updated.id.clone(),
                chat_enabled: updated.chat_enabled,
                slow_mode_seconds: updated.slow_mode_seconds,
                max_participants: updated.max_participants,
            },
            None,
        );
        Ok(LooproomSummary::from(&updated))
    }
}
