use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::db::models::ModerationLogRow;
use crate::db::queries::{looprooms, messages, moderation_log, participants, reactions};
use crate::engine::audit::audited;
use crate::engine::events::{LooproomSummary, MessagePayload};
use crate::engine::permissions::{effective_capabilities, require_moderator_or_creator};
use crate::engine::validation;
use crate::error::{RoomError, RoomResult};

use super::app_state::AppState;
use super::auth_middleware::AuthUser;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

/// Account roles allowed to create Looprooms.
const ROOM_CREATOR_ROLES: &[&str] = &["creator", "admin"];

#[derive(Debug, Deserialize)]
pub struct PageParams {
    /// ID of the oldest message or log entry already seen.
    pub before: Option<String>,
    pub limit: Option<i64>,
}

fn unknown_cursor() -> RoomError {
    RoomError::InvalidInput("unknown pagination cursor".into())
}

impl PageParams {
    fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLooproomRequest {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub max_participants: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub stream_url: Option<String>,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ── Looprooms ──────────────────────────────────────────────────────

pub async fn create_looproom(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateLooproomRequest>,
) -> RoomResult<impl IntoResponse> {
    if !ROOM_CREATOR_ROLES.contains(&auth.user.role.as_str()) {
        return Err(RoomError::Forbidden("only creators can open looprooms".into()));
    }
    validation::validate_room_name(&req.name).map_err(RoomError::InvalidInput)?;
    let max_participants = req.max_participants.unwrap_or(100);
    validation::validate_max_participants(max_participants).map_err(RoomError::InvalidInput)?;

    let id = Uuid::new_v4().to_string();
    looprooms::create_looproom(
        &state.db,
        &looprooms::CreateLooproomParams {
            id: &id,
            name: req.name.trim(),
            description: req.description.as_deref(),
            category: req.category.as_deref(),
            creator_id: auth.id(),
            max_participants,
        },
    )
    .await?;

    let room = looprooms::get_looproom(&state.db, &id)
        .await?
        .ok_or_else(|| RoomError::Internal(format!("looproom {id} vanished after insert")))?;
    tracing::info!(looproom_id = %id, creator_id = %auth.id(), "looproom created");
    Ok((StatusCode::CREATED, Json(LooproomSummary::from(&room))))
}

/// Room details with live stats and what the caller may currently do.
pub async fn get_looproom(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(looproom_id): Path<String>,
) -> RoomResult<Json<Value>> {
    let room = looprooms::get_looproom(&state.db, &looproom_id)
        .await?
        .ok_or_else(|| RoomError::not_found("looproom"))?;
    let record = participants::get_participant(&state.db, &room.id, auth.id()).await?;
    let capabilities: Vec<&str> =
        effective_capabilities(&room, record.as_ref(), auth.id(), Utc::now())
            .iter_names()
            .map(|(name, _)| name)
            .collect();
    let session = state.service.sessions().current(&room.id).await?;
    let pinned = match messages::get_pinned(&state.db, &room.id).await? {
        Some(row) => {
            let map = reactions::reaction_map(&state.db, &row.id).await?;
            Some(MessagePayload::from_row(row, map))
        }
        None => None,
    };

    Ok(Json(json!({
        "looproom": LooproomSummary::from(&room),
        "session": session,
        "participantCount": state.rooms.participant_count(&room.id),
        "stats": state.rooms.get_stats(&room.id),
        "pinnedMessage": pinned,
        "capabilities": capabilities,
    })))
}

pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(looproom_id): Path<String>,
) -> RoomResult<Json<Value>> {
    looprooms::get_looproom(&state.db, &looproom_id)
        .await?
        .ok_or_else(|| RoomError::not_found("looproom"))?;

    let participants = state.rooms.get_participants(&looproom_id);
    let broadcaster = state
        .rooms
        .get_broadcaster(&looproom_id)
        .map(|b| b.user_id);
    Ok(Json(json!({
        "participantCount": participants.len(),
        "participants": participants,
        "broadcasterId": broadcaster,
    })))
}

// ── Messages ───────────────────────────────────────────────────────

/// Room history, newest page first, messages oldest-to-newest within the
/// page. Only the creator sees soft-deleted messages.
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(looproom_id): Path<String>,
    Query(params): Query<PageParams>,
) -> RoomResult<Json<Value>> {
    let room = looprooms::get_looproom(&state.db, &looproom_id)
        .await?
        .ok_or_else(|| RoomError::not_found("looproom"))?;
    let include_deleted = room.is_creator(auth.id());

    if let Some(message_id) = params.before.as_deref() {
        messages::get_message(&state.db, message_id)
            .await?
            .filter(|m| m.looproom_id == room.id)
            .ok_or_else(unknown_cursor)?;
    }

    let limit = params.limit();
    let mut rows = messages::fetch_history(
        &state.db,
        &room.id,
        params.before.as_deref(),
        limit,
        include_deleted,
    )
    .await?;
    let has_more = rows.len() as i64 == limit;
    rows.reverse();

    let ids: Vec<String> = rows.iter().map(|m| m.id.clone()).collect();
    let mut reaction_maps = reactions::reactions_for_messages(&state.db, &ids).await?;
    let messages: Vec<MessagePayload> = rows
        .into_iter()
        .map(|row| {
            let map = reaction_maps.remove(&row.id).unwrap_or_default();
            MessagePayload::from_row(row, map)
        })
        .collect();

    Ok(Json(json!({ "messages": messages, "hasMore": has_more })))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((looproom_id, message_id)): Path<(String, String)>,
) -> RoomResult<StatusCode> {
    audited(
        "delete-message",
        auth.id(),
        Some(looproom_id.as_str()),
        state.service.delete_message(auth.id(), &looproom_id, &message_id),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pin_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((looproom_id, message_id)): Path<(String, String)>,
) -> RoomResult<StatusCode> {
    audited(
        "pin-message",
        auth.id(),
        Some(looproom_id.as_str()),
        state.service.pin_message(auth.id(), &looproom_id, &message_id),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unpin_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((looproom_id, message_id)): Path<(String, String)>,
) -> RoomResult<StatusCode> {
    audited(
        "unpin-message",
        auth.id(),
        Some(looproom_id.as_str()),
        state.service.unpin_message(auth.id(), &looproom_id, &message_id),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Sessions ───────────────────────────────────────────────────────

pub async fn start_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(looproom_id): Path<String>,
    body: Option<Json<StartSessionRequest>>,
) -> RoomResult<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = audited(
        "start-session",
        auth.id(),
        Some(looproom_id.as_str()),
        state
            .service
            .sessions()
            .start(auth.id(), &looproom_id, req.stream_url.as_deref(), None),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn end_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(looproom_id): Path<String>,
) -> RoomResult<impl IntoResponse> {
    let session = audited(
        "end-session",
        auth.id(),
        Some(looproom_id.as_str()),
        state.service.sessions().end(auth.id(), &looproom_id),
    )
    .await?;
    Ok(Json(session))
}

pub async fn pause_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(looproom_id): Path<String>,
) -> RoomResult<impl IntoResponse> {
    let session = audited(
        "pause-session",
        auth.id(),
        Some(looproom_id.as_str()),
        state.service.sessions().pause(auth.id(), &looproom_id),
    )
    .await?;
    Ok(Json(session))
}

pub async fn resume_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(looproom_id): Path<String>,
) -> RoomResult<impl IntoResponse> {
    let session = audited(
        "resume-session",
        auth.id(),
        Some(looproom_id.as_str()),
        state.service.sessions().resume(auth.id(), &looproom_id),
    )
    .await?;
    Ok(Json(session))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(looproom_id): Path<String>,
) -> RoomResult<impl IntoResponse> {
    let session = state.service.sessions().current(&looproom_id).await?;
    Ok(Json(json!({ "session": session })))
}

// ── Moderation log ─────────────────────────────────────────────────

fn log_entry_json(row: ModerationLogRow) -> Value {
    let metadata = serde_json::from_str::<Value>(&row.metadata).unwrap_or(Value::Null);
    json!({
        "id": row.id,
        "moderatorId": row.moderator_id,
        "targetUserId": row.target_user_id,
        "action": row.action,
        "reason": row.reason,
        "metadata": metadata,
        "createdAt": row.created_at,
    })
}

pub async fn get_moderation_log(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(looproom_id): Path<String>,
    Query(params): Query<PageParams>,
) -> RoomResult<Json<Value>> {
    let room = looprooms::get_looproom(&state.db, &looproom_id)
        .await?
        .ok_or_else(|| RoomError::not_found("looproom"))?;
    let record = participants::get_participant(&state.db, &room.id, auth.id()).await?;
    require_moderator_or_creator(&room, record.as_ref(), auth.id())?;
    if let Some(entry_id) = params.before.as_deref()
        && !moderation_log::entry_in_room(&state.db, &room.id, entry_id).await?
    {
        return Err(unknown_cursor());
    }

    let entries = moderation_log::list_entries(
        &state.db,
        &room.id,
        params.limit(),
        params.before.as_deref(),
    )
    .await?;

    Ok(Json(json!({
        "entries": entries.into_iter().map(log_entry_json).collect::<Vec<_>>(),
    })))
}
