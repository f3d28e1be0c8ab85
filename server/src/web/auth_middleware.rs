use std::sync::Arc;

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::extract::CookieJar;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use serde_json::json;
use tracing::{debug, error};

use crate::auth::token::{TokenError, validate_session_token};
use crate::db::models::UserRow;
use crate::db::queries::users;

use super::app_state::AppState;

/// Cookie carrying the session JWT for browser clients.
pub const SESSION_COOKIE: &str = "vybe_session";

pub(crate) fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

/// Session token from the `Authorization: Bearer` header, else the session
/// cookie.
pub(crate) async fn token_from_parts(parts: &mut Parts, state: &Arc<AppState>) -> Option<String> {
    if let Ok(TypedHeader(Authorization(bearer))) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await
    {
        return Some(bearer.token().to_string());
    }

    let Ok(jar) = CookieJar::from_request_parts(parts, state).await;
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

/// Verify a session token and load the user it names.
pub(crate) async fn authenticate(state: &AppState, token: &str) -> Result<UserRow, Response> {
    let claims = validate_session_token(token, &state.auth_config.jwt_secret).map_err(|e| {
        debug!(error = %e, "rejected session token");
        match e {
            TokenError::Expired => unauthorized("session expired"),
            TokenError::Invalid(_) => unauthorized("invalid session"),
        }
    })?;

    match users::get_user(&state.db, &claims.sub).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(unauthorized("unknown user")),
        Err(e) => {
            error!(error = %e, "failed to load session user");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response())
        }
    }
}

/// Extractor for handlers that require an authenticated user.
pub struct AuthUser {
    pub user: UserRow,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts, state)
            .await
            .ok_or_else(|| unauthorized("not authenticated"))?;
        let user = authenticate(state, &token).await?;
        Ok(AuthUser { user })
    }
}
