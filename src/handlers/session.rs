use axum::extract::Extension;
use axum::Json;
use chrono::DateTime;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedUser;
use crate::models::SessionResponse;

/// Current session details. Only reachable through the session guard.
pub async fn current_session(
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<SessionResponse>> {
    let expires_at = DateTime::from_timestamp(user.expires_at, 0)
        .ok_or_else(|| AppError::Internal(format!("session expiry {} out of range", user.expires_at)))?;

    Ok(Json(SessionResponse {
        user_id: user.user_id,
        session_id: user.session_id,
        expires_at,
    }))
}
