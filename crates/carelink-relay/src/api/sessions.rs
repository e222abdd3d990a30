use crate::error::{AppError, Result};
use crate::services::session::CreateSession;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
};
use carelink_protocol::{Participant, SessionRecord, SessionSummary};
use uuid::Uuid;

/// Bearer token from the Authorization header
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)
}

/// Create an instant session. The response carries the join token.
pub async fn create_session(
    State(state): State<AppState>,
    Json(input): Json<CreateSession>,
) -> Result<(StatusCode, Json<SessionRecord>)> {
    let record = state
        .sessions
        .create(
            input,
            state.config.session_ttl_minutes,
            state.config.max_participants,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>> {
    let record = state.sessions.get(id).await?;
    Ok(Json(record.summary()))
}

/// Participant history; requires the session token
pub async fn list_participants(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Vec<Participant>>> {
    let token = bearer_token(&headers)?;
    state.sessions.verify_token(id, token).await?;
    Ok(Json(state.sessions.participants(id).await?))
}
