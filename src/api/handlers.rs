use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::collections::HashMap;

use super::error::ApiError;
use super::{get_session, AppState};
use crate::pty::SpawnParams;
use crate::screen::state::Format;

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionRequest {
    pub shell: Option<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// POST /api/sessions
pub async fn session_create(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body.unwrap_or_default();

    let params = SpawnParams {
        shell: SpawnParams::resolve_shell(req.shell, state.config.default_shell.as_deref()),
        cwd: req.cwd,
        env: req.env,
        cols: req.cols.unwrap_or(state.config.default_cols),
        rows: req.rows.unwrap_or(state.config.default_rows),
        scrollback_limit: state.config.scrollback_limit,
    };

    let session = state.sessions.create(params).await?;
    Ok((StatusCode::CREATED, Json(session.descriptor())))
}

/// GET /api/sessions
pub async fn session_list(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "sessions": state.sessions.list() }))
}

/// GET /api/sessions/{id}
pub async fn session_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = get_session(&state.sessions, &id)?;
    Ok(Json(session.descriptor()))
}

/// DELETE /api/sessions/{id}
pub async fn session_terminate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.terminate(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// POST /api/sessions/{id}/size
pub async fn session_resize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = get_session(&state.sessions, &id)?;
    session.resize(req.cols, req.rows).await?;
    Ok(Json(serde_json::json!({ "cols": req.cols, "rows": req.rows })))
}

#[derive(Debug, Deserialize, Default)]
pub struct ScreenQuery {
    #[serde(default)]
    pub format: Format,
}

/// GET /api/sessions/{id}/screen
pub async fn session_screen(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ScreenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let session = get_session(&state.sessions, &id)?;
    let snapshot = session
        .screen
        .snapshot(query.format)
        .await
        .map_err(|_| ApiError::ScreenUnavailable)?;
    Ok(Json(snapshot))
}
