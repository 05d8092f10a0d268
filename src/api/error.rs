use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::session::SessionError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 404 - A specific session id was not found.
    SessionNotFound(String),
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 400 - Dimensions outside the accepted range.
    InvalidDimensions(String),
    /// 500 - Failed to create a session (PTY spawn error, etc.).
    SessionCreateFailed(String),
    /// 503 - Session cap reached.
    MaxSessions,
    /// 503 - Screen emulator actor is unavailable.
    ScreenUnavailable,
    /// 500 - Failed to write input to the PTY.
    InputSendFailed,
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidDimensions(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionCreateFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MaxSessions => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ScreenUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InputSendFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidDimensions(_) => "invalid_dimensions",
            ApiError::SessionCreateFailed(_) => "session_create_failed",
            ApiError::MaxSessions => "max_sessions",
            ApiError::ScreenUnavailable => "screen_unavailable",
            ApiError::InputSendFailed => "input_send_failed",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::SessionNotFound(id) => format!("Session not found: {}.", id),
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::InvalidDimensions(detail) => format!("Invalid dimensions: {}.", detail),
            ApiError::SessionCreateFailed(detail) => {
                format!("Failed to create session: {}.", detail)
            }
            ApiError::MaxSessions => {
                "Maximum number of sessions reached. Terminate one first.".to_string()
            }
            ApiError::ScreenUnavailable => "Screen emulator is unavailable.".to_string(),
            ApiError::InputSendFailed => "Failed to send input to terminal.".to_string(),
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => ApiError::SessionNotFound(id),
            SessionError::InvalidDimensions { cols, rows } => {
                ApiError::InvalidDimensions(format!("{}x{}", cols, rows))
            }
            SessionError::Spawn(e) => ApiError::SessionCreateFailed(e.to_string()),
            SessionError::Write(_) => ApiError::InputSendFailed,
            SessionError::Resize(id) => ApiError::SessionNotFound(id),
            SessionError::MaxSessionsReached => ApiError::MaxSessions,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
