//! HTTP handlers for session lifecycle and pipeline event ingestion.

use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use propal_metrics::{MetricsError, SessionSummary, TurnId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AgentError;
use crate::event::{now_secs, PipelineEvent};
use crate::providers::{PipelinePlan, ValidationReport};
use crate::session::{FinishedSession, TurnSnapshot};
use crate::AppState;

/// Request body for opening a session.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Identity of the remote participant, if already known.
    pub participant: Option<String>,
    /// LiveKit room; defaults to one derived from the session id.
    pub room: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub room: String,
    /// Agent join token for `room`, when LiveKit credentials are configured.
    #[serde(rename = "joinToken", skip_serializing_if = "Option::is_none")]
    pub join_token: Option<String>,
    #[serde(rename = "livekitUrl")]
    pub livekit_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventAccepted {
    /// The event ended the session.
    pub finished: bool,
}

/// Response body for a finished session.
#[derive(Debug, Serialize)]
pub struct FinishSessionResponse {
    pub summary: SessionSummary,
    #[serde(rename = "exportPath")]
    pub export_path: Option<String>,
    #[serde(rename = "exportError")]
    pub export_error: Option<String>,
}

impl From<FinishedSession> for FinishSessionResponse {
    fn from(finished: FinishedSession) -> Self {
        let (export_path, export_error) = match finished.export {
            Ok(path) => (Some(path.display().to_string()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            summary: finished.summary,
            export_path,
            export_error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub validation: ValidationReport,
    pub plan: Option<PipelinePlan>,
    #[serde(rename = "liveSessions")]
    pub live_sessions: usize,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        match &e {
            AgentError::SessionNotFound(_) | AgentError::Metrics(MetricsError::UnknownTurn(_)) => {
                ApiError::NotFound(e.to_string())
            }
            AgentError::SessionFinished(_) => ApiError::Conflict(e.to_string()),
            _ => ApiError::InternalServerError(e.to_string()),
        }
    }
}

/// Handler for `POST /api/sessions`.
pub async fn create_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = state.registry.create(request.participant);
    let room = request
        .room
        .unwrap_or_else(|| format!("propal-{session_id}"));

    let join_token = if state.tokens.is_configured() {
        Some(state.tokens.agent_join_token(&room).map_err(|e| {
            tracing::error!(session_id = %session_id, error = %e, "failed to issue join token");
            ApiError::from(e)
        })?)
    } else {
        None
    };

    tracing::info!(session_id = %session_id, %room, "session created");
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            room,
            join_token,
            livekit_url: state.tokens.url().to_string(),
        }),
    ))
}

/// Handler for `POST /api/sessions/{sessionId}/events`.
pub async fn post_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(event): Json<PipelineEvent>,
) -> Result<(StatusCode, Json<EventAccepted>), ApiError> {
    let finished = state
        .registry
        .dispatch(&session_id, event, now_secs())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            finished: finished.is_some(),
        }),
    ))
}

/// Handler for `GET /api/sessions/{sessionId}/summary`.
pub async fn get_summary_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    Ok(Json(state.registry.summary(&session_id).await?))
}

/// Handler for `GET /api/sessions/{sessionId}/turns/{turnId}`.
pub async fn get_turn_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((session_id, turn_id)): Path<(String, TurnId)>,
) -> Result<Json<TurnSnapshot>, ApiError> {
    Ok(Json(state.registry.turn(&session_id, turn_id).await?))
}

/// Handler for `DELETE /api/sessions/{sessionId}`.
pub async fn finish_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<FinishSessionResponse>, ApiError> {
    let finished = state.registry.finish(&session_id).await?;
    Ok(Json(finished.into()))
}

/// Handler for `GET /api/status`.
pub async fn status_handler(Extension(state): Extension<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        validation: state.validation.clone(),
        plan: state.plan.clone(),
        live_sessions: state.registry.live_count(),
    })
}
