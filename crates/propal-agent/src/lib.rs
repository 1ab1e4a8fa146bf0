//! proPAL voice agent: conversation sessions, pipeline event ingestion and
//! latency metrics export.

pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod livekit;
pub mod providers;
pub mod registry;
pub mod session;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};

pub use config::{load_config, Config, ConfigError};
pub use error::AgentError;
pub use event::PipelineEvent;
pub use livekit::RoomTokens;
pub use providers::{pipeline_plan, validate, PipelinePlan, ValidationReport};
pub use registry::{SessionRegistry, DEFAULT_FINISHED_CAPACITY};
pub use session::{
    ConversationSession, ExportTargets, FinishedSession, InterruptionPolicy, SessionFlow,
    SessionSettings, TurnSnapshot,
};

/// Application state shared across all request handlers.
#[derive(Debug)]
pub struct AppState {
    /// Live and finished conversation sessions.
    pub registry: SessionRegistry,
    /// LiveKit join-token issuer.
    pub tokens: RoomTokens,
    /// Startup validation outcome, served by `/api/status`.
    pub validation: ValidationReport,
    /// Providers and models the orchestrator should wire, if every stage has one.
    pub plan: Option<PipelinePlan>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: SessionRegistry::new(
                SessionSettings::from_config(config),
                ExportTargets::from_config(config),
            ),
            tokens: RoomTokens::new(config.livekit.clone()),
            validation: validate(config),
            plan: pipeline_plan(&config.providers),
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api::status_handler))
        .route("/api/sessions", post(api::create_session_handler))
        .route(
            "/api/sessions/{sessionId}",
            delete(api::finish_session_handler),
        )
        .route(
            "/api/sessions/{sessionId}/events",
            post(api::post_event_handler),
        )
        .route(
            "/api/sessions/{sessionId}/summary",
            get(api::get_summary_handler),
        )
        .route(
            "/api/sessions/{sessionId}/turns/{turnId}",
            get(api::get_turn_handler),
        )
        .layer(Extension(state))
}
