use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LiveKit token error: {0}")]
    LiveKit(#[from] livekit_api::access_token::AccessTokenError),

    #[error("LiveKit credentials are not configured")]
    LiveKitNotConfigured,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already finished: {0}")]
    SessionFinished(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] propal_metrics::MetricsError),
}
