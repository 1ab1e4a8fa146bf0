//! proPAL voice agent binary.
//!
//! Validates configuration, serves the session and event API, and on
//! SIGTERM/SIGINT finishes every open session so its metrics are exported
//! before the process exits.

use std::net::SocketAddr;
use std::sync::Arc;

use propal_agent::{app, load_config, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PROPAL_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = match load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let state = Arc::new(AppState::new(&config));

    for warning in &state.validation.warnings {
        tracing::warn!("{warning}");
    }
    if !state.validation.is_valid() {
        for error in &state.validation.errors {
            tracing::error!("{error}");
        }
        tracing::error!("configuration validation failed, refusing to start");
        std::process::exit(1);
    }

    if let Some(plan) = &state.plan {
        tracing::info!(
            stt = ?plan.providers.stt,
            llm = ?plan.providers.llm,
            tts = ?plan.providers.tts,
            target_latency_secs = config.performance.target_latency_secs,
            sample_rate = config.audio.sample_rate,
            channels = config.audio.channels,
            "voice pipeline configured"
        );
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    tracing::info!(%addr, livekit_url = %config.livekit.url, "starting propal agent");

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind, is another process using this port?");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    let finished = state.registry.finish_all().await;
    let failed = finished.iter().filter(|f| f.export.is_err()).count();
    if failed > 0 {
        tracing::warn!(failed, "some session exports failed during shutdown");
    }

    tracing::info!("propal agent shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
