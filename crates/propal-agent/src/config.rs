//! Agent configuration loading from file and environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP surface for event ingestion.
    #[serde(default)]
    pub server: ServerConfig,

    /// Media server connection.
    #[serde(default)]
    pub livekit: LiveKitConfig,

    /// Speech, language-model and synthesis provider credentials.
    #[serde(default)]
    pub providers: ProviderCredentials,

    /// Latency target and session limits.
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Audio format negotiated with the media server.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Where session metrics are written.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// LiveKit media server connection and token settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct LiveKitConfig {
    #[serde(default = "default_livekit_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: String,
    /// JWT token TTL in seconds for LiveKit join tokens. Default: 3600 (1 hour).
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
}

/// API keys for the third-party providers. Absent keys disable a provider.
#[derive(Clone, Default, Deserialize)]
pub struct ProviderCredentials {
    pub deepgram_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub cartesia_api_key: Option<String>,
}

/// Latency and session-length settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    /// End-of-speech to first-audio target, in seconds.
    #[serde(default = "default_target_latency_secs")]
    pub target_latency_secs: f64,

    /// A session is closed once it has run this long, in seconds.
    #[serde(default = "default_max_conversation_duration_secs")]
    pub max_conversation_duration_secs: u64,

    /// Minimum overlap between user speech and agent playback, in seconds,
    /// before the agent's turn counts as interrupted. Zero means any overlap.
    #[serde(default)]
    pub interruption_min_overlap_secs: f64,
}

/// Audio format settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

/// Metrics export settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Directory receiving one CSV file per session.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// CSV file collecting one summary row per session.
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "propal_agent=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_livekit_url() -> String {
    "ws://localhost:7880".to_string()
}

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_target_latency_secs() -> f64 {
    propal_metrics::DEFAULT_TARGET_LATENCY_SECS
}

fn default_max_conversation_duration_secs() -> u64 {
    1800
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("metrics")
}

fn default_history_file() -> PathBuf {
    PathBuf::from("voice_agent_metrics.csv")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: default_livekit_url(),
            api_key: String::new(),
            api_secret: String::new(),
            token_ttl_seconds: default_token_ttl_seconds(),
        }
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .finish()
    }
}

impl LiveKitConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            token_ttl_seconds: default_token_ttl_seconds(),
        }
    }

    /// Both halves of the API credential are present.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = |key: &Option<String>| if key.is_some() { "[SET]" } else { "[UNSET]" };
        f.debug_struct("ProviderCredentials")
            .field("deepgram_api_key", &state(&self.deepgram_api_key))
            .field("openai_api_key", &state(&self.openai_api_key))
            .field("groq_api_key", &state(&self.groq_api_key))
            .field("elevenlabs_api_key", &state(&self.elevenlabs_api_key))
            .field("cartesia_api_key", &state(&self.cartesia_api_key))
            .finish()
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            target_latency_secs: default_target_latency_secs(),
            max_conversation_duration_secs: default_max_conversation_duration_secs(),
            interruption_min_overlap_secs: 0.0,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            export_dir: default_export_dir(),
            history_file: default_history_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies overrides from the process environment.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment variable overrides using `lookup` to read variables.
///
/// | Variable | Field |
/// |----------|-------|
/// | `PROPAL_HOST`, `PROPAL_PORT` | `server.host`, `server.port` |
/// | `LIVEKIT_URL`, `LIVEKIT_API_KEY`, `LIVEKIT_API_SECRET` | `livekit.*` |
/// | `DEEPGRAM_API_KEY`, `OPENAI_API_KEY`, `GROQ_API_KEY`, `ELEVENLABS_API_KEY`, `CARTESIA_API_KEY` | `providers.*` |
/// | `TARGET_LATENCY` | `performance.target_latency_secs` |
/// | `MAX_CONVERSATION_DURATION` | `performance.max_conversation_duration_secs` |
/// | `INTERRUPTION_MIN_OVERLAP` | `performance.interruption_min_overlap_secs` |
/// | `SAMPLE_RATE`, `CHANNELS` | `audio.*` |
/// | `METRICS_EXPORT_DIR`, `METRICS_FILE` | `metrics.export_dir`, `metrics.history_file` |
/// | `LOG_LEVEL`, `LOG_JSON` | `logging.*` |
///
/// Empty values are ignored. Values that fail to parse are ignored with a
/// warning.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    parse_into(&var, "PROPAL_HOST", &mut config.server.host);
    parse_into(&var, "PROPAL_PORT", &mut config.server.port);

    if let Some(url) = var("LIVEKIT_URL") {
        config.livekit.url = url;
    }
    if let Some(key) = var("LIVEKIT_API_KEY") {
        config.livekit.api_key = key;
    }
    if let Some(secret) = var("LIVEKIT_API_SECRET") {
        config.livekit.api_secret = secret;
    }

    let providers = &mut config.providers;
    for (key, slot) in [
        ("DEEPGRAM_API_KEY", &mut providers.deepgram_api_key),
        ("OPENAI_API_KEY", &mut providers.openai_api_key),
        ("GROQ_API_KEY", &mut providers.groq_api_key),
        ("ELEVENLABS_API_KEY", &mut providers.elevenlabs_api_key),
        ("CARTESIA_API_KEY", &mut providers.cartesia_api_key),
    ] {
        if let Some(value) = var(key) {
            *slot = Some(value);
        }
    }

    let performance = &mut config.performance;
    parse_into(&var, "TARGET_LATENCY", &mut performance.target_latency_secs);
    parse_into(
        &var,
        "MAX_CONVERSATION_DURATION",
        &mut performance.max_conversation_duration_secs,
    );
    parse_into(
        &var,
        "INTERRUPTION_MIN_OVERLAP",
        &mut performance.interruption_min_overlap_secs,
    );

    parse_into(&var, "SAMPLE_RATE", &mut config.audio.sample_rate);
    parse_into(&var, "CHANNELS", &mut config.audio.channels);

    if let Some(dir) = var("METRICS_EXPORT_DIR") {
        config.metrics.export_dir = PathBuf::from(dir);
    }
    if let Some(file) = var("METRICS_FILE") {
        config.metrics.history_file = PathBuf::from(file);
    }

    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level.to_lowercase();
    }
    if let Some(json) = var("LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

fn parse_into<T, F>(var: &F, key: &str, slot: &mut T)
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(key) {
        match raw.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
        }
    }
}
