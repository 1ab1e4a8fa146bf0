//! Provider selection and startup validation.
//!
//! The agent never calls providers itself; this module decides which
//! providers the orchestrator should use, based on which credentials are
//! present, and reports configuration problems before any session starts.

use serde::Serialize;

use crate::config::{Config, ProviderCredentials};

/// Target latency above which a warning is emitted at startup.
const LATENCY_WARNING_THRESHOLD_SECS: f64 = 3.0;

/// Instructions given to the language model for every conversation.
pub const SYSTEM_PROMPT: &str = "You are a helpful AI voice assistant for proPAL AI, designed to help small and medium businesses in India.

Key Guidelines:
- Keep responses concise and conversational (2-3 sentences max)
- Be helpful and professional
- Handle business inquiries naturally
- Support customer service scenarios
- Gracefully handle interruptions
- Speak in a friendly, approachable tone
- Focus on practical solutions

You can help with:
- Customer support queries
- Business information
- General assistance
- Product inquiries

Remember to be efficient and keep latency low while maintaining quality.";

/// Speech-to-text providers, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    Deepgram,
    #[serde(rename = "openai")]
    OpenAi,
}

/// Language-model providers, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Groq,
    #[serde(rename = "openai")]
    OpenAi,
}

/// Text-to-speech providers, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    ElevenLabs,
    Cartesia,
    #[serde(rename = "openai")]
    OpenAi,
}

/// Model settings handed to a streaming STT client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SttModel {
    pub model: &'static str,
    pub language: Option<&'static str>,
    pub interim_results: bool,
}

/// Model settings handed to an OpenAI-compatible chat client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmModel {
    pub model: &'static str,
    pub base_url: Option<&'static str>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Model and voice handed to a TTS client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtsModel {
    pub model: &'static str,
    pub voice: &'static str,
}

impl SttProvider {
    pub fn model(self) -> SttModel {
        match self {
            Self::Deepgram => SttModel {
                model: "nova-2",
                language: Some("en"),
                interim_results: true,
            },
            Self::OpenAi => SttModel {
                model: "whisper-1",
                language: None,
                interim_results: false,
            },
        }
    }
}

impl LlmProvider {
    pub fn model(self) -> LlmModel {
        match self {
            Self::Groq => LlmModel {
                model: "llama3-8b-8192",
                base_url: Some("https://api.groq.com/openai/v1"),
                max_tokens: 150,
                temperature: 0.7,
            },
            Self::OpenAi => LlmModel {
                model: "gpt-3.5-turbo",
                base_url: None,
                max_tokens: 150,
                temperature: 0.7,
            },
        }
    }
}

impl TtsProvider {
    pub fn model(self) -> TtsModel {
        match self {
            Self::ElevenLabs => TtsModel {
                model: "eleven_monolingual_v1",
                voice: "21m00Tcm4TlvDq8ikWAM",
            },
            Self::Cartesia => TtsModel {
                model: "sonic-english",
                voice: "a0e99841-438c-4a64-b679-ae501e7d6091",
            },
            Self::OpenAi => TtsModel {
                model: "tts-1",
                voice: "alloy",
            },
        }
    }
}

/// Usable providers per service, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServicePriority {
    pub stt: Vec<SttProvider>,
    pub llm: Vec<LlmProvider>,
    pub tts: Vec<TtsProvider>,
}

/// The provider chosen for each pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProviderSelection {
    pub stt: SttProvider,
    pub llm: LlmProvider,
    pub tts: TtsProvider,
}

impl ServicePriority {
    /// The first provider of every service, if each has one.
    pub fn primary(&self) -> Option<ProviderSelection> {
        Some(ProviderSelection {
            stt: *self.stt.first()?,
            llm: *self.llm.first()?,
            tts: *self.tts.first()?,
        })
    }
}

/// Everything the orchestrator needs to wire one conversation's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelinePlan {
    pub providers: ProviderSelection,
    pub stt: SttModel,
    pub llm: LlmModel,
    pub tts: TtsModel,
    pub system_prompt: &'static str,
}

impl PipelinePlan {
    pub fn new(providers: ProviderSelection) -> Self {
        Self {
            providers,
            stt: providers.stt.model(),
            llm: providers.llm.model(),
            tts: providers.tts.model(),
            system_prompt: SYSTEM_PROMPT,
        }
    }
}

/// Builds the pipeline plan from the best available providers.
pub fn pipeline_plan(credentials: &ProviderCredentials) -> Option<PipelinePlan> {
    service_priority(credentials).primary().map(PipelinePlan::new)
}

/// Orders providers by preference, keeping only those with credentials.
///
/// STT prefers Deepgram, the LLM prefers Groq for speed, TTS prefers
/// ElevenLabs then Cartesia; OpenAI is the fallback everywhere.
pub fn service_priority(credentials: &ProviderCredentials) -> ServicePriority {
    let has = |key: &Option<String>| key.is_some();
    let mut priority = ServicePriority::default();

    if has(&credentials.deepgram_api_key) {
        priority.stt.push(SttProvider::Deepgram);
    }
    if has(&credentials.openai_api_key) {
        priority.stt.push(SttProvider::OpenAi);
    }

    if has(&credentials.groq_api_key) {
        priority.llm.push(LlmProvider::Groq);
    }
    if has(&credentials.openai_api_key) {
        priority.llm.push(LlmProvider::OpenAi);
    }

    if has(&credentials.elevenlabs_api_key) {
        priority.tts.push(TtsProvider::ElevenLabs);
    }
    if has(&credentials.cartesia_api_key) {
        priority.tts.push(TtsProvider::Cartesia);
    }
    if has(&credentials.openai_api_key) {
        priority.tts.push(TtsProvider::OpenAi);
    }

    priority
}

/// Outcome of [`validate`]. Any error makes the configuration unusable.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub available_services: ServicePriority,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks that the agent can run with `config`.
pub fn validate(config: &Config) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !config.livekit.has_credentials() {
        errors.push("LiveKit API key and secret are required".to_string());
    }

    let available_services = service_priority(&config.providers);
    for (service, empty) in [
        ("STT", available_services.stt.is_empty()),
        ("LLM", available_services.llm.is_empty()),
        ("TTS", available_services.tts.is_empty()),
    ] {
        if empty {
            errors.push(format!("No {service} service configured"));
        }
    }

    let target = config.performance.target_latency_secs;
    if !(target.is_finite() && target > 0.0) {
        errors.push(format!("Target latency must be a positive number of seconds, got {target}"));
    } else if target > LATENCY_WARNING_THRESHOLD_SECS {
        warnings.push(format!(
            "Target latency > {LATENCY_WARNING_THRESHOLD_SECS}s may impact user experience"
        ));
    }

    if config.performance.interruption_min_overlap_secs < 0.0 {
        errors.push("Interruption overlap must not be negative".to_string());
    }

    if config.audio.sample_rate == 0 || config.audio.channels == 0 {
        errors.push("Audio sample rate and channel count must be non-zero".to_string());
    }

    ValidationReport {
        errors,
        warnings,
        available_services,
    }
}
