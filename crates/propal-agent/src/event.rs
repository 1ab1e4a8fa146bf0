//! Events emitted by the media server and the speech, language-model and
//! synthesis providers.
//!
//! Events arrive as JSON objects tagged by `type`:
//!
//! ```json
//! {"type": "speech_ended", "timestamp": 1760000010.0}
//! {"type": "llm_first_token", "turn_id": 3, "timestamp": 1760000010.9}
//! ```
//!
//! `timestamp` is in seconds and may be omitted, in which case the receive
//! time is used. LLM and TTS events may name the turn they belong to;
//! otherwise they are attributed to the turn currently awaiting a response.

use propal_metrics::TurnId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A participant joined the room.
    ParticipantConnected {
        participant: String,
        timestamp: Option<f64>,
    },
    /// VAD detected the start of user speech.
    SpeechStarted { timestamp: Option<f64> },
    /// VAD detected the end of user speech.
    SpeechEnded { timestamp: Option<f64> },
    /// STT finalized the transcript of the current utterance.
    FinalTranscript {
        #[serde(default)]
        text: String,
        timestamp: Option<f64>,
    },
    /// The LLM streamed its first token.
    LlmFirstToken {
        turn_id: Option<TurnId>,
        timestamp: Option<f64>,
    },
    /// The LLM finished its response.
    LlmComplete {
        turn_id: Option<TurnId>,
        timestamp: Option<f64>,
    },
    /// TTS produced its first audio byte; playback starts.
    TtsFirstAudio {
        turn_id: Option<TurnId>,
        timestamp: Option<f64>,
    },
    /// The agent's audio finished playing.
    TtsPlaybackFinished {
        turn_id: Option<TurnId>,
        timestamp: Option<f64>,
    },
    /// A provider failed (connectivity, quota, bad response).
    ProviderError {
        provider: String,
        #[serde(default)]
        message: String,
        timestamp: Option<f64>,
    },
    /// The participant left; the session ends.
    ParticipantDisconnected { timestamp: Option<f64> },
}

impl PipelineEvent {
    /// The reported timestamp, if the sender included one.
    pub fn timestamp(&self) -> Option<f64> {
        match self {
            Self::ParticipantConnected { timestamp, .. }
            | Self::SpeechStarted { timestamp }
            | Self::SpeechEnded { timestamp }
            | Self::FinalTranscript { timestamp, .. }
            | Self::LlmFirstToken { timestamp, .. }
            | Self::LlmComplete { timestamp, .. }
            | Self::TtsFirstAudio { timestamp, .. }
            | Self::TtsPlaybackFinished { timestamp, .. }
            | Self::ProviderError { timestamp, .. }
            | Self::ParticipantDisconnected { timestamp } => *timestamp,
        }
    }

    /// The `type` tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParticipantConnected { .. } => "participant_connected",
            Self::SpeechStarted { .. } => "speech_started",
            Self::SpeechEnded { .. } => "speech_ended",
            Self::FinalTranscript { .. } => "final_transcript",
            Self::LlmFirstToken { .. } => "llm_first_token",
            Self::LlmComplete { .. } => "llm_complete",
            Self::TtsFirstAudio { .. } => "tts_first_audio",
            Self::TtsPlaybackFinished { .. } => "tts_playback_finished",
            Self::ProviderError { .. } => "provider_error",
            Self::ParticipantDisconnected { .. } => "participant_disconnected",
        }
    }
}

/// Current time in seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
