//! Pipeline stage boundaries recorded for every conversational turn.

use serde::{Deserialize, Serialize};

/// A timestamped boundary in the VAD → STT → LLM → TTS pipeline.
///
/// Variants are declared in pipeline order; [`Stage::ordinal`] and the
/// derived `Ord` follow that order, which is the order the timestamps of a
/// turn must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// VAD detected the start of user speech.
    UtteranceStart,
    /// VAD detected the end of user speech.
    UtteranceEnd,
    /// STT produced the final transcript.
    SttComplete,
    /// The LLM streamed its first token.
    LlmFirstToken,
    /// The LLM finished its response.
    LlmComplete,
    /// TTS produced its first audio byte.
    TtsFirstAudio,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::UtteranceStart,
        Stage::UtteranceEnd,
        Stage::SttComplete,
        Stage::LlmFirstToken,
        Stage::LlmComplete,
        Stage::TtsFirstAudio,
    ];

    /// Position of this stage in the pipeline, starting at zero.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Returns the canonical string label, also used as the export column name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UtteranceStart => "utterance_start",
            Self::UtteranceEnd => "utterance_end",
            Self::SttComplete => "stt_complete_at",
            Self::LlmFirstToken => "llm_first_token_at",
            Self::LlmComplete => "llm_complete_at",
            Self::TtsFirstAudio => "tts_first_audio_at",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

/// Error returned when parsing an unknown stage label.
#[derive(Debug, Clone)]
pub struct ParseStageError(pub String);

impl std::fmt::Display for ParseStageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown pipeline stage: {}", self.0)
    }
}

impl std::error::Error for ParseStageError {}
