//! Per-turn timestamp record and the latency metrics derived from it.

use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::stage::Stage;

/// Sequence number of a turn within one session. The first turn is `1`.
pub type TurnId = u64;

/// Raw timestamps (seconds) for one user-utterance/agent-response cycle.
///
/// Every present timestamp is non-decreasing in [`Stage`] order. Stages that
/// never happened (for example because the user interrupted the agent) stay
/// `None`; they are never filled with zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: TurnId,
    pub utterance_start: Option<f64>,
    pub utterance_end: Option<f64>,
    pub stt_complete_at: Option<f64>,
    pub llm_first_token_at: Option<f64>,
    pub llm_complete_at: Option<f64>,
    pub tts_first_audio_at: Option<f64>,
    pub interrupted: bool,
    /// Latest stage present when the turn was interrupted. Stages after it
    /// are rejected as stale.
    #[serde(skip)]
    interrupted_after: Option<Stage>,
}

/// What a successful [`TurnRecord::record_stage`] call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    /// The timestamp was stored as reported.
    Recorded,
    /// The timestamp violated stage order and was clamped to `stored`.
    Clamped { reported: f64, stored: f64 },
    /// The same timestamp was already stored; nothing changed.
    Unchanged,
}

/// Latencies derived from a [`TurnRecord`], in seconds.
///
/// A field is `None` whenever one of its two inputs is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// End of speech to final transcript.
    pub eou_delay: Option<f64>,
    /// Final transcript to first LLM token.
    pub ttft: Option<f64>,
    /// Final transcript to LLM completion.
    pub ttfd: Option<f64>,
    /// End of speech to first synthesized audio.
    pub total_latency: Option<f64>,
}

impl TurnRecord {
    pub fn new(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            utterance_start: None,
            utterance_end: None,
            stt_complete_at: None,
            llm_first_token_at: None,
            llm_complete_at: None,
            tts_first_audio_at: None,
            interrupted: false,
            interrupted_after: None,
        }
    }

    /// Returns the timestamp recorded for `stage`, if any.
    pub fn get(&self, stage: Stage) -> Option<f64> {
        match stage {
            Stage::UtteranceStart => self.utterance_start,
            Stage::UtteranceEnd => self.utterance_end,
            Stage::SttComplete => self.stt_complete_at,
            Stage::LlmFirstToken => self.llm_first_token_at,
            Stage::LlmComplete => self.llm_complete_at,
            Stage::TtsFirstAudio => self.tts_first_audio_at,
        }
    }

    fn slot_mut(&mut self, stage: Stage) -> &mut Option<f64> {
        match stage {
            Stage::UtteranceStart => &mut self.utterance_start,
            Stage::UtteranceEnd => &mut self.utterance_end,
            Stage::SttComplete => &mut self.stt_complete_at,
            Stage::LlmFirstToken => &mut self.llm_first_token_at,
            Stage::LlmComplete => &mut self.llm_complete_at,
            Stage::TtsFirstAudio => &mut self.tts_first_audio_at,
        }
    }

    /// The latest stage that currently has a timestamp.
    pub fn last_recorded_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .rev()
            .find(|stage| self.get(*stage).is_some())
    }

    /// Sets the timestamp for `stage` if it is not already set.
    ///
    /// A timestamp that would break stage order is clamped into the window
    /// allowed by the stages already present and a warning is logged.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::InvalidTimestamp`] if `timestamp` is NaN or infinite.
    /// - [`MetricsError::StaleStage`] if the turn was interrupted before
    ///   reaching `stage`.
    /// - [`MetricsError::DuplicateStage`] if `stage` already holds a
    ///   different timestamp. Repeating the stored value is accepted.
    pub fn record_stage(
        &mut self,
        stage: Stage,
        timestamp: f64,
    ) -> Result<RecordOutcome, MetricsError> {
        if !timestamp.is_finite() {
            return Err(MetricsError::InvalidTimestamp {
                turn_id: self.turn_id,
                stage,
                timestamp,
            });
        }

        if self.interrupted && self.interrupted_after.map_or(true, |last| stage > last) {
            return Err(MetricsError::StaleStage {
                turn_id: self.turn_id,
                stage,
            });
        }

        let stored = self.clamp_to_neighbours(stage, timestamp);

        if let Some(existing) = self.get(stage) {
            if existing == stored {
                return Ok(RecordOutcome::Unchanged);
            }
            return Err(MetricsError::DuplicateStage {
                turn_id: self.turn_id,
                stage,
                existing,
                attempted: timestamp,
            });
        }

        *self.slot_mut(stage) = Some(stored);

        if stored != timestamp {
            tracing::warn!(
                turn_id = self.turn_id,
                %stage,
                reported = timestamp,
                stored,
                "stage timestamp out of order, clamped"
            );
            return Ok(RecordOutcome::Clamped {
                reported: timestamp,
                stored,
            });
        }

        Ok(RecordOutcome::Recorded)
    }

    /// Raises `timestamp` to the latest earlier stage and lowers it to the
    /// earliest later stage that are already present.
    fn clamp_to_neighbours(&self, stage: Stage, timestamp: f64) -> f64 {
        let floor = Stage::ALL[..stage.ordinal()]
            .iter()
            .filter_map(|s| self.get(*s))
            .fold(f64::NEG_INFINITY, f64::max);
        let ceiling = Stage::ALL[stage.ordinal() + 1..]
            .iter()
            .filter_map(|s| self.get(*s))
            .fold(f64::INFINITY, f64::min);

        timestamp.max(floor).min(ceiling)
    }

    /// Flags the turn as interrupted. Stages later than the latest one
    /// already recorded will be rejected from now on. Calling this again is
    /// a no-op.
    pub fn mark_interrupted(&mut self) {
        if self.interrupted {
            return;
        }
        self.interrupted = true;
        self.interrupted_after = self.last_recorded_stage();
    }

    /// Computes the derived latencies for this turn.
    pub fn derived(&self) -> TurnMetrics {
        TurnMetrics {
            eou_delay: elapsed(self.utterance_end, self.stt_complete_at),
            ttft: elapsed(self.stt_complete_at, self.llm_first_token_at),
            // Without a first token the completion time is not a response.
            ttfd: self
                .llm_first_token_at
                .and(elapsed(self.stt_complete_at, self.llm_complete_at)),
            total_latency: elapsed(self.utterance_end, self.tts_first_audio_at),
        }
    }
}

fn elapsed(from: Option<f64>, to: Option<f64>) -> Option<f64> {
    Some(to? - from?)
}
