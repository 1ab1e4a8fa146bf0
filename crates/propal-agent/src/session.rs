//! One participant's conversation: turns, stage reports and teardown.
//!
//! A [`ConversationSession`] is created when a participant connects and
//! consumed by [`ConversationSession::finish`] when they leave. It converts
//! [`PipelineEvent`]s into stage reports for its own metrics tracker and
//! decides, per the configured [`InterruptionPolicy`], when the user has
//! barged in on the agent.
//!
//! Two turns can be active at once: the *listening* turn, whose user speech
//! VAD and STT are reporting on, and the *responding* turn, whose LLM and TTS
//! output is still streaming. A new utterance always opens a new turn.
//!
//! A turn is awaiting its response from its final transcript until its
//! playback finishes. User speech anywhere in that window, LLM stage
//! included, is a barge-in candidate.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use propal_metrics::{
    IntakeHandle, MetricsError, MetricsTracker, SessionReporter, SessionSummary, Stage,
    StageIntake, StageReport, TrackerConfig, TurnId, TurnMetrics, TurnRecord,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::event::PipelineEvent;

/// When user speech during the agent's response counts as an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InterruptionPolicy {
    /// Required overlap between user speech and the agent's response, in
    /// seconds.
    /// Zero or less interrupts as soon as speech starts.
    pub min_overlap_secs: f64,
}

/// Per-session settings derived from the agent configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionSettings {
    pub tracker: TrackerConfig,
    pub interruption: InterruptionPolicy,
    /// Sessions end once an event is more than this many seconds past the
    /// first one.
    pub max_duration_secs: Option<f64>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let performance = &config.performance;
        Self {
            tracker: TrackerConfig {
                target_latency_secs: performance.target_latency_secs,
            },
            interruption: InterruptionPolicy {
                min_overlap_secs: performance.interruption_min_overlap_secs,
            },
            max_duration_secs: (performance.max_conversation_duration_secs > 0)
                .then_some(performance.max_conversation_duration_secs as f64),
        }
    }
}

/// Where finished sessions are exported.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTargets {
    /// Directory receiving `<session_id>.csv`.
    pub export_dir: PathBuf,
    /// Cross-session summary history, if kept.
    pub history_file: Option<PathBuf>,
}

impl ExportTargets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            export_dir: config.metrics.export_dir.clone(),
            history_file: Some(config.metrics.history_file.clone()),
        }
    }

    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.export_dir.join(format!("{session_id}.csv"))
    }
}

/// Whether the session should keep running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    /// The participant left or the session hit its maximum duration.
    Finish,
}

/// A turn record together with its derived latencies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnSnapshot {
    #[serde(flatten)]
    pub record: TurnRecord,
    pub metrics: TurnMetrics,
}

#[derive(Debug, Clone, Copy)]
struct BargeIn {
    turn_id: TurnId,
    speech_started_at: f64,
}

#[derive(Debug)]
pub struct ConversationSession {
    id: String,
    participant: Option<String>,
    settings: SessionSettings,
    intake: StageIntake,
    reports: IntakeHandle,
    listening_turn: Option<TurnId>,
    responding_turn: Option<TurnId>,
    /// Transcribed turn whose playback has not finished yet.
    pending_response: Option<TurnId>,
    barge_in: Option<BargeIn>,
    interrupted: HashSet<TurnId>,
    first_event_at: Option<f64>,
}

impl ConversationSession {
    /// Starts tracking a new session. Must be called within a Tokio runtime.
    pub fn start(
        id: impl Into<String>,
        participant: Option<String>,
        settings: SessionSettings,
    ) -> Self {
        let id = id.into();
        let tracker = Arc::new(MetricsTracker::new(id.clone(), settings.tracker));
        let intake = StageIntake::spawn(tracker);
        let reports = intake.handle();
        info!(session_id = %id, participant = ?participant, "conversation session started");
        Self {
            id,
            participant,
            settings,
            intake,
            reports,
            listening_turn: None,
            responding_turn: None,
            pending_response: None,
            barge_in: None,
            interrupted: HashSet::new(),
            first_event_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn participant(&self) -> Option<&str> {
        self.participant.as_deref()
    }

    pub fn tracker(&self) -> &Arc<MetricsTracker> {
        self.intake.tracker()
    }

    /// Applies one pipeline event. `received_at` stands in for a missing
    /// event timestamp.
    pub async fn handle(&mut self, event: PipelineEvent, received_at: f64) -> SessionFlow {
        let ts = event.timestamp().unwrap_or(received_at);
        let started = *self.first_event_at.get_or_insert(ts);
        debug!(session_id = %self.id, event = event.kind(), timestamp = ts, "pipeline event");

        match event {
            PipelineEvent::ParticipantConnected { participant, .. } => {
                info!(session_id = %self.id, %participant, "participant connected");
                self.participant.get_or_insert(participant);
            }
            PipelineEvent::SpeechStarted { .. } => self.on_speech_started(ts).await,
            PipelineEvent::SpeechEnded { .. } => {
                match self.listening_turn {
                    Some(turn_id) => self.report(turn_id, Stage::UtteranceEnd, ts).await,
                    None => warn!(session_id = %self.id, "speech ended without a listening turn"),
                }
                self.resolve_barge_in(ts).await;
            }
            PipelineEvent::FinalTranscript { text, .. } => {
                let turn_id = match self.listening_turn {
                    Some(turn_id) => turn_id,
                    None => {
                        warn!(session_id = %self.id, "transcript without detected speech, opening turn");
                        let turn_id = self.tracker().start_turn();
                        self.listening_turn = Some(turn_id);
                        turn_id
                    }
                };
                if self.responding_turn == Some(turn_id) {
                    debug!(
                        session_id = %self.id,
                        turn_id,
                        chars = text.len(),
                        "extra transcript segment ignored"
                    );
                } else {
                    debug!(session_id = %self.id, turn_id, chars = text.len(), "final transcript");
                    self.report(turn_id, Stage::SttComplete, ts).await;
                    self.tracker().record_user_message();
                    self.responding_turn = Some(turn_id);
                    self.pending_response = Some(turn_id);
                }
            }
            PipelineEvent::LlmFirstToken { turn_id, .. } => {
                if let Some(turn_id) = self.response_target(turn_id) {
                    self.report(turn_id, Stage::LlmFirstToken, ts).await;
                }
            }
            PipelineEvent::LlmComplete { turn_id, .. } => {
                if let Some(turn_id) = self.response_target(turn_id) {
                    self.report(turn_id, Stage::LlmComplete, ts).await;
                }
            }
            PipelineEvent::TtsFirstAudio { turn_id, .. } => {
                if let Some(turn_id) = self.response_target(turn_id) {
                    self.report(turn_id, Stage::TtsFirstAudio, ts).await;
                    if self.interrupted.contains(&turn_id) {
                        debug!(session_id = %self.id, turn_id, "audio for interrupted turn not counted");
                    } else {
                        self.tracker().record_agent_response();
                    }
                }
            }
            PipelineEvent::TtsPlaybackFinished { turn_id, .. } => {
                self.resolve_barge_in(ts).await;
                let finished = self
                    .pending_response
                    .is_some_and(|pending| turn_id.map_or(true, |id| id == pending));
                if finished {
                    self.pending_response = None;
                }
            }
            PipelineEvent::ProviderError {
                provider, message, ..
            } => {
                warn!(session_id = %self.id, %provider, %message, "provider error");
                self.tracker().record_error();
            }
            PipelineEvent::ParticipantDisconnected { .. } => {
                info!(session_id = %self.id, "participant disconnected");
                return SessionFlow::Finish;
            }
        }

        if let Some(max) = self.settings.max_duration_secs {
            if ts - started > max {
                info!(session_id = %self.id, max_duration_secs = max, "maximum conversation duration reached");
                return SessionFlow::Finish;
            }
        }
        SessionFlow::Continue
    }

    async fn on_speech_started(&mut self, ts: f64) {
        let turn_id = self.tracker().start_turn();
        self.listening_turn = Some(turn_id);
        self.report(turn_id, Stage::UtteranceStart, ts).await;

        let Some(responding) = self.pending_response else {
            return;
        };
        if self.settings.interruption.min_overlap_secs <= 0.0 {
            self.interrupt(responding).await;
        } else {
            self.barge_in = Some(BargeIn {
                turn_id: responding,
                speech_started_at: ts,
            });
        }
    }

    /// Decides a pending barge-in once the overlap is known: when the user
    /// stops speaking or the agent stops playing, whichever comes first.
    /// A short overlap leaves the turn awaiting its response.
    async fn resolve_barge_in(&mut self, ts: f64) {
        let Some(barge_in) = self.barge_in.take() else {
            return;
        };
        let overlap = ts - barge_in.speech_started_at;
        if overlap >= self.settings.interruption.min_overlap_secs {
            self.interrupt(barge_in.turn_id).await;
        } else {
            debug!(
                session_id = %self.id,
                turn_id = barge_in.turn_id,
                overlap,
                "speech overlap too short to count as interruption"
            );
        }
    }

    fn response_target(&self, explicit: Option<TurnId>) -> Option<TurnId> {
        let target = explicit.or(self.responding_turn);
        if target.is_none() {
            warn!(session_id = %self.id, "response event without a turn awaiting a response");
        }
        target
    }

    async fn report(&self, turn_id: TurnId, stage: Stage, ts: f64) {
        self.reports
            .report(StageReport::stage(turn_id, stage, ts))
            .await;
    }

    async fn interrupt(&mut self, turn_id: TurnId) {
        if self.pending_response == Some(turn_id) {
            self.pending_response = None;
        }
        self.interrupted.insert(turn_id);
        self.reports.report(StageReport::interrupted(turn_id)).await;
    }

    /// Summary after every report sent so far has been applied.
    pub async fn summary(&self) -> SessionSummary {
        self.reports.flush().await;
        self.tracker().session_summary()
    }

    /// A turn and its derived latencies after pending reports are applied.
    ///
    /// # Errors
    ///
    /// [`MetricsError::UnknownTurn`] if the session has no such turn.
    pub async fn turn(&self, turn_id: TurnId) -> Result<TurnSnapshot, MetricsError> {
        self.reports.flush().await;
        let record = self.tracker().turn_record(turn_id)?;
        let metrics = record.derived();
        Ok(TurnSnapshot { record, metrics })
    }

    /// Drains in-flight reports, closes the session and exports its metrics.
    ///
    /// Export failures are logged and returned in the result; the metrics
    /// stay available through [`FinishedSession::tracker`] for a retry.
    pub async fn finish(self, targets: &ExportTargets) -> FinishedSession {
        let tracker = self.intake.drain().await;
        tracker.end_session();

        let reporter = SessionReporter::new(&tracker);
        let path = targets.session_file(&self.id);
        let export = reporter.export(&path).map(|()| path);
        if let Some(history) = &targets.history_file {
            // Logged by the reporter.
            let _ = reporter.append_history(history);
        }

        let summary = tracker.session_summary();
        info!(
            session_id = %self.id,
            turns = summary.turn_count,
            avg_total_latency = ?summary.avg_total_latency,
            "conversation session finished"
        );
        FinishedSession {
            summary,
            export,
            tracker,
        }
    }
}

/// A closed session and the outcome of its export.
#[derive(Debug)]
pub struct FinishedSession {
    pub summary: SessionSummary,
    /// Path of the per-session export, or why it could not be written.
    pub export: Result<PathBuf, MetricsError>,
    tracker: Arc<MetricsTracker>,
}

impl FinishedSession {
    /// The session's metrics, retained in memory after teardown.
    pub fn tracker(&self) -> &Arc<MetricsTracker> {
        &self.tracker
    }

    /// Writes the session export to `path`, e.g. after the configured
    /// destination failed.
    ///
    /// # Errors
    ///
    /// [`MetricsError::ExportIo`] if `path` cannot be written either.
    pub fn retry_export(&self, path: impl Into<PathBuf>) -> Result<PathBuf, MetricsError> {
        let path = path.into();
        SessionReporter::new(&self.tracker).export(&path)?;
        Ok(path)
    }
}
