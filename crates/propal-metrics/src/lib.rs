//! Latency metrics for the propal voice agent.
//!
//! A conversation is a sequence of turns. Every turn passes through the
//! VAD → STT → LLM → TTS pipeline, and each stage boundary is reported with
//! a timestamp. From those timestamps the tracker derives the latencies the
//! agent is judged by:
//!
//! | Metric | Definition |
//! |--------|------------|
//! | `eou_delay` | `stt_complete_at - utterance_end` |
//! | `ttft` | `llm_first_token_at - stt_complete_at` |
//! | `ttfd` | `llm_complete_at - stt_complete_at`, only once a first token was seen |
//! | `total_latency` | `tts_first_audio_at - utterance_end` |
//!
//! Metrics are diagnostic, not transactional. Out-of-order timestamps are
//! clamped, rejected reports are logged, and nothing here may end a
//! conversation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use propal_metrics::{MetricsTracker, SessionReporter, Stage, StageIntake, StageReport, TrackerConfig};
//!
//! let tracker = Arc::new(MetricsTracker::new("session-1", TrackerConfig::default()));
//! let intake = StageIntake::spawn(Arc::clone(&tracker));
//!
//! let turn = tracker.start_turn();
//! intake.handle().report(StageReport::stage(turn, Stage::UtteranceEnd, 10.0)).await;
//!
//! let tracker = intake.drain().await;
//! tracker.end_session();
//! SessionReporter::new(&tracker).export("metrics/session-1.csv")?;
//! ```

mod error;
mod intake;
mod report;
mod stage;
mod tracker;
mod turn;

pub use error::MetricsError;
pub use intake::{IntakeHandle, ReportKind, StageIntake, StageReport, DEFAULT_INTAKE_CAPACITY};
pub use report::SessionReporter;
pub use stage::{ParseStageError, Stage};
pub use tracker::{MetricsTracker, SessionSummary, TrackerConfig, DEFAULT_TARGET_LATENCY_SECS};
pub use turn::{RecordOutcome, TurnId, TurnMetrics, TurnRecord};
