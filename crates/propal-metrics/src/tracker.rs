//! Session-level accumulation of turn records and summary statistics.
//!
//! Each turn sits behind its own mutex so that stage reports for different
//! turns (an STT callback for the new turn, a TTS callback for the previous
//! one) never wait on each other. The outer `RwLock` is only taken for
//! writing when a turn is appended.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::stage::Stage;
use crate::turn::{RecordOutcome, TurnId, TurnMetrics, TurnRecord};

/// Default latency target in seconds, measured end of speech to first audio.
pub const DEFAULT_TARGET_LATENCY_SECS: f64 = 2.0;

/// Tunables for a [`MetricsTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// A completed turn meets the target when its total latency is strictly
    /// below this many seconds.
    pub target_latency_secs: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            target_latency_secs: DEFAULT_TARGET_LATENCY_SECS,
        }
    }
}

/// Aggregate statistics for one session.
///
/// Averages only include turns where the metric could be derived and are
/// `None` when no turn qualifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub turn_count: usize,
    pub message_count: u64,
    pub agent_response_count: u64,
    pub interruption_count: usize,
    pub error_count: u64,
    pub avg_eou_delay: Option<f64>,
    pub avg_ttft: Option<f64>,
    pub avg_ttfd: Option<f64>,
    pub avg_total_latency: Option<f64>,
    pub min_total_latency: Option<f64>,
    pub max_total_latency: Option<f64>,
    pub target_latency_secs: f64,
    /// Share of completed turns (those with a total latency) that met the
    /// latency target.
    pub target_latency_met_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct SessionEnd {
    at: DateTime<Utc>,
    duration_secs: f64,
}

/// Owns the ordered turns of one conversation session.
#[derive(Debug)]
pub struct MetricsTracker {
    session_id: String,
    config: TrackerConfig,
    started_at: DateTime<Utc>,
    started: Instant,
    ended: Mutex<Option<SessionEnd>>,
    turns: RwLock<Vec<Arc<Mutex<TurnRecord>>>>,
    error_count: AtomicU64,
    message_count: AtomicU64,
    agent_response_count: AtomicU64,
}

/// Metrics are diagnostic: a panic elsewhere must not make the data
/// unreadable, so poisoned locks are recovered.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MetricsTracker {
    pub fn new(session_id: impl Into<String>, config: TrackerConfig) -> Self {
        let session_id = session_id.into();
        tracing::info!(session_id = %session_id, "started tracking session");
        Self {
            session_id,
            config,
            started_at: Utc::now(),
            started: Instant::now(),
            ended: Mutex::new(None),
            turns: RwLock::new(Vec::new()),
            error_count: AtomicU64::new(0),
            message_count: AtomicU64::new(0),
            agent_response_count: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Appends a new turn and returns its identifier.
    ///
    /// Identifiers start at 1 and increase by one per call, including under
    /// concurrent callers.
    pub fn start_turn(&self) -> TurnId {
        let mut turns = self.turns.write().unwrap_or_else(PoisonError::into_inner);
        let turn_id = turns.len() as TurnId + 1;
        turns.push(Arc::new(Mutex::new(TurnRecord::new(turn_id))));
        tracing::debug!(session_id = %self.session_id, turn_id, "turn started");
        turn_id
    }

    fn turn(&self, turn_id: TurnId) -> Result<Arc<Mutex<TurnRecord>>, MetricsError> {
        let turns = self.turns.read().unwrap_or_else(PoisonError::into_inner);
        let turn = turn_id
            .checked_sub(1)
            .and_then(|index| turns.get(index as usize))
            .cloned();
        turn.ok_or(MetricsError::UnknownTurn(turn_id))
    }

    /// Records a stage boundary for a turn. See [`TurnRecord::record_stage`].
    ///
    /// # Errors
    ///
    /// [`MetricsError::UnknownTurn`] for an identifier that was never issued,
    /// otherwise the errors of [`TurnRecord::record_stage`].
    pub fn record_stage(
        &self,
        turn_id: TurnId,
        stage: Stage,
        timestamp: f64,
    ) -> Result<RecordOutcome, MetricsError> {
        let turn = self.turn(turn_id)?;
        let outcome = lock(&turn).record_stage(stage, timestamp)?;
        tracing::debug!(
            session_id = %self.session_id,
            turn_id,
            %stage,
            timestamp,
            "stage recorded"
        );
        Ok(outcome)
    }

    /// Flags a turn as interrupted by the user.
    ///
    /// # Errors
    ///
    /// [`MetricsError::UnknownTurn`] for an identifier that was never issued.
    pub fn mark_interrupted(&self, turn_id: TurnId) -> Result<(), MetricsError> {
        let turn = self.turn(turn_id)?;
        lock(&turn).mark_interrupted();
        tracing::info!(session_id = %self.session_id, turn_id, "user interruption detected");
        Ok(())
    }

    /// Derived latencies for one turn.
    ///
    /// # Errors
    ///
    /// [`MetricsError::UnknownTurn`] for an identifier that was never issued.
    pub fn derived_metrics(&self, turn_id: TurnId) -> Result<TurnMetrics, MetricsError> {
        let turn = self.turn(turn_id)?;
        let metrics = lock(&turn).derived();
        Ok(metrics)
    }

    /// Copy of a single turn record.
    ///
    /// # Errors
    ///
    /// [`MetricsError::UnknownTurn`] for an identifier that was never issued.
    pub fn turn_record(&self, turn_id: TurnId) -> Result<TurnRecord, MetricsError> {
        let turn = self.turn(turn_id)?;
        let record = lock(&turn).clone();
        Ok(record)
    }

    /// Copies of all turn records in order.
    pub fn turns(&self) -> Vec<TurnRecord> {
        let turns = self.turns.read().unwrap_or_else(PoisonError::into_inner);
        turns.iter().map(|turn| lock(turn).clone()).collect()
    }

    pub fn turn_count(&self) -> usize {
        self.turns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Counts a provider or pipeline error.
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a finalized user message.
    pub fn record_user_message(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an agent response that started playing.
    pub fn record_agent_response(&self) {
        self.agent_response_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Stamps the end of the session. Only the first call has an effect.
    pub fn end_session(&self) {
        let mut ended = lock(&self.ended);
        if ended.is_none() {
            let end = SessionEnd {
                at: Utc::now(),
                duration_secs: self.started.elapsed().as_secs_f64(),
            };
            tracing::info!(
                session_id = %self.session_id,
                duration_secs = end.duration_secs,
                "session ended"
            );
            *ended = Some(end);
        }
    }

    pub fn is_ended(&self) -> bool {
        lock(&self.ended).is_some()
    }

    /// Computes aggregate statistics over all turns recorded so far.
    pub fn session_summary(&self) -> SessionSummary {
        let turns = self.turns();
        let metrics: Vec<TurnMetrics> = turns.iter().map(TurnRecord::derived).collect();
        let total_latencies: Vec<f64> = metrics.iter().filter_map(|m| m.total_latency).collect();

        let target = self.config.target_latency_secs;
        let target_latency_met_ratio = if total_latencies.is_empty() {
            None
        } else {
            let met = total_latencies.iter().filter(|l| **l < target).count();
            Some(met as f64 / total_latencies.len() as f64)
        };

        let end = *lock(&self.ended);
        let duration_secs = end.map_or_else(
            || self.started.elapsed().as_secs_f64(),
            |end| end.duration_secs,
        );

        SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            ended_at: end.map(|end| end.at),
            duration_secs,
            turn_count: turns.len(),
            message_count: self.message_count.load(Ordering::Relaxed),
            agent_response_count: self.agent_response_count.load(Ordering::Relaxed),
            interruption_count: turns.iter().filter(|t| t.interrupted).count(),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_eou_delay: mean(metrics.iter().filter_map(|m| m.eou_delay)),
            avg_ttft: mean(metrics.iter().filter_map(|m| m.ttft)),
            avg_ttfd: mean(metrics.iter().filter_map(|m| m.ttfd)),
            avg_total_latency: mean(total_latencies.iter().copied()),
            min_total_latency: total_latencies.iter().copied().reduce(f64::min),
            max_total_latency: total_latencies.iter().copied().reduce(f64::max),
            target_latency_secs: target,
            target_latency_met_ratio,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
