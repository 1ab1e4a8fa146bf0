//! Ordered intake queue that carries stage reports to a tracker.
//!
//! Provider callbacks do not touch the tracker directly. Each event becomes a
//! [`StageReport`] sent through an [`IntakeHandle`]; a single worker task
//! applies reports in arrival order, so reports for the same turn are never
//! reordered. Rejected reports are logged and dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::stage::Stage;
use crate::tracker::MetricsTracker;
use crate::turn::TurnId;

/// Default capacity of the intake queue.
pub const DEFAULT_INTAKE_CAPACITY: usize = 1024;

/// What happened to a turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportKind {
    /// A stage boundary was reached at `timestamp` seconds.
    Stage { stage: Stage, timestamp: f64 },
    /// The user interrupted the agent during this turn.
    Interrupted,
}

/// A single `(turn_id, stage, timestamp)` message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageReport {
    pub turn_id: TurnId,
    pub kind: ReportKind,
}

impl StageReport {
    pub fn stage(turn_id: TurnId, stage: Stage, timestamp: f64) -> Self {
        Self {
            turn_id,
            kind: ReportKind::Stage { stage, timestamp },
        }
    }

    pub fn interrupted(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            kind: ReportKind::Interrupted,
        }
    }
}

#[derive(Debug)]
enum IntakeMessage {
    Report(StageReport),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable sender side of a [`StageIntake`].
#[derive(Debug, Clone)]
pub struct IntakeHandle {
    tx: mpsc::Sender<IntakeMessage>,
}

impl IntakeHandle {
    /// Queues a report. Returns `false` if the intake has already been
    /// drained, in which case the report is dropped.
    pub async fn report(&self, report: StageReport) -> bool {
        if self.tx.send(IntakeMessage::Report(report)).await.is_err() {
            tracing::warn!(
                turn_id = report.turn_id,
                "stage report dropped, intake already drained"
            );
            return false;
        }
        true
    }

    /// Waits until every report queued before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(IntakeMessage::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Owns the worker task that applies stage reports to one session's tracker.
#[derive(Debug)]
pub struct StageIntake {
    handle: IntakeHandle,
    worker: JoinHandle<()>,
    tracker: Arc<MetricsTracker>,
}

impl StageIntake {
    /// Spawns the intake worker on the current Tokio runtime.
    pub fn spawn(tracker: Arc<MetricsTracker>) -> Self {
        Self::with_capacity(tracker, DEFAULT_INTAKE_CAPACITY)
    }

    pub fn with_capacity(tracker: Arc<MetricsTracker>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(Arc::clone(&tracker), rx));
        Self {
            handle: IntakeHandle { tx },
            worker,
            tracker,
        }
    }

    pub fn handle(&self) -> IntakeHandle {
        self.handle.clone()
    }

    pub fn tracker(&self) -> &Arc<MetricsTracker> {
        &self.tracker
    }

    /// Applies every report still in flight, stops the worker, and hands the
    /// tracker back. Reports sent through surviving handles afterwards are
    /// dropped.
    pub async fn drain(self) -> Arc<MetricsTracker> {
        if self.handle.tx.send(IntakeMessage::Shutdown).await.is_err() {
            tracing::warn!(
                session_id = %self.tracker.session_id(),
                "intake worker exited before shutdown"
            );
        }
        if let Err(e) = self.worker.await {
            tracing::error!(
                session_id = %self.tracker.session_id(),
                error = %e,
                "intake worker failed"
            );
        }
        self.tracker
    }
}

async fn run_worker(tracker: Arc<MetricsTracker>, mut rx: mpsc::Receiver<IntakeMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            IntakeMessage::Report(report) => apply(&tracker, report),
            IntakeMessage::Flush(done) => {
                let _ = done.send(());
            }
            IntakeMessage::Shutdown => break,
        }
    }

    // Reports that raced the shutdown message are still applied.
    rx.close();
    while let Ok(message) = rx.try_recv() {
        match message {
            IntakeMessage::Report(report) => apply(&tracker, report),
            IntakeMessage::Flush(done) => {
                let _ = done.send(());
            }
            IntakeMessage::Shutdown => {}
        }
    }
    tracing::debug!(session_id = %tracker.session_id(), "intake drained");
}

fn apply(tracker: &MetricsTracker, report: StageReport) {
    let result = match report.kind {
        ReportKind::Stage { stage, timestamp } => tracker
            .record_stage(report.turn_id, stage, timestamp)
            .map(|_| ()),
        ReportKind::Interrupted => tracker.mark_interrupted(report.turn_id),
    };

    if let Err(e) = result {
        tracing::warn!(
            session_id = %tracker.session_id(),
            turn_id = report.turn_id,
            error = %e,
            "stage report rejected"
        );
    }
}
