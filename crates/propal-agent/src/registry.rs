//! Live and finished conversation sessions, keyed by session id.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use propal_metrics::{MetricsTracker, SessionReporter, SessionSummary, TurnId};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::event::PipelineEvent;
use crate::session::{
    ConversationSession, ExportTargets, FinishedSession, SessionFlow, SessionSettings,
    TurnSnapshot,
};

/// `None` once the session has been finished by another caller.
type SessionSlot = Arc<Mutex<Option<ConversationSession>>>;

/// Finished sessions kept in memory when no capacity is configured.
pub const DEFAULT_FINISHED_CAPACITY: usize = 256;

#[derive(Debug)]
struct FinishedEntry {
    tracker: Arc<MetricsTracker>,
    exported: bool,
}

/// Finished sessions in the order they closed, bounded by `capacity`.
///
/// Exported sessions are evicted first. A session whose export failed is only
/// evicted once nothing else is left to make room.
#[derive(Debug)]
struct FinishedSessions {
    order: VecDeque<String>,
    entries: HashMap<String, FinishedEntry>,
    capacity: usize,
}

impl FinishedSessions {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, session_id: &str) -> Option<Arc<MetricsTracker>> {
        self.entries
            .get(session_id)
            .map(|entry| Arc::clone(&entry.tracker))
    }

    fn insert(&mut self, session_id: String, tracker: Arc<MetricsTracker>, exported: bool) {
        if self.entries.contains_key(&session_id) {
            self.order.retain(|id| id != &session_id);
        }
        self.entries
            .insert(session_id.clone(), FinishedEntry { tracker, exported });
        self.order.push_back(session_id);
        while self.entries.len() > self.capacity {
            self.evict_one();
        }
    }

    fn mark_exported(&mut self, session_id: &str) {
        if let Some(entry) = self.entries.get_mut(session_id) {
            entry.exported = true;
        }
    }

    fn evict_one(&mut self) {
        let position = self
            .order
            .iter()
            .position(|id| self.entries.get(id).is_some_and(|entry| entry.exported))
            .unwrap_or(0);
        let Some(id) = self.order.remove(position) else {
            return;
        };
        if let Some(entry) = self.entries.remove(&id) {
            if entry.exported {
                info!(session_id = %id, "evicted finished session");
            } else {
                warn!(session_id = %id, "evicted finished session with a failed export");
            }
        }
    }
}

/// All sessions known to this agent process.
///
/// The maps use `std::sync::RwLock`: every acquisition is a short map
/// operation that never spans an `.await`. Each live session sits behind its
/// own async mutex so events for one session are applied in arrival order.
#[derive(Debug)]
pub struct SessionRegistry {
    settings: SessionSettings,
    targets: ExportTargets,
    live: RwLock<HashMap<String, SessionSlot>>,
    finished: RwLock<FinishedSessions>,
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings, targets: ExportTargets) -> Self {
        Self::with_finished_capacity(settings, targets, DEFAULT_FINISHED_CAPACITY)
    }

    /// Like [`SessionRegistry::new`], keeping at most `capacity` finished
    /// sessions queryable. Evicted ids answer [`AgentError::SessionNotFound`].
    pub fn with_finished_capacity(
        settings: SessionSettings,
        targets: ExportTargets,
        capacity: usize,
    ) -> Self {
        Self {
            settings,
            targets,
            live: RwLock::new(HashMap::new()),
            finished: RwLock::new(FinishedSessions::new(capacity)),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn targets(&self) -> &ExportTargets {
        &self.targets
    }

    /// Opens a session with a fresh id. Must be called within a Tokio runtime.
    pub fn create(&self, participant: Option<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let session = ConversationSession::start(id.clone(), participant, self.settings);
        write(&self.live).insert(id.clone(), Arc::new(Mutex::new(Some(session))));
        id
    }

    pub fn live_count(&self) -> usize {
        read(&self.live).len()
    }

    /// Applies `event` to the session. Returns the finished session when the
    /// event ended it.
    pub async fn dispatch(
        &self,
        session_id: &str,
        event: PipelineEvent,
        received_at: f64,
    ) -> Result<Option<FinishedSession>, AgentError> {
        let slot = self.slot(session_id)?;
        let mut guard = slot.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| AgentError::SessionFinished(session_id.to_string()))?;

        match session.handle(event, received_at).await {
            SessionFlow::Continue => Ok(None),
            SessionFlow::Finish => match guard.take() {
                Some(session) => Ok(Some(self.close(session).await)),
                None => Ok(None),
            },
        }
    }

    /// Current summary of a live or finished session.
    pub async fn summary(&self, session_id: &str) -> Result<SessionSummary, AgentError> {
        if let Some(tracker) = self.finished_tracker(session_id) {
            return Ok(tracker.session_summary());
        }
        let slot = self.slot(session_id)?;
        let guard = slot.lock().await;
        match guard.as_ref() {
            Some(session) => Ok(session.summary().await),
            None => self
                .finished_tracker(session_id)
                .map(|t| t.session_summary())
                .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string())),
        }
    }

    /// One turn of a live or finished session.
    pub async fn turn(&self, session_id: &str, turn_id: TurnId) -> Result<TurnSnapshot, AgentError> {
        if let Some(tracker) = self.finished_tracker(session_id) {
            return finished_turn(&tracker, turn_id);
        }
        let slot = self.slot(session_id)?;
        let guard = slot.lock().await;
        match guard.as_ref() {
            Some(session) => Ok(session.turn(turn_id).await?),
            None => match self.finished_tracker(session_id) {
                Some(tracker) => finished_turn(&tracker, turn_id),
                None => Err(AgentError::SessionNotFound(session_id.to_string())),
            },
        }
    }

    /// Finishes a live session: drains reports, ends it and exports.
    pub async fn finish(&self, session_id: &str) -> Result<FinishedSession, AgentError> {
        let slot = self.slot(session_id)?;
        let session = slot
            .lock()
            .await
            .take()
            .ok_or_else(|| AgentError::SessionFinished(session_id.to_string()))?;
        Ok(self.close(session).await)
    }

    /// Finishes every live session, e.g. on shutdown.
    pub async fn finish_all(&self) -> Vec<FinishedSession> {
        let slots: Vec<SessionSlot> = write(&self.live).drain().map(|(_, slot)| slot).collect();
        let mut finished = Vec::with_capacity(slots.len());
        for slot in slots {
            let session = slot.lock().await.take();
            if let Some(session) = session {
                finished.push(self.close(session).await);
            }
        }
        info!(sessions = finished.len(), "finished all live sessions");
        finished
    }

    async fn close(&self, session: ConversationSession) -> FinishedSession {
        let id = session.id().to_string();
        let finished = session.finish(&self.targets).await;
        write(&self.finished).insert(
            id.clone(),
            Arc::clone(finished.tracker()),
            finished.export.is_ok(),
        );
        write(&self.live).remove(&id);
        finished
    }

    /// Exports a finished session to `path`, e.g. after its configured
    /// export failed. On success the session becomes evictable like any
    /// exported one.
    ///
    /// # Errors
    ///
    /// [`AgentError::SessionNotFound`] unless the session is finished and
    /// still retained, [`AgentError::Metrics`] if `path` cannot be written.
    pub fn retry_export(
        &self,
        session_id: &str,
        path: impl Into<PathBuf>,
    ) -> Result<PathBuf, AgentError> {
        let tracker = self
            .finished_tracker(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        let path = path.into();
        SessionReporter::new(&tracker).export(&path)?;
        write(&self.finished).mark_exported(session_id);
        info!(session_id, path = %path.display(), "finished session re-exported");
        Ok(path)
    }

    fn slot(&self, session_id: &str) -> Result<SessionSlot, AgentError> {
        if let Some(slot) = read(&self.live).get(session_id).cloned() {
            return Ok(slot);
        }
        if self.finished_tracker(session_id).is_some() {
            Err(AgentError::SessionFinished(session_id.to_string()))
        } else {
            Err(AgentError::SessionNotFound(session_id.to_string()))
        }
    }

    fn finished_tracker(&self, session_id: &str) -> Option<Arc<MetricsTracker>> {
        read(&self.finished).get(session_id)
    }
}

fn finished_turn(tracker: &MetricsTracker, turn_id: TurnId) -> Result<TurnSnapshot, AgentError> {
    let record = tracker.turn_record(turn_id)?;
    let metrics = record.derived();
    Ok(TurnSnapshot { record, metrics })
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
