//! Session registry
//!
//! The only structure shared between connection tasks. Guarded by a
//! synchronous lock that is never held across an `.await`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use super::delivery::Outbound;
use super::session::{NegotiationState, Session, SessionId, SessionInfo};
use crate::error::{AppError, Result};

struct Entry {
    session: Session,
    /// Owning reference to the connection's outbound queue
    outbound: mpsc::Sender<Outbound>,
}

/// Concurrency-safe map of live sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Entry>>,
    capacity: AtomicUsize,
    closing: AtomicBool,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: AtomicUsize::new(capacity),
            closing: AtomicBool::new(false),
        }
    }

    /// Register a session for `source_id` owning `outbound`
    ///
    /// Fails with `CapacityExhausted` when full and `ShuttingDown` after
    /// [`begin_shutdown`](Self::begin_shutdown).
    pub fn register(&self, source_id: &str, outbound: mpsc::Sender<Outbound>) -> Result<SessionId> {
        if self.closing.load(Ordering::Acquire) {
            return Err(AppError::ShuttingDown);
        }

        let mut sessions = self.sessions.write();

        let limit = self.capacity.load(Ordering::Relaxed);
        if sessions.len() >= limit {
            return Err(AppError::CapacityExhausted { limit });
        }

        let mut id = SessionId::generate(source_id);
        while sessions.contains_key(&id) {
            id = SessionId::generate(source_id);
        }

        sessions.insert(
            id.clone(),
            Entry {
                session: Session::new(id.clone(), source_id),
                outbound,
            },
        );
        debug!("Registered session {} ({} live)", id, sessions.len());
        Ok(id)
    }

    /// Remove a session; absent ids are a no-op returning `None`
    ///
    /// Dropping the entry drops the outbound sender, which ends the
    /// owning connection's queue.
    pub fn unregister(&self, id: &SessionId) -> Option<Session> {
        let entry = self.sessions.write().remove(id)?;
        Some(entry.session)
    }

    /// Point-in-time copy of one session
    pub fn lookup(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).map(|e| e.session.clone())
    }

    /// Point-in-time copy of all sessions, oldest first
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .values()
            .map(|e| e.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions.iter().map(Session::info).collect()
    }

    /// Record a negotiation state change; returns false if the session is gone
    pub fn update_state(&self, id: &SessionId, state: NegotiationState, ice_exchange: bool) -> bool {
        match self.sessions.write().get_mut(id) {
            Some(entry) => {
                entry.session.state = state;
                entry.session.ice_exchange = ice_exchange;
                true
            }
            None => false,
        }
    }

    /// Mark activity on a session
    pub fn touch(&self, id: &SessionId) {
        if let Some(entry) = self.sessions.write().get_mut(id) {
            entry.session.last_activity = Instant::now();
        }
    }

    /// Clone of the session's outbound queue handle
    pub fn outbound(&self, id: &SessionId) -> Option<mpsc::Sender<Outbound>> {
        self.sessions.read().get(id).map(|e| e.outbound.clone())
    }

    /// Sessions with no activity for at least `window`
    pub fn idle_sessions(&self, window: Duration) -> Vec<SessionId> {
        let now = Instant::now();
        self.sessions
            .read()
            .values()
            .filter(|e| now.duration_since(e.session.last_activity) >= window)
            .map(|e| e.session.id.clone())
            .collect()
    }

    /// Ids of all live sessions
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Change the session limit; existing sessions above it are kept
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Refuse all further registrations
    pub fn begin_shutdown(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
