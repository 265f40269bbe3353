//! In-memory session store keyed by phone number.
//!
//! Webhook deliveries for the same phone must not interleave: callers take
//! the per-phone lock for the whole turn (read, transition, persist), so two
//! near-simultaneous messages from one user serialize instead of racing.
//! Deliveries for different phones are independent.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::session::UserSession;

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, UserSession>>>,
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
    idle_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    pub total: usize,
    pub registered: usize,
}

impl SessionStore {
    pub fn new(idle_timeout_minutes: i64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout: Duration::minutes(idle_timeout_minutes),
        }
    }

    /// Acquire the per-phone turn lock. Hold the guard until the updated
    /// session has been persisted.
    pub async fn lock(&self, phone: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.write();
            locks
                .entry(phone.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Fetch the session for a phone, applying the staleness reset. Returns
    /// a fresh `New` session for unseen numbers without storing it yet.
    pub fn get_or_create(&self, phone: &str, now: DateTime<Utc>) -> UserSession {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(phone) {
            Some(session) => {
                if session.reset_if_stale(now, self.idle_timeout) {
                    tracing::debug!("Reset stale session for {}", super::otp::mask_phone(phone));
                }
                session.clone()
            }
            None => UserSession::new(phone.to_string(), now),
        }
    }

    pub fn get(&self, phone: &str) -> Option<UserSession> {
        self.sessions.read().get(phone).cloned()
    }

    pub fn upsert(&self, session: UserSession) {
        self.sessions.write().insert(session.phone.clone(), session);
    }

    /// Drop all conversational progress for a phone, back to `New`.
    pub fn reset_to_new(&self, phone: &str) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(phone) {
            let now = Utc::now();
            *session = UserSession::new(phone.to_string(), now);
        }
    }

    /// Reset every stale session in place. Returns how many were touched.
    pub fn cleanup_stale(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let mut count = 0;
        for s in sessions.values_mut() {
            if s.reset_if_stale(now, self.idle_timeout) {
                count += 1;
            }
        }
        count
    }

    pub fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read();
        SessionStats {
            total: sessions.len(),
            registered: sessions.values().filter(|s| s.is_registered()).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
