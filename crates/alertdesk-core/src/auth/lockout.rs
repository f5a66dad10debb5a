//! Failed-attempt counting and account lockout.
//!
//! Per username:
//! `Unlocked(n)` --failure--> `Unlocked(n + 1)` while `n + 1 < max`,
//! otherwise `Locked(until = now + window)`.
//! `Locked` --read after `until`--> `Unlocked(0)`.
//! `Unlocked(_)` --success--> `Unlocked(0)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::{keys, read_json, write_json, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked { failed_attempts: u32 },
    Locked { until: DateTime<Utc> },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }
}

/// Result of counting one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Counted { failed_attempts: u32 },
    /// This failure reached the limit and started the lockout
    Locked { until: DateTime<Utc> },
    /// A lockout was already in force; nothing was counted
    AlreadyLocked { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailedAttemptRecord {
    pub count: u32,
    pub blocked_until: Option<DateTime<Utc>>,
}

type AttemptMap = HashMap<String, u32>;
type LockoutMap = HashMap<String, DateTime<Utc>>;

pub struct LockoutTracker {
    store: Arc<dyn KeyValueStore>,
    max_attempts: u32,
    lockout_duration: Duration,
    /// Serializes read-modify-write of the two stored maps
    write_lock: Mutex<()>,
}

impl LockoutTracker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        max_attempts: u32,
        lockout_duration: Duration,
    ) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            lockout_duration,
            write_lock: Mutex::new(()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Raw stored record, without applying expiry
    pub fn record(&self, username: &str) -> FailedAttemptRecord {
        FailedAttemptRecord {
            count: self.attempts().get(username).copied().unwrap_or(0),
            blocked_until: self.lockouts().get(username).copied(),
        }
    }

    /// Current state. A lock whose window has passed is cleared, together
    /// with the attempt counter, as part of this read.
    pub fn status(&self, username: &str, now: DateTime<Utc>) -> LockState {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.status_locked(username, now)
    }

    /// Count a failed attempt. Only the call that crosses the limit gets
    /// `Locked`; callers racing behind it see `AlreadyLocked`.
    pub fn register_failure(&self, username: &str, now: DateTime<Utc>) -> FailureOutcome {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let LockState::Locked { until } = self.status_locked(username, now) {
            return FailureOutcome::AlreadyLocked { until };
        }

        let mut attempts = self.attempts();
        let count = attempts.get(username).copied().unwrap_or(0) + 1;
        attempts.insert(username.to_string(), count);
        self.save_attempts(&attempts);

        if count >= self.max_attempts {
            let until = now + self.lockout_duration;
            let mut lockouts = self.lockouts();
            lockouts.insert(username.to_string(), until);
            self.save_lockouts(&lockouts);
            warn!(username, %until, "Account locked after repeated failed logins");
            FailureOutcome::Locked { until }
        } else {
            FailureOutcome::Counted {
                failed_attempts: count,
            }
        }
    }

    /// Forget all failure state for a username
    pub fn reset(&self, username: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.clear_locked(username);
    }

    fn status_locked(&self, username: &str, now: DateTime<Utc>) -> LockState {
        if let Some(until) = self.lockouts().get(username).copied() {
            if now < until {
                return LockState::Locked { until };
            }
            info!(username, "Lockout window expired");
            self.clear_locked(username);
            return LockState::Unlocked { failed_attempts: 0 };
        }
        LockState::Unlocked {
            failed_attempts: self.attempts().get(username).copied().unwrap_or(0),
        }
    }

    fn clear_locked(&self, username: &str) {
        let mut attempts = self.attempts();
        if attempts.remove(username).is_some() {
            self.save_attempts(&attempts);
        }
        let mut lockouts = self.lockouts();
        if lockouts.remove(username).is_some() {
            self.save_lockouts(&lockouts);
        }
    }

    fn attempts(&self) -> AttemptMap {
        read_json(self.store.as_ref(), keys::FAILED_ATTEMPTS)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read failed-attempt counters");
                None
            })
            .unwrap_or_default()
    }

    fn lockouts(&self) -> LockoutMap {
        read_json(self.store.as_ref(), keys::LOCKOUT_UNTIL)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read lockout timestamps");
                None
            })
            .unwrap_or_default()
    }

    fn save_attempts(&self, attempts: &AttemptMap) {
        if let Err(e) = write_json(self.store.as_ref(), keys::FAILED_ATTEMPTS, attempts) {
            warn!(error = %e, "Failed to persist failed-attempt counters");
        }
    }

    fn save_lockouts(&self, lockouts: &LockoutMap) {
        if let Err(e) = write_json(self.store.as_ref(), keys::LOCKOUT_UNTIL, lockouts) {
            warn!(error = %e, "Failed to persist lockout timestamps");
        }
    }
}
