use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{keys, read_json, write_json, KeyValueStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub token: String,
    pub username: String,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>, username: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
            last_activity: now,
        }
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }

    /// True once the idle time strictly exceeds `timeout`
    pub fn is_idle_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.idle_for(now) > timeout
    }

    /// Whole minutes left before the idle timeout, for display
    pub fn minutes_until_idle_timeout(&self, now: DateTime<Utc>, timeout: Duration) -> i64 {
        (timeout - self.idle_for(now)).num_minutes().max(0)
    }
}

/// Persists the single active session in key-value storage.
///
/// Storage failures are logged and swallowed: a broken disk must not crash
/// the login flow, it only costs persistence.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, session: &Session) {
        let result = write_json(self.store.as_ref(), keys::SESSION_TOKEN, &session.token)
            .and_then(|_| {
                write_json(self.store.as_ref(), keys::SESSION_USERNAME, &session.username)
            })
            .and_then(|_| {
                write_json(self.store.as_ref(), keys::SESSION_LAST_ACTIVITY, &session.last_activity)
            });
        match result {
            Ok(()) => debug!(username = %session.username, "Session saved"),
            Err(e) => warn!(error = %e, "Failed to save session"),
        }
    }

    /// Load the stored session. A token without a username is treated as no
    /// session; a missing activity timestamp is treated as long idle.
    pub fn load(&self) -> Option<Session> {
        let token = self.token()?;
        let username: String = match read_json(self.store.as_ref(), keys::SESSION_USERNAME) {
            Ok(Some(name)) => name,
            Ok(None) => {
                warn!("Stored session has no username, ignoring it");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read session username");
                return None;
            }
        };
        let last_activity = match read_json(self.store.as_ref(), keys::SESSION_LAST_ACTIVITY) {
            Ok(Some(at)) => at,
            Ok(None) => DateTime::<Utc>::UNIX_EPOCH,
            Err(e) => {
                warn!(error = %e, "Failed to read last activity timestamp");
                DateTime::<Utc>::UNIX_EPOCH
            }
        };
        Some(Session {
            token,
            username,
            last_activity,
        })
    }

    pub fn clear(&self) {
        for key in [
            keys::SESSION_TOKEN,
            keys::SESSION_USERNAME,
            keys::SESSION_LAST_ACTIVITY,
        ] {
            if let Err(e) = self.store.remove(key) {
                warn!(error = %e, key, "Failed to clear session entry");
            }
        }
        debug!("Session cleared");
    }

    /// True iff a token is present
    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Get the bearer token if a session exists
    pub fn token(&self) -> Option<String> {
        match read_json::<String>(self.store.as_ref(), keys::SESSION_TOKEN) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read session token");
                None
            }
        }
    }

    /// Record user activity. Returns false when there is no session to touch.
    pub fn touch(&self, at: DateTime<Utc>) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        if let Err(e) = write_json(self.store.as_ref(), keys::SESSION_LAST_ACTIVITY, &at) {
            warn!(error = %e, "Failed to record activity");
        }
        true
    }
}
