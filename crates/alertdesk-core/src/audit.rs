//! Security audit log.
//!
//! Append-only record of login, lockout, logout and expiry events, kept in
//! the same key-value storage as the session. Only the most recent
//! entries are retained (100 by default); the oldest are evicted first.
//!
//! Every recorded event is also emitted as a `tracing` event so operators
//! tailing the application log see the same trail.
//!
//! Display format:
//! `2024-01-15 10:23:45 | LOGIN_FAILED    | alice | Invalid credentials, 2 attempt(s) remaining`

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::{keys, read_json, write_json, KeyValueStore};
use crate::utils::truncate;

/// Maximum length of the description shown in a log line
const DESCRIPTION_PREVIEW_LENGTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AuditEventKind {
    LoginSuccess,
    LoginFailed,
    AccountBlocked,
    Logout,
    SessionExpired,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::AccountBlocked => "ACCOUNT_BLOCKED",
            Self::Logout => "LOGOUT",
            Self::SessionExpired => "SESSION_EXPIRED",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub kind: AuditEventKind,
    pub description: String,
    pub client_id: String,
}

impl AuditEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        username: impl Into<String>,
        kind: AuditEventKind,
        description: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            username: username.into(),
            kind,
            description: description.into(),
            client_id: client_id.into(),
        }
    }

    /// Format as a single display line in local time
    pub fn to_log_line(&self) -> String {
        let local_time: DateTime<Local> = self.timestamp.into();
        format!(
            "{} | {:<15} | {} | {}",
            local_time.format("%Y-%m-%d %H:%M:%S"),
            self.kind.as_str(),
            self.username,
            truncate(&self.description, DESCRIPTION_PREVIEW_LENGTH)
        )
    }
}

/// Identifier of this client installation, stamped on every audit event
pub fn client_identifier() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("alertdesk/{} ({})", env!("CARGO_PKG_VERSION"), host)
}

/// Bounded, persisted audit trail
pub struct AuditLog {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    /// Serializes the read-modify-write of the stored list
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event, evicting the oldest entries past capacity.
    /// Storage failures are logged, never returned.
    pub fn record(&self, event: AuditEvent) {
        info!(
            kind = %event.kind,
            username = %event.username,
            client = %event.client_id,
            "AUDIT {}",
            event.description
        );

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: VecDeque<AuditEvent> = self.load().into();
        entries.push_back(event);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        if let Err(e) = write_json(self.store.as_ref(), keys::AUDIT_LOG, &entries) {
            warn!(error = %e, "Failed to persist audit log");
        }
    }

    /// All retained events, oldest first
    pub fn read_all(&self) -> Vec<AuditEvent> {
        self.load()
    }

    fn load(&self) -> Vec<AuditEvent> {
        match read_json(self.store.as_ref(), keys::AUDIT_LOG) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to read audit log, starting empty");
                Vec::new()
            }
        }
    }
}
