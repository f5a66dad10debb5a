use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    AuthBackend, AuthError, BackendError, Credentials, FailedAttemptRecord, FailureOutcome,
    LockState, LockoutTracker, Session, SessionStore,
};
use crate::audit::{client_identifier, AuditEvent, AuditEventKind, AuditLog};
use crate::clock::Clock;
use crate::config::SecurityPolicy;
use crate::storage::KeyValueStore;
use crate::utils::{format_minutes, minutes_until};

const DEFAULT_LOGIN_MESSAGE: &str = "Login successful";

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub session: Session,
    pub message: String,
}

/// Owns the session, lockout and audit state for one storage profile and
/// mediates every login, logout and forced expiry.
pub struct Authenticator {
    backend: Arc<dyn AuthBackend>,
    sessions: SessionStore,
    lockout: LockoutTracker,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    policy: SecurityPolicy,
    client_id: String,
}

impl Authenticator {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        policy: SecurityPolicy,
    ) -> Self {
        Self {
            backend,
            sessions: SessionStore::new(store.clone()),
            lockout: LockoutTracker::new(
                store.clone(),
                policy.max_failed_attempts,
                policy.lockout_duration,
            ),
            audit: AuditLog::new(store, policy.audit_capacity),
            clock,
            policy,
            client_id: client_identifier(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.sessions.load()
    }

    /// Bearer token of the active session
    pub fn require_token(&self) -> Result<String, AuthError> {
        self.sessions.token().ok_or(AuthError::SessionRevoked)
    }

    /// Lock state for display; an elapsed lock is cleared by this read
    pub fn lock_state(&self, username: &str) -> LockState {
        self.lockout.status(username.trim(), self.clock.now())
    }

    pub fn failed_attempts(&self, username: &str) -> FailedAttemptRecord {
        self.lockout.record(username.trim())
    }

    /// Authenticate and start a session.
    ///
    /// The lockout check runs before the backend is contacted, so attempts
    /// against a locked account never reach the server. Backend outages do
    /// not count as failed attempts.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let credentials = Credentials::new(username, password)?;
        let username = credentials.username.as_str();

        if let LockState::Locked { until } = self.lockout.status(username, self.clock.now()) {
            let minutes_remaining = minutes_until(until, self.clock.now()).max(1);
            warn!(username, minutes_remaining, "Login attempt on locked account");
            return Err(AuthError::AccountLocked { minutes_remaining });
        }

        debug!(username, backend = self.backend.name(), "Authenticating");
        match self.backend.authenticate(&credentials).await {
            Ok(grant) if grant.token.trim().is_empty() => {
                warn!(username, backend = self.backend.name(), "Backend granted an empty token");
                Err(AuthError::Network("Invalid login response: empty token".to_string()))
            }
            Ok(grant) => {
                let now = self.clock.now();
                self.lockout.reset(username);

                let session_user = if grant.username.trim().is_empty() {
                    username.to_string()
                } else {
                    grant.username.clone()
                };
                let session = Session::new(grant.token, session_user, now);
                self.sessions.save(&session);
                self.record(username, AuditEventKind::LoginSuccess, "Login successful".to_string());
                info!(username, "Login successful");

                Ok(LoginOutcome {
                    session,
                    message: grant
                        .message
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_LOGIN_MESSAGE.to_string()),
                })
            }
            Err(BackendError::Rejected {
                message,
                remaining_attempts,
            }) => {
                let now = self.clock.now();
                debug!(
                    username,
                    %message,
                    server_remaining = ?remaining_attempts,
                    "Credentials rejected"
                );

                match self.lockout.register_failure(username, now) {
                    FailureOutcome::AlreadyLocked { until } => {
                        // Another attempt crossed the limit first and audited it
                        let minutes_remaining = minutes_until(until, now).max(1);
                        warn!(username, minutes_remaining, "Rejected attempt on locked account");
                        Err(AuthError::AccountLocked { minutes_remaining })
                    }
                    FailureOutcome::Locked { until } => {
                        let minutes_remaining = minutes_until(until, now).max(1);
                        self.record(
                            username,
                            AuditEventKind::AccountBlocked,
                            format!(
                                "Account locked for {} after {} failed attempts",
                                format_minutes(minutes_remaining),
                                self.lockout.max_attempts()
                            ),
                        );
                        Err(AuthError::AccountLocked { minutes_remaining })
                    }
                    FailureOutcome::Counted { failed_attempts } => {
                        let remaining_attempts =
                            self.lockout.max_attempts().saturating_sub(failed_attempts);
                        self.record(
                            username,
                            AuditEventKind::LoginFailed,
                            format!(
                                "Invalid credentials, {} attempt(s) remaining",
                                remaining_attempts
                            ),
                        );
                        Err(AuthError::InvalidCredentials { remaining_attempts })
                    }
                }
            }
            Err(BackendError::Unavailable(reason)) => {
                warn!(username, %reason, "Authentication backend unavailable");
                Err(AuthError::Network(reason))
            }
        }
    }

    /// End the session at the user's request. Remote revocation is best
    /// effort; the local session is cleared regardless. Safe to call twice.
    pub async fn logout(&self, username: &str) {
        let session = self.sessions.load();
        if let Some(ref s) = session {
            self.revoke(&s.token).await;
        }
        self.sessions.clear();

        if let Some(s) = session {
            let who = if username.trim().is_empty() {
                s.username.as_str()
            } else {
                username.trim()
            };
            self.record(who, AuditEventKind::Logout, "User logged out".to_string());
            info!(username = who, "Logged out");
        } else {
            debug!("Logout requested with no active session");
        }
    }

    /// Forcibly end the current session (inactivity, or the server refused
    /// the token). Returns the username whose session ended, if any.
    pub async fn expire_session(&self, reason: &str) -> Option<String> {
        let session = self.sessions.load()?;
        self.end_session(session, reason).await
    }

    /// Like `expire_session`, but only if `token` still belongs to the
    /// current session. A session started after `token` was issued is left
    /// alone.
    pub async fn expire_token(&self, token: &str, reason: &str) -> Option<String> {
        let session = self.sessions.load()?;
        if session.token != token {
            debug!(username = %session.username, "Rejected token is not the current session");
            return None;
        }
        self.end_session(session, reason).await
    }

    async fn end_session(&self, session: Session, reason: &str) -> Option<String> {
        self.revoke(&session.token).await;
        self.sessions.clear();
        self.record(&session.username, AuditEventKind::SessionExpired, reason.to_string());
        info!(username = %session.username, reason, "Session expired");
        Some(session.username)
    }

    /// Refresh the activity timestamp of the current session
    pub fn record_activity(&self) -> bool {
        self.sessions.touch(self.clock.now())
    }

    /// Resume a persisted session, expiring it if it sat idle too long
    pub async fn restore(&self) -> Option<Session> {
        let session = self.sessions.load()?;
        if session.is_idle_expired(self.clock.now(), self.policy.inactivity_timeout) {
            self.expire_session(&self.idle_expiry_reason()).await;
            return None;
        }
        debug!(username = %session.username, "Session restored");
        Some(session)
    }

    /// Audit description used when a session times out
    pub(crate) fn idle_expiry_reason(&self) -> String {
        format!(
            "Session expired after {} of inactivity",
            format_minutes(self.policy.inactivity_timeout.num_minutes())
        )
    }

    async fn revoke(&self, token: &str) {
        if let Err(e) = self.backend.revoke(token).await {
            warn!(error = %e, "Failed to revoke token on server");
        }
    }

    fn record(&self, username: &str, kind: AuditEventKind, description: String) {
        self.audit.record(AuditEvent::new(
            self.clock.now(),
            username,
            kind,
            description,
            self.client_id.clone(),
        ));
    }
}
