//! Authentication backends.
//!
//! The console can authenticate against the remote REST backend
//! (`ApiClient`), a local mock user table (`LocalBackend`), or the remote
//! backend with an explicit local fallback (`FallbackBackend`). The
//! fallback only engages when the remote cannot be reached; a remote
//! rejection is final.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{BackendError, Credentials};
use crate::api::ApiClient;
use crate::config::{BackendMode, Config};

/// Prefix of tokens issued by the local backend
const LOCAL_TOKEN_PREFIX: &str = "local-";

/// Successful authentication as returned by a backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthGrant {
    pub token: String,
    pub username: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Single attempt, no retry
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, BackendError>;

    /// Revoke a token issued by this backend
    async fn revoke(&self, token: &str) -> Result<(), BackendError>;
}

/// Mock user table kept in configuration
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    users: HashMap<String, String>,
}

impl LocalBackend {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    fn issue_token() -> String {
        let bytes: [u8; 16] = rand::random();
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}{}", LOCAL_TOKEN_PREFIX, hex)
    }
}

#[async_trait]
impl AuthBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, BackendError> {
        match self.users.get(&credentials.username) {
            Some(expected) if *expected == credentials.password => Ok(AuthGrant {
                token: Self::issue_token(),
                username: credentials.username.clone(),
                message: Some("Logged in with local account".to_string()),
            }),
            _ => Err(BackendError::Rejected {
                message: "Invalid username or password".to_string(),
                remaining_attempts: None,
            }),
        }
    }

    async fn revoke(&self, token: &str) -> Result<(), BackendError> {
        debug!(local = token.starts_with(LOCAL_TOKEN_PREFIX), "Local token discarded");
        Ok(())
    }
}

/// Remote first, local only when the remote is unavailable
pub struct FallbackBackend {
    primary: Arc<dyn AuthBackend>,
    fallback: Arc<dyn AuthBackend>,
}

impl FallbackBackend {
    pub fn new(primary: Arc<dyn AuthBackend>, fallback: Arc<dyn AuthBackend>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl AuthBackend for FallbackBackend {
    fn name(&self) -> &'static str {
        "remote_with_local_fallback"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, BackendError> {
        match self.primary.authenticate(credentials).await {
            Err(BackendError::Unavailable(reason)) => {
                warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    %reason,
                    "Primary auth backend unavailable, falling back"
                );
                self.fallback.authenticate(credentials).await
            }
            other => other,
        }
    }

    async fn revoke(&self, token: &str) -> Result<(), BackendError> {
        if token.starts_with(LOCAL_TOKEN_PREFIX) {
            return self.fallback.revoke(token).await;
        }
        self.primary.revoke(token).await
    }
}

/// Build the backend selected by `config.backend`
pub fn backend_from_config(config: &Config) -> Result<Arc<dyn AuthBackend>> {
    let backend: Arc<dyn AuthBackend> = match config.backend {
        BackendMode::Remote => Arc::new(ApiClient::from_config(config)?),
        BackendMode::Local => Arc::new(LocalBackend::new(config.local_users.clone())),
        BackendMode::RemoteWithLocalFallback => Arc::new(FallbackBackend::new(
            Arc::new(ApiClient::from_config(config)?),
            Arc::new(LocalBackend::new(config.local_users.clone())),
        )),
    };
    debug!(backend = backend.name(), "Auth backend configured");
    Ok(backend)
}
