//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the backend endpoints, the authentication backend mode,
//! and the last used username.
//!
//! Configuration is stored at `~/.config/alertdesk/config.json`. Endpoint,
//! backend and data directory settings can be overridden from the
//! environment (`ALERTDESK_AUTH_URL`, `ALERTDESK_API_URL`,
//! `ALERTDESK_BACKEND`, `ALERTDESK_DATA_DIR`).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data directory paths
const APP_NAME: &str = "alertdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_AUTH_BASE_URL: &str = "http://localhost:8080/api/auth";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Consecutive failed logins before an account is locked
pub const MAX_FAILED_ATTEMPTS: u32 = 3;

/// Lockout window in minutes
pub const LOCKOUT_MINUTES: i64 = 15;

/// Idle time in minutes before a session is forcibly terminated
pub const INACTIVITY_TIMEOUT_MINUTES: i64 = 15;

/// How often the inactivity monitor checks the session
pub const INACTIVITY_POLL_SECS: u64 = 60;

/// Audit entries retained; older entries are evicted first
pub const AUDIT_LOG_CAPACITY: usize = 100;

/// Which authentication backend(s) to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Remote REST backend only
    #[default]
    Remote,
    /// Local mock user table only
    Local,
    /// Remote first; local table only when the remote cannot be reached
    RemoteWithLocalFallback,
}

impl FromStr for BackendMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(BackendMode::Remote),
            "local" => Ok(BackendMode::Local),
            "remote_with_local_fallback" | "fallback" => Ok(BackendMode::RemoteWithLocalFallback),
            other => Err(anyhow::anyhow!("Unknown backend mode: {}", other)),
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Remote => write!(f, "remote"),
            BackendMode::Local => write!(f, "local"),
            BackendMode::RemoteWithLocalFallback => write!(f, "remote_with_local_fallback"),
        }
    }
}

/// Lockout, inactivity and retention limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub max_failed_attempts: u32,
    pub lockout_duration: Duration,
    pub inactivity_timeout: Duration,
    pub poll_interval: std::time::Duration,
    pub audit_capacity: usize,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: MAX_FAILED_ATTEMPTS,
            lockout_duration: Duration::minutes(LOCKOUT_MINUTES),
            inactivity_timeout: Duration::minutes(INACTIVITY_TIMEOUT_MINUTES),
            poll_interval: std::time::Duration::from_secs(INACTIVITY_POLL_SECS),
            audit_capacity: AUDIT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth_base_url: String,
    pub api_base_url: String,
    pub backend: BackendMode,
    /// Username → password table for the local backend
    pub local_users: HashMap<String, String>,
    pub last_username: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            backend: BackendMode::default(),
            local_users: HashMap::new(),
            last_username: None,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding session state and the audit log
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ALERTDESK_AUTH_URL") {
            self.auth_base_url = url;
        }
        if let Some(url) = lookup("ALERTDESK_API_URL") {
            self.api_base_url = url;
        }
        if let Some(mode) = lookup("ALERTDESK_BACKEND") {
            match mode.parse() {
                Ok(mode) => self.backend = mode,
                Err(e) => warn!(error = %e, "Ignoring ALERTDESK_BACKEND"),
            }
        }
        if let Some(dir) = lookup("ALERTDESK_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_constants() {
        let policy = SecurityPolicy::default();
        assert_eq!(policy.max_failed_attempts, 3);
        assert_eq!(policy.lockout_duration, Duration::minutes(15));
        assert_eq!(policy.inactivity_timeout, Duration::minutes(15));
        assert_eq!(policy.poll_interval.as_secs(), 60);
        assert_eq!(policy.audit_capacity, 100);
    }

    #[test]
    fn test_backend_mode_parse() {
        assert_eq!("remote".parse::<BackendMode>().unwrap(), BackendMode::Remote);
        assert_eq!("LOCAL".parse::<BackendMode>().unwrap(), BackendMode::Local);
        assert_eq!(
            "remote_with_local_fallback".parse::<BackendMode>().unwrap(),
            BackendMode::RemoteWithLocalFallback
        );
        assert!("carrier-pigeon".parse::<BackendMode>().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "ALERTDESK_AUTH_URL" => Some("https://auth.example.com".to_string()),
            "ALERTDESK_BACKEND" => Some("local".to_string()),
            "ALERTDESK_DATA_DIR" => Some("/tmp/alertdesk".to_string()),
            _ => None,
        });
        assert_eq!(config.auth_base_url, "https://auth.example.com");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.backend, BackendMode::Local);
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/alertdesk"));
    }

    #[test]
    fn test_bad_backend_override_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| {
            (name == "ALERTDESK_BACKEND").then(|| "bogus".to_string())
        });
        assert_eq!(config.backend, BackendMode::Remote);
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"backend": "local"}"#).unwrap();
        assert_eq!(config.backend, BackendMode::Local);
        assert_eq!(config.auth_base_url, DEFAULT_AUTH_BASE_URL);
        assert!(config.local_users.is_empty());
    }
}
