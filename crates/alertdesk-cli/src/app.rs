//! Command handlers.
//!
//! `App` wires the configuration, the file-backed store and the
//! authenticator together and implements each CLI command on top of them.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use alertdesk_core::auth::{backend_from_config, LockState};
use alertdesk_core::utils::{format_minutes, minutes_until};
use alertdesk_core::{
    AuthError, Authenticator, Clock, Config, FileStore, InactivityMonitor, Interaction,
    MonitorEvent, SecurityPolicy, SystemClock,
};

/// Line typed during `watch` that ends the session
const LOGOUT_COMMAND: &str = "logout";

/// Login errors that send the user back to the prompt instead of exiting
fn reprompts(error: &AuthError) -> bool {
    error.is_retryable() || matches!(error, AuthError::MissingCredentials)
}

pub struct App {
    config: Config,
    auth: Arc<Authenticator>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let store = FileStore::new(config.data_dir()?)?;
        debug!(data_dir = %store.dir().display(), "Data directory configured");

        let backend = backend_from_config(&config).context("Failed to set up auth backend")?;
        let auth = Authenticator::new(
            backend,
            Arc::new(store),
            Arc::new(SystemClock),
            SecurityPolicy::default(),
        );

        Ok(Self {
            config,
            auth: Arc::new(auth),
        })
    }

    /// Prompt for credentials and log in. Blank input, wrong passwords and
    /// network failures re-prompt until the login succeeds or the account
    /// locks.
    pub async fn login_interactive(&mut self, username: Option<String>) -> Result<()> {
        if let Some(session) = self.auth.restore().await {
            println!("Already logged in as {}.", session.username);
            return Ok(());
        }

        println!("\n=== alertdesk Login ===\n");

        let mut username = match username {
            Some(u) => u,
            None => self.prompt_username()?,
        };

        loop {
            if username.trim().is_empty() {
                username = self.prompt_username()?;
            }
            let password = rpassword::prompt_password("Password: ")?;
            println!("\nAuthenticating...");

            match self.auth.login(&username, &password).await {
                Ok(outcome) => {
                    self.config.last_username = Some(outcome.session.username.clone());
                    if let Err(e) = self.config.save() {
                        warn!(error = %e, "Failed to save config");
                    }
                    println!("{}\n", outcome.message);
                    return Ok(());
                }
                Err(e) if reprompts(&e) => {
                    println!("{}\n", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn prompt_username(&self) -> Result<String> {
        match self.config.last_username {
            Some(ref last_user) => print!("Username [{}]: ", last_user),
            None => print!("Username: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        match (input.is_empty(), &self.config.last_username) {
            (true, Some(last_user)) => Ok(last_user.clone()),
            _ => Ok(input.to_string()),
        }
    }

    pub async fn logout(&self) -> Result<()> {
        match self.auth.current_session() {
            Some(session) => {
                self.auth.logout(&session.username).await;
                println!("Logged out {}.", session.username);
            }
            None => println!("Not logged in."),
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<()> {
        println!("Backend: {}", self.auth.backend_name());

        match self.auth.restore().await {
            Some(session) => {
                let now = self.auth.clock().now();
                let timeout = self.auth.policy().inactivity_timeout;
                println!("Logged in as {}", session.username);
                println!(
                    "Session ends after {} more of inactivity",
                    format_minutes(session.minutes_until_idle_timeout(now, timeout))
                );
            }
            None => println!("Not logged in."),
        }

        if let Some(ref username) = self.config.last_username {
            match self.auth.lock_state(username) {
                LockState::Locked { until } => println!(
                    "Account {} is locked for {}",
                    username,
                    format_minutes(minutes_until(until, self.auth.clock().now()).max(1))
                ),
                LockState::Unlocked { failed_attempts } if failed_attempts > 0 => println!(
                    "Account {}: {} failed attempt(s) of {}",
                    username,
                    failed_attempts,
                    self.auth.policy().max_failed_attempts
                ),
                LockState::Unlocked { .. } => {}
            }
        }
        Ok(())
    }

    /// Print the newest `limit` audit entries, oldest first
    pub fn print_audit(&self, limit: usize) {
        let entries = self.auth.audit().read_all();
        if entries.is_empty() {
            println!("No audit events recorded.");
            return;
        }
        let skip = entries.len().saturating_sub(limit);
        println!(
            "Showing {} of {} events (the newest {} are kept)\n",
            entries.len() - skip,
            entries.len(),
            self.auth.audit().capacity()
        );
        for event in entries.iter().skip(skip) {
            println!("{}", event.to_log_line());
        }
    }

    /// Hold the session open under the inactivity monitor until it expires,
    /// stdin closes or the user types `logout`.
    pub async fn watch(&self) -> Result<()> {
        let session = self.auth.restore().await.ok_or(AuthError::SessionRevoked)?;
        println!(
            "Watching session for {}. It ends after {} without input; type '{}' to log out.",
            session.username,
            format_minutes(self.auth.policy().inactivity_timeout.num_minutes()),
            LOGOUT_COMMAND
        );

        let mut handle = InactivityMonitor::new(self.auth.clone()).start();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        let logout_requested = loop {
            tokio::select! {
                event = handle.next_event() => {
                    match event {
                        Some(MonitorEvent::Expired { username }) => {
                            println!(
                                "Session for {} expired due to inactivity. Please log in again.",
                                username
                            );
                        }
                        Some(MonitorEvent::SessionEnded) | None => println!("Session ended."),
                    }
                    break false;
                }
                line = lines.next_line() => {
                    match line.context("Failed to read from stdin")? {
                        Some(line) if line.trim().eq_ignore_ascii_case(LOGOUT_COMMAND) => {
                            break true
                        }
                        Some(_) => {
                            if !handle.interaction(Interaction::KeyPress) {
                                debug!("Activity signal dropped");
                            }
                        }
                        None => break false,
                    }
                }
            }
        };

        handle.stop().await;
        if logout_requested {
            self.auth.logout(&session.username).await;
            println!("Logged out {}.", session.username);
        }
        Ok(())
    }
}
