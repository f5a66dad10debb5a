//! Inactivity monitor.
//!
//! While a session is active a background task polls it on a fixed
//! interval. Interaction signals sent through the `MonitorHandle` refresh
//! the session's activity timestamp; a session left idle past the policy
//! timeout is ended through the `Authenticator` and reported to the caller.
//!
//! The task is owned by its handle. `stop()` shuts it down cleanly and
//! dropping the handle aborts it, so a login/logout cycle never leaves a
//! poller behind.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::auth::Authenticator;

/// Buffer size for the interaction and event channels
const CHANNEL_BUFFER_SIZE: usize = 32;

/// User interaction that counts as activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    PointerPress,
    KeyPress,
    Scroll,
    PointerMove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The session timed out and was ended; the caller should return to login
    Expired { username: String },
    /// The session is gone (logged out elsewhere)
    SessionEnded,
}

pub struct InactivityMonitor {
    auth: Arc<Authenticator>,
}

impl InactivityMonitor {
    pub fn new(auth: Arc<Authenticator>) -> Self {
        Self { auth }
    }

    /// One poll: `None` while the session is alive and recently used.
    pub async fn check(&self) -> Option<MonitorEvent> {
        let Some(session) = self.auth.current_session() else {
            return Some(MonitorEvent::SessionEnded);
        };

        let now = self.auth.clock().now();
        let timeout = self.auth.policy().inactivity_timeout;
        if !session.is_idle_expired(now, timeout) {
            trace!(
                username = %session.username,
                idle_secs = session.idle_for(now).num_seconds(),
                "Session active"
            );
            return None;
        }

        info!(username = %session.username, "Session idle past timeout");
        match self.auth.expire_session(&self.auth.idle_expiry_reason()).await {
            Some(username) => Some(MonitorEvent::Expired { username }),
            // Cleared concurrently by a manual logout
            None => Some(MonitorEvent::SessionEnded),
        }
    }

    /// Spawn the polling task. The first poll runs immediately.
    pub fn start(self) -> MonitorHandle {
        let (activity_tx, mut activity_rx) = mpsc::channel::<Interaction>(CHANNEL_BUFFER_SIZE);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let poll_interval = self.auth.policy().poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Inactivity monitor stopped");
                        break;
                    }
                    Some(kind) = activity_rx.recv() => {
                        trace!(?kind, "Activity");
                        self.auth.record_activity();
                    }
                    _ = ticker.tick() => {
                        if let Some(event) = self.check().await {
                            let _ = event_tx.send(event).await;
                            break;
                        }
                    }
                }
            }
        });

        MonitorHandle {
            activity_tx,
            events: event_rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Owner of a running monitor task
pub struct MonitorHandle {
    activity_tx: mpsc::Sender<Interaction>,
    events: mpsc::Receiver<MonitorEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Report user activity. Returns false if the signal was dropped because
    /// the buffer is full or the monitor has already finished; a pending
    /// signal refreshes the timestamp just as well.
    pub fn interaction(&self, kind: Interaction) -> bool {
        self.activity_tx.try_send(kind).is_ok()
    }

    /// Wait for the monitor to report the end of the session.
    /// Returns `None` once the monitor stopped without an event.
    pub async fn next_event(&mut self) -> Option<MonitorEvent> {
        self.events.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Shut the task down and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
