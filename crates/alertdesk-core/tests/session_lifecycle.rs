//! End-to-end session behaviour over a file-backed store.

use std::collections::HashMap;
use std::sync::Arc;

use alertdesk_core::api::ApiClient;
use alertdesk_core::auth::{FallbackBackend, LocalBackend, LockState};
use alertdesk_core::{
    AuditEventKind, AuthError, Authenticator, Clock, FileStore, InactivityMonitor, KeyValueStore,
    ManualClock, MonitorEvent, SecurityPolicy,
};
use chrono::Duration;
use tempfile::TempDir;

fn users() -> HashMap<String, String> {
    let mut users = HashMap::new();
    users.insert("alice".to_string(), "correct horse".to_string());
    users.insert("bob".to_string(), "battery staple".to_string());
    users
}

fn authenticator(dir: &TempDir, clock: Arc<ManualClock>) -> Authenticator {
    let store = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
    Authenticator::new(
        Arc::new(LocalBackend::new(users())),
        store,
        clock,
        SecurityPolicy::default(),
    )
}

#[tokio::test]
async fn session_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());

    let token = {
        let auth = authenticator(&dir, clock.clone());
        let outcome = auth.login("alice", "correct horse").await.unwrap();
        assert!(outcome.session.token.starts_with("local-"));
        assert_eq!(outcome.session.token.len(), "local-".len() + 32);
        outcome.session.token
    };

    clock.advance(Duration::minutes(5));
    let auth = authenticator(&dir, clock.clone());
    let restored = auth.restore().await.unwrap();
    assert_eq!(restored.username, "alice");
    assert_eq!(restored.token, token);
}

#[tokio::test]
async fn stale_session_is_expired_on_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    authenticator(&dir, clock.clone())
        .login("alice", "correct horse")
        .await
        .unwrap();

    clock.advance(Duration::minutes(30));
    let auth = authenticator(&dir, clock.clone());
    assert!(auth.restore().await.is_none());
    assert!(!auth.sessions().is_authenticated());

    let kinds: Vec<_> = auth.audit().read_all().into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![AuditEventKind::LoginSuccess, AuditEventKind::SessionExpired]);
}

#[tokio::test]
async fn lockout_survives_restart_and_is_per_user() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());

    {
        let auth = authenticator(&dir, clock.clone());
        for _ in 0..3 {
            let _ = auth.login("alice", "wrong").await;
        }
    }

    let auth = authenticator(&dir, clock.clone());
    let err = auth.login("alice", "correct horse").await.unwrap_err();
    assert!(matches!(err, AuthError::AccountLocked { minutes_remaining: 15 }));

    // Other accounts are unaffected
    auth.login("bob", "battery staple").await.unwrap();

    clock.advance(Duration::minutes(16));
    assert_eq!(auth.lock_state("alice"), LockState::Unlocked { failed_attempts: 0 });
    auth.login("alice", "correct horse").await.unwrap();
}

#[tokio::test]
async fn audit_log_keeps_latest_hundred() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let auth = authenticator(&dir, clock.clone());

    for i in 0..60 {
        auth.login("bob", "battery staple").await.unwrap();
        auth.logout("bob").await;
        clock.advance(Duration::seconds(i));
    }

    let entries = auth.audit().read_all();
    assert_eq!(entries.len(), 100);
    assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(entries.last().map(|e| e.kind), Some(AuditEventKind::Logout));
    assert!(entries.iter().all(|e| e.client_id.starts_with("alertdesk/")));
}

#[tokio::test]
async fn fallback_engages_only_when_remote_is_down() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
    // Nothing listens on port 9
    let remote = ApiClient::new("http://127.0.0.1:9/auth", "http://127.0.0.1:9/api").unwrap();
    let backend = FallbackBackend::new(Arc::new(remote), Arc::new(LocalBackend::new(users())));
    let auth = Authenticator::new(
        Arc::new(backend),
        store.clone(),
        Arc::new(ManualClock::default()),
        SecurityPolicy::default(),
    );

    let outcome = auth.login("alice", "correct horse").await.unwrap();
    assert!(outcome.session.token.starts_with("local-"));

    // A local rejection still counts
    let err = auth.login("bob", "nope").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials { remaining_attempts: 2 });

    auth.logout("alice").await;
    assert!(store.get("session_token").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn monitor_ends_idle_file_backed_session() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(authenticator(&dir, clock.clone()));
    auth.login("alice", "correct horse").await.unwrap();

    let mut handle = InactivityMonitor::new(auth.clone()).start();
    clock.advance(Duration::minutes(15) + Duration::seconds(1));

    assert_eq!(
        handle.next_event().await,
        Some(MonitorEvent::Expired { username: "alice".into() })
    );

    // A fresh instance over the same directory sees the cleared session
    let reopened = authenticator(&dir, clock.clone());
    assert!(reopened.current_session().is_none());
    assert!(clock.now() > reopened.audit().read_all()[0].timestamp);
}
