//! alertdesk core library.
//!
//! Session layer of the alertdesk operator console:
//! - `auth`: credential validation, account lockout, session persistence
//!   and the pluggable authentication backends
//! - `monitor`: background inactivity monitor that ends idle sessions
//! - `audit`: bounded, persisted security audit log
//! - `api`: REST client for the notification backend
//! - `storage`: the key-value store all of the above persist into

pub mod api;
pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod monitor;
pub mod storage;
pub mod utils;

pub use audit::{AuditEvent, AuditEventKind, AuditLog};
pub use auth::{AuthError, Authenticator, LoginOutcome, Session};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackendMode, Config, SecurityPolicy};
pub use monitor::{InactivityMonitor, Interaction, MonitorEvent, MonitorHandle};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
