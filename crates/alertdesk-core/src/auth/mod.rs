//! Authentication, session persistence and account lockout.
//!
//! `Authenticator` is the entry point: it validates credentials, enforces
//! the lockout policy, talks to the configured `AuthBackend`, persists the
//! resulting `Session` and records every security-relevant step in the
//! audit log.

pub mod authenticator;
pub mod backend;
pub mod credentials;
pub mod error;
pub mod lockout;
pub mod session;

pub use authenticator::{Authenticator, LoginOutcome};
pub use backend::{backend_from_config, AuthBackend, AuthGrant, FallbackBackend, LocalBackend};
pub use credentials::Credentials;
pub use error::{AuthError, BackendError};
pub use lockout::{FailedAttemptRecord, FailureOutcome, LockState, LockoutTracker};
pub use session::{Session, SessionStore};
