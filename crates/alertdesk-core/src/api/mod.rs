//! REST API client module for the notification backend.
//!
//! This module provides:
//! - `ApiClient`: login/logout against the auth endpoints, and the shared
//!   request machinery (bearer header, 429 backoff, status mapping)
//! - `AuthorizedClient`: the authenticated-fetch wrapper used by the
//!   template, alert-rule and notification screens. It attaches the current
//!   session token and ends the session when the server rejects it.

pub mod authorized;
pub mod client;
pub mod error;

pub use authorized::AuthorizedClient;
pub use client::ApiClient;
pub use error::ApiError;
