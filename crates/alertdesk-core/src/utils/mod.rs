//! Utility functions for string formatting and manipulation.

pub mod format;

pub use format::{format_minutes, minutes_until, truncate};
