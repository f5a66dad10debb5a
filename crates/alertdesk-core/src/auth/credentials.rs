use std::fmt;

use super::AuthError;

/// Maximum length for a username.
/// Operator usernames are short handles or email addresses.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Maximum length for a password.
/// 128 chars accommodates password managers and passphrases.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Login credentials. Never persisted.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials, trimming the username and validating both fields
    pub fn new(username: &str, password: &str) -> Result<Self, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if username.chars().count() > MAX_USERNAME_LENGTH {
            return Err(AuthError::InvalidInput(format!(
                "Username must be at most {} characters",
                MAX_USERNAME_LENGTH
            )));
        }
        if password.chars().count() > MAX_PASSWORD_LENGTH {
            return Err(AuthError::InvalidInput(format!(
                "Password must be at most {} characters",
                MAX_PASSWORD_LENGTH
            )));
        }
        if !username.chars().all(is_valid_input_char)
            || !password.chars().all(is_valid_input_char)
        {
            return Err(AuthError::InvalidInput(
                "Credentials contain control characters".to_string(),
            ));
        }
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

// Keep the password out of debug output and logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Check if a character is valid for input (no control characters)
fn is_valid_input_char(c: char) -> bool {
    !c.is_control()
}
