//! Error types for the blacklist system
//!
//! Storage failures are kept separate from request validation failures so the
//! sweeper can log the former and carry on, while the latter go back to whoever
//! issued the request.

use crate::blacklist::RuleId;
use thiserror::Error;

/// Errors raised by a durable rule store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// No row with this id exists
    #[error("Rule not found: {0}")]
    NotFound(RuleId),
}

/// Errors that can occur while managing blacklist rules
#[derive(Debug, Error)]
pub enum BlacklistError {
    /// Malformed `key:value` token in an administrative request
    #[error("Invalid syntax near {token:?}, {reason}")]
    Syntax { token: String, reason: &'static str },

    /// The named command is not registered
    #[error("Invalid `command`: {0:?}. No such command exists")]
    UnknownCommand(String),

    /// The `expires:` value is neither `never` nor a duration
    #[error("Invalid `expires`: {0:?}, not a valid duration")]
    InvalidDuration(String),

    #[error("No command provided")]
    MissingCommand,

    #[error("No user provided")]
    MissingUser,

    /// Global scope, every user and every command at once
    #[error("A rule must target a user, a channel or a command")]
    Unrestricted,

    #[error("Failed to find user: {0}")]
    UserNotFound(String),

    #[error("Found multiple users possible with name {0}")]
    AmbiguousUser(String),

    #[error("Failed to find channel: {0}")]
    ChannelNotFound(String),

    #[error("Found multiple channels possible with name {0}")]
    AmbiguousChannel(String),

    /// A non-owner tried to manage rules beyond their own channel
    #[error("Only bot owners can manage blacklist rules outside this server: {0}")]
    OutOfScope(String),

    /// The command is already on the channel's block list
    #[error("Command {0} is already blacklisted here")]
    AlreadyBlocked(String),

    /// The command is not on the channel's block list
    #[error("Cannot unblacklist command {0} that isn't blacklisted here")]
    NotBlocked(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl BlacklistError {
    /// Create a syntax error for the offending token
    pub fn syntax(token: impl Into<String>, reason: &'static str) -> Self {
        Self::Syntax {
            token: token.into(),
            reason,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for blacklist operations
pub type BlacklistResult<T> = Result<T, BlacklistError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BlacklistError::syntax("userbob", "no \":\" in option");
        assert_eq!(
            error.to_string(),
            "Invalid syntax near \"userbob\", no \":\" in option"
        );

        assert_eq!(BlacklistError::MissingUser.to_string(), "No user provided");
        assert_eq!(
            BlacklistError::ChannelNotFound("foo".to_string()).to_string(),
            "Failed to find channel: foo"
        );

        let error = BlacklistError::from(StoreError::NotFound(7));
        assert_eq!(error.to_string(), "Storage error: Rule not found: 7");
    }
}
