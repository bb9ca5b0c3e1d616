//! Error types for the courier broker

use thiserror::Error;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the courier broker
#[derive(Debug, Error)]
pub enum Error {
    /// No device matched the selector (unknown id, or no fresh device for "last")
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// No action is known under this identifier
    #[error("action not found: {0}")]
    ActionNotFound(String),

    /// Sync/push exchange presented a missing or mismatched token
    #[error("authentication rejected")]
    AuthRejected,

    /// A wait elapsed without a result. Normal outcome, not a fault; the
    /// action stays live and its result remains retrievable later.
    #[error("timed out waiting for action {0}")]
    Timeout(String),

    /// Action payload is missing required fields for its kind
    #[error("validation failed: {0}")]
    Validation(String),

    /// The device executed the action and reported failure; propagated
    /// verbatim, never retried by the broker
    #[error("device reported failure: {error}")]
    DeviceFailure {
        error: String,
        trace: Option<String>,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error is the normal wait-expired outcome
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
