use thiserror::Error;
use tracing::{error, warn};

/// Domain errors for the marketplace sync engine.
///
/// `Display` preserves the raw diagnostic message; `user_message()` renders
/// the classified, human-readable string the UI shows next to a retry
/// affordance.
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("network unreachable: {message}")]
    NetworkUnavailable { message: String },

    #[error("marketplace unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("request timed out: {message}")]
    Timeout { message: String },

    #[error("validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("no local script with id '{id}'")]
    NotFound { id: String },

    #[error("download already in progress for '{id}'")]
    AlreadyInProgress { id: String },

    #[error("store error: {message}")]
    Store { message: String },
}

impl MarketError {
    pub fn network(message: impl Into<String>) -> Self {
        MarketError::NetworkUnavailable {
            message: message.into(),
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        MarketError::ServiceUnavailable {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        MarketError::Timeout {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        MarketError::Store {
            message: message.into(),
        }
    }

    /// Human-readable message for display. Distinguishes network-unreachable,
    /// service-unavailable and timeout cases; the raw message stays available
    /// through `Display` for diagnostics.
    pub fn user_message(&self) -> String {
        match self {
            MarketError::NetworkUnavailable { .. } => {
                "Can't reach the marketplace. Check your connection and try again.".to_string()
            }
            MarketError::ServiceUnavailable { .. } => {
                "The marketplace is temporarily unavailable. Try again in a moment.".to_string()
            }
            MarketError::Timeout { .. } => {
                "The marketplace took too long to respond. Try again.".to_string()
            }
            MarketError::ValidationFailed { message } => message.clone(),
            MarketError::NotFound { id } => format!("Script '{}' no longer exists", id),
            MarketError::AlreadyInProgress { id } => {
                format!("'{}' is already downloading", id)
            }
            MarketError::Store { .. } => "Couldn't save to the local library.".to_string(),
        }
    }
}

impl From<rusqlite::Error> for MarketError {
    fn from(err: rusqlite::Error) -> Self {
        MarketError::store(err.to_string())
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        MarketError::store(err.to_string())
    }
}

impl From<std::io::Error> for MarketError {
    fn from(err: std::io::Error) -> Self {
        MarketError::store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and the failure is converted to
/// state rather than propagated.
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}
