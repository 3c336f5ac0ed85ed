//! Unified error hierarchy for Vigor
//!
//! Extraction failures are typed absences: callers turn them into missing
//! metrics. Provider, storage and timeout failures propagate to the sync
//! orchestrator and from there to the caller.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Top-level error type for all Vigor operations
#[derive(Debug, Error)]
pub enum VigorError {
    /// Upstream data provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Store operation errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Signal extraction errors surfaced as a hard failure
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller-imposed deadline elapsed
    #[error("Sync timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by physiological data providers and cloud APIs
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network or transport failure while fetching
    #[error("Fetch from {provider} failed: {reason}")]
    Fetch { provider: String, reason: String },

    /// Payload could not be decoded
    #[error("Could not parse {provider} payload: {reason}")]
    Parse { provider: String, reason: String },

    /// Provider is not reachable or not configured
    #[error("Provider unavailable: {provider}")]
    Unavailable { provider: String },
}

/// Reasons a physiological value could not be extracted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    /// Too few usable samples
    #[error("Insufficient data for {metric}: need {required}, found {found}")]
    InsufficientData {
        metric: &'static str,
        required: usize,
        found: usize,
    },

    /// Neither the sleep window nor the nocturnal window held any samples
    #[error("No {metric} samples in the selected window")]
    EmptyWindow { metric: &'static str },

    /// Interval boundaries are inverted or empty
    #[error("Invalid range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Extracted value falls outside its plausible range
    #[error("{metric} value {value} is out of range")]
    OutOfRange { metric: &'static str, value: f64 },
}

/// Store operation errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result type alias for Vigor operations
pub type Result<T> = std::result::Result<T, VigorError>;

impl VigorError {
    /// Check if the failed operation can simply be run again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VigorError::Provider(ProviderError::Fetch { .. })
                | VigorError::Provider(ProviderError::Unavailable { .. })
                | VigorError::Timeout { .. }
                | VigorError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            VigorError::Extraction(_) => ErrorSeverity::Info,
            VigorError::Provider(ProviderError::Fetch { .. }) => ErrorSeverity::Warning,
            VigorError::Timeout { .. } => ErrorSeverity::Warning,
            VigorError::Validation(_) => ErrorSeverity::Warning,
            VigorError::Database(DatabaseError::Corrupt(_)) => ErrorSeverity::Critical,
            VigorError::Database(DatabaseError::LockPoisoned) => ErrorSeverity::Critical,
            VigorError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            VigorError::Provider(ProviderError::Fetch { provider, .. }) => {
                format!(
                    "Could not reach {}. Your existing scores are unchanged; try syncing again.",
                    provider
                )
            }
            VigorError::Provider(ProviderError::Parse { provider, .. }) => {
                format!("{} returned data Vigor could not read.", provider)
            }
            VigorError::Timeout { millis } => {
                format!(
                    "Sync did not finish within {:.1} seconds. It is safe to run it again.",
                    *millis as f64 / 1000.0
                )
            }
            VigorError::Database(DatabaseError::Sqlite(_)) => {
                "Unable to access the local database. Please check your data directory.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Store integrity is in question
    Critical,
    /// Operation failed
    Error,
    /// Operation failed but may succeed on retry
    Warning,
    /// Expected degradation, e.g. a metric that could not be extracted
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
