//! Error types for the reconciler crate.

use std::fmt;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone)]
pub enum Error {
    /// A chat platform call failed.
    Platform { operation: String, reason: String },
    /// A platform object the document points at does not exist.
    NotFound { kind: &'static str, id: String },
    /// The spreadsheet service failed.
    Sheet { reason: String },
    /// Writing back to the hunt document failed.
    Document(belle_model::Error),
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform { operation, reason } => {
                write!(f, "platform call '{operation}' failed: {reason}")
            }
            Self::NotFound { kind, id } => {
                write!(f, "{kind} '{id}' not found")
            }
            Self::Sheet { reason } => {
                write!(f, "spreadsheet call failed: {reason}")
            }
            Self::Document(err) => {
                write!(f, "document edit failed: {err}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Document(err) => Some(err),
            _ => None,
        }
    }
}

impl From<belle_model::Error> for Error {
    fn from(err: belle_model::Error) -> Self {
        Self::Document(err)
    }
}

impl Error {
    /// Create a platform error.
    pub fn platform(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Platform {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a spreadsheet error.
    pub fn sheet(reason: impl Into<String>) -> Self {
        Self::Sheet {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this error came from a document edit.
    pub fn is_document(&self) -> bool {
        matches!(self, Self::Document(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let operation = err
            .url()
            .map_or_else(|| "request".to_string(), |url| url.path().to_string());
        Self::platform(operation, err.to_string())
    }
}
