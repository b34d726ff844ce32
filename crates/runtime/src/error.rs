//! Error types for the runtime crate.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Editing or opening the hunt document failed.
    #[error("document error: {0}")]
    Document(#[from] belle_model::Error),

    /// A chat platform or spreadsheet call failed.
    #[error("platform error: {0}")]
    Platform(#[from] belle_reconciler::Error),

    /// The pinned hunt context could not be read.
    #[error("invalid hunt context: {reason}")]
    InvalidContext { reason: String },

    /// The bot is not a member of the guild.
    #[error("guild '{guild_id}' is not available")]
    GuildUnavailable { guild_id: String },

    /// The document cache has been shut down.
    #[error("document cache is shut down")]
    CacheShutdown,

    /// A validation pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A session's work queue stopped before answering.
    #[error("work queue for document '{document_id}' is closed")]
    QueueClosed { document_id: String },
}

impl Error {
    /// Create an invalid context error.
    pub fn invalid_context(reason: impl Into<String>) -> Self {
        Self::InvalidContext {
            reason: reason.into(),
        }
    }

    /// Create a guild unavailable error.
    pub fn guild_unavailable(guild_id: impl Into<String>) -> Self {
        Self::GuildUnavailable {
            guild_id: guild_id.into(),
        }
    }

    /// Create a queue closed error.
    pub fn queue_closed(document_id: impl Into<String>) -> Self {
        Self::QueueClosed {
            document_id: document_id.into(),
        }
    }

    /// Whether the error came from a document edit.
    pub fn is_document(&self) -> bool {
        match self {
            Self::Document(_) => true,
            Self::Platform(err) => err.is_document(),
            _ => false,
        }
    }
}
