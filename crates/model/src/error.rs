//! Error types for document edits and lookups.

use thiserror::Error;

use crate::snapshot::NodeId;

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the replicated document and the hunt model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The document handle was disposed and can no longer be edited.
    #[error("document '{document_id}' is detached")]
    Detached { document_id: String },

    /// An edit referenced a node that does not exist in the snapshot.
    #[error("node '{node_id}' not found")]
    NodeNotFound { node_id: NodeId },

    /// An edit tried to insert a node id that is already present.
    #[error("node '{node_id}' already exists")]
    DuplicateNode { node_id: NodeId },

    /// An edit would break the tree shape (cycle, root removal).
    #[error("invalid edit: {reason}")]
    InvalidEdit { reason: String },

    /// The document service has no document with this id.
    #[error("document '{document_id}' not found")]
    DocumentNotFound { document_id: String },

    /// A typed accessor expected a node of a different kind.
    #[error("node '{node_id}' is not a {expected}")]
    WrongKind {
        node_id: NodeId,
        expected: &'static str,
    },
}

impl Error {
    /// Create a detached document error.
    pub fn detached(document_id: impl Into<String>) -> Self {
        Self::Detached {
            document_id: document_id.into(),
        }
    }

    /// Create a node not found error.
    pub fn node_not_found(node_id: &NodeId) -> Self {
        Self::NodeNotFound {
            node_id: node_id.clone(),
        }
    }

    /// Create an invalid edit error.
    pub fn invalid_edit(reason: impl Into<String>) -> Self {
        Self::InvalidEdit {
            reason: reason.into(),
        }
    }

    /// Create a document not found error.
    pub fn document_not_found(document_id: impl Into<String>) -> Self {
        Self::DocumentNotFound {
            document_id: document_id.into(),
        }
    }

    /// Create a wrong kind error.
    pub fn wrong_kind(node_id: &NodeId, expected: &'static str) -> Self {
        Self::WrongKind {
            node_id: node_id.clone(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_the_node() {
        let err = Error::node_not_found(&NodeId::new("n-1"));
        assert!(err.to_string().contains("n-1"));

        let err = Error::wrong_kind(&NodeId::new("n-2"), "puzzle");
        assert_eq!(err.to_string(), "node 'n-2' is not a puzzle");
    }
}
