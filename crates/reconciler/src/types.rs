//! Core types for the reconciler.

use belle_core::{ChannelId, RoleId};
use belle_model::NodeId;
use serde::{Deserialize, Serialize};

/// Which kind of hunt node an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Round,
    Puzzle,
}

/// Actions the reconciler can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// Delete the chat resources of a node that left the document.
    RemoveAssociation {
        node_id: NodeId,
        channel_id: ChannelId,
        role_id: RoleId,
        index_channel_id: Option<ChannelId>,
    },
    /// Create a spreadsheet for a puzzle and record it.
    CreateSheet { puzzle_id: NodeId },
    /// Create a node's role and channels and record them.
    CreateAssociation {
        node_id: NodeId,
        kind: NodeKind,
        /// Number of enclosing rounds; shallower rounds are created first.
        depth: usize,
    },
    /// Rewrite a node's channel overwrites if they drifted.
    SyncPermissions { node_id: NodeId },
    /// Bring channel names, placement and pinned info in line.
    SyncChannel { node_id: NodeId },
}

impl ReconcileAction {
    /// Get the node this action targets.
    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::RemoveAssociation { node_id, .. }
            | Self::CreateAssociation { node_id, .. }
            | Self::SyncPermissions { node_id }
            | Self::SyncChannel { node_id } => node_id,
            Self::CreateSheet { puzzle_id } => puzzle_id,
        }
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::RemoveAssociation { node_id, .. } => {
                format!("remove chat resources of {node_id}")
            }
            Self::CreateSheet { puzzle_id } => {
                format!("create spreadsheet for {puzzle_id}")
            }
            Self::CreateAssociation { node_id, kind, .. } => {
                format!("create chat resources for {kind:?} {node_id}")
            }
            Self::SyncPermissions { node_id } => {
                format!("sync permissions of {node_id}")
            }
            Self::SyncChannel { node_id } => {
                format!("sync channel of {node_id}")
            }
        }
    }
}

/// Outcome of reconciling one notification or one full resync.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Actions that were taken.
    pub actions_taken: Vec<ReconcileAction>,
    /// Actions that failed, with the reason.
    pub actions_failed: Vec<(ReconcileAction, String)>,
}

impl ReconcileReport {
    /// Create a new reconcile report.
    pub fn new(
        actions_taken: Vec<ReconcileAction>,
        actions_failed: Vec<(ReconcileAction, String)>,
    ) -> Self {
        Self {
            actions_taken,
            actions_failed,
        }
    }

    /// Check if all actions succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.actions_failed.is_empty()
    }

    /// Nothing needed doing.
    pub fn is_noop(&self) -> bool {
        self.actions_taken.is_empty() && self.actions_failed.is_empty()
    }

    /// Append another report's outcomes.
    #[must_use]
    pub fn merge(mut self, other: ReconcileReport) -> Self {
        self.actions_taken.extend(other.actions_taken);
        self.actions_failed.extend(other.actions_failed);
        self
    }
}
