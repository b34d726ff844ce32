//! Before/after comparison of snapshots.

use itertools::Itertools;

use crate::snapshot::{NodeId, Snapshot};

/// Node ids that differ between two snapshots, each list sorted by id.
///
/// `removed` ids resolve against the earlier snapshot; `added` and `changed`
/// resolve against the later one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub changed: Vec<NodeId>,
}

impl Delta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    #[must_use]
    pub fn is_added(&self, id: &NodeId) -> bool {
        self.added.binary_search(id).is_ok()
    }
}

impl Snapshot {
    /// Compare this snapshot with a later one.
    ///
    /// A node counts as changed when its payload, any of its child lists, or
    /// its position in the tree differs.
    #[must_use]
    pub fn delta(&self, after: &Snapshot) -> Delta {
        let added = after
            .iter()
            .filter(|(id, _)| !self.contains(id))
            .map(|(id, _)| id.clone())
            .sorted()
            .collect_vec();
        let removed = self
            .iter()
            .filter(|(id, _)| !after.contains(id))
            .map(|(id, _)| id.clone())
            .sorted()
            .collect_vec();
        let changed = after
            .iter()
            .filter(|(id, node)| self.get(id).is_some_and(|before| before != *node))
            .map(|(id, _)| id.clone())
            .sorted()
            .collect_vec();

        Delta {
            added,
            removed,
            changed,
        }
    }
}

/// A change event delivered to document subscribers.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub before: Snapshot,
    pub after: Snapshot,
}

impl ChangeNotification {
    pub fn new(before: Snapshot, after: Snapshot) -> Self {
        Self { before, after }
    }

    #[must_use]
    pub fn delta(&self) -> Delta {
        self.before.delta(&self.after)
    }
}
