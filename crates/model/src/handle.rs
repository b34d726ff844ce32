//! Typed, snapshot-bound views over raw nodes.
//!
//! Handles hold the snapshot they were resolved against and never refresh;
//! re-resolve after an edit to observe new values.

use belle_core::{ChannelId, RoleId};
use serde::{Deserialize, Serialize};

use crate::schema;
use crate::snapshot::{Definition, NodeId, Payload, RawNode, Snapshot, TraitLocation};

/// Chat resources bound to a puzzle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleAssociation {
    pub channel_id: ChannelId,
    pub role_id: RoleId,
}

/// Chat resources bound to a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundAssociation {
    pub channel_id: ChannelId,
    pub role_id: RoleId,
    pub index_channel_id: ChannelId,
}

/// A resolved node.
#[derive(Debug, Clone)]
pub enum NodeHandle {
    Round(RoundHandle),
    Puzzle(PuzzleHandle),
    Str(LeafHandle),
    Num(LeafHandle),
}

impl NodeHandle {
    #[must_use]
    pub fn id(&self) -> &NodeId {
        match self {
            Self::Round(round) => round.id(),
            Self::Puzzle(puzzle) => puzzle.id(),
            Self::Str(leaf) | Self::Num(leaf) => leaf.id(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Round(_) => "round",
            Self::Puzzle(_) => "puzzle",
            Self::Str(_) => "string",
            Self::Num(_) => "number",
        }
    }
}

/// Resolve `id` in `snapshot`. The root and unknown ids resolve to `None`.
#[must_use]
pub fn resolve(snapshot: &Snapshot, id: &NodeId) -> Option<NodeHandle> {
    let node = snapshot.get(id)?;
    let bound = Bound {
        snapshot: snapshot.clone(),
        id: id.clone(),
    };
    match node.definition() {
        Definition::Root => None,
        Definition::Round => Some(NodeHandle::Round(RoundHandle(bound))),
        Definition::Puzzle => Some(NodeHandle::Puzzle(PuzzleHandle(bound))),
        Definition::String => Some(NodeHandle::Str(LeafHandle(bound))),
        Definition::Number => Some(NodeHandle::Num(LeafHandle(bound))),
    }
}

/// Pre-order walk of every round and puzzle reachable from the root.
#[must_use]
pub fn walk(snapshot: &Snapshot) -> Vec<NodeHandle> {
    let mut out = Vec::new();
    let mut stack: Vec<&NodeId> = snapshot
        .children(snapshot.root_id(), schema::CHILDREN)
        .iter()
        .rev()
        .collect();
    while let Some(id) = stack.pop() {
        if let Some(handle) = resolve(snapshot, id) {
            if matches!(handle, NodeHandle::Round(_) | NodeHandle::Puzzle(_)) {
                out.push(handle);
                stack.extend(snapshot.children(id, schema::CHILDREN).iter().rev());
            }
        }
    }
    out
}

#[derive(Debug, Clone)]
struct Bound {
    snapshot: Snapshot,
    id: NodeId,
}

impl Bound {
    fn str_field(&self, label: &str) -> Option<&str> {
        self.snapshot.str_field(&self.id, label)
    }

    fn parentage(&self) -> Option<&TraitLocation> {
        self.snapshot.get(&self.id).and_then(RawNode::parentage)
    }

    fn parent_round(&self) -> Option<NodeId> {
        let parent = &self.parentage()?.parent;
        self.snapshot
            .get(parent)
            .filter(|node| node.definition() == Definition::Round)
            .map(|_| parent.clone())
    }

    fn round(&self, id: NodeId) -> RoundHandle {
        RoundHandle(Bound {
            snapshot: self.snapshot.clone(),
            id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RoundHandle(Bound);

impl RoundHandle {
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.0.id
    }

    /// The snapshot this handle reads from.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.0.snapshot
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.0.str_field(schema::NAME).unwrap_or("")
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.0.str_field(schema::URL).unwrap_or("")
    }

    /// Parent round id; `None` when the round hangs off the root.
    #[must_use]
    pub fn round_id(&self) -> Option<NodeId> {
        self.0.parent_round()
    }

    #[must_use]
    pub fn parent_round(&self) -> Option<RoundHandle> {
        self.round_id().map(|id| self.0.round(id))
    }

    #[must_use]
    pub fn child_ids(&self) -> &[NodeId] {
        self.0.snapshot.children(&self.0.id, schema::CHILDREN)
    }

    /// Child rounds and puzzles in order.
    #[must_use]
    pub fn children(&self) -> Vec<NodeHandle> {
        self.child_ids()
            .iter()
            .filter_map(|id| resolve(&self.0.snapshot, id))
            .filter(|child| matches!(child, NodeHandle::Round(_) | NodeHandle::Puzzle(_)))
            .collect()
    }

    /// Present only when every id has been written.
    #[must_use]
    pub fn association(&self) -> Option<RoundAssociation> {
        Some(RoundAssociation {
            channel_id: self.0.str_field(schema::CHANNEL_ID)?.into(),
            role_id: self.0.str_field(schema::ROLE_ID)?.into(),
            index_channel_id: self.0.str_field(schema::INDEX_CHANNEL_ID)?.into(),
        })
    }

    /// Ancestor rounds from the immediate parent up to the top level.
    #[must_use]
    pub fn ancestors(&self) -> Vec<RoundHandle> {
        std::iter::successors(self.parent_round(), RoundHandle::parent_round).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PuzzleHandle(Bound);

impl PuzzleHandle {
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.0.id
    }

    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.0.snapshot
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.0.str_field(schema::NAME).unwrap_or("")
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.0.str_field(schema::URL).unwrap_or("")
    }

    /// Owning round id.
    #[must_use]
    pub fn round_id(&self) -> Option<NodeId> {
        self.0.parent_round()
    }

    #[must_use]
    pub fn round(&self) -> Option<RoundHandle> {
        self.round_id().map(|id| self.0.round(id))
    }

    #[must_use]
    pub fn sheet_id(&self) -> Option<&str> {
        self.0.str_field(schema::SHEET_ID)
    }

    #[must_use]
    pub fn answer(&self) -> Option<&str> {
        self.0.str_field(schema::ANSWER)
    }

    #[must_use]
    pub fn is_solved(&self) -> bool {
        self.answer().is_some()
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.0.str_field(schema::STATUS)
    }

    /// Milliseconds since the epoch of the last status write.
    #[must_use]
    pub fn last_status_update(&self) -> Option<i64> {
        self.0.snapshot.num_field(&self.0.id, schema::LAST_STATUS_UPDATE)
    }

    #[must_use]
    pub fn association(&self) -> Option<PuzzleAssociation> {
        Some(PuzzleAssociation {
            channel_id: self.0.str_field(schema::CHANNEL_ID)?.into(),
            role_id: self.0.str_field(schema::ROLE_ID)?.into(),
        })
    }

    /// Enclosing rounds from the owning round up to the top level.
    #[must_use]
    pub fn ancestors(&self) -> Vec<RoundHandle> {
        std::iter::successors(self.round(), RoundHandle::parent_round).collect()
    }
}

/// A primitive field node.
#[derive(Debug, Clone)]
pub struct LeafHandle(Bound);

impl LeafHandle {
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.0.id
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.0.snapshot.get(&self.0.id).and_then(RawNode::payload)
    }

    #[must_use]
    pub fn parentage(&self) -> Option<&TraitLocation> {
        self.0.parentage()
    }
}
