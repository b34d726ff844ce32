//! Immutable tree snapshots and the edit operations that produce them.
//!
//! A snapshot is a persistent map from node id to raw node. Applying a batch
//! of [`Change`]s clones the map (O(1), structure is shared) and either
//! applies every change or none of them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Stable identifier of a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, never reused identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Node definition tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Definition {
    Root,
    Round,
    Puzzle,
    String,
    Number,
}

/// Leaf payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Str(String),
    Num(i64),
}

/// A labelled child list of a parent node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitLocation {
    pub parent: NodeId,
    pub label: String,
}

impl TraitLocation {
    /// Create a location for `label` under `parent`.
    pub fn new(parent: &NodeId, label: &str) -> Self {
        Self {
            parent: parent.clone(),
            label: label.to_string(),
        }
    }
}

/// A node as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNode {
    definition: Definition,
    payload: Option<Payload>,
    traits: BTreeMap<String, Vec<NodeId>>,
    parentage: Option<TraitLocation>,
}

impl RawNode {
    /// The node's definition.
    #[must_use]
    pub fn definition(&self) -> Definition {
        self.definition
    }

    /// The node's payload, if it is a leaf.
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Ordered child ids under `label`.
    #[must_use]
    pub fn children(&self, label: &str) -> &[NodeId] {
        self.traits.get(label).map_or(&[], Vec::as_slice)
    }

    /// All trait labels with their children.
    #[must_use]
    pub fn traits(&self) -> &BTreeMap<String, Vec<NodeId>> {
        &self.traits
    }

    /// Where this node hangs in the tree; `None` for the root.
    #[must_use]
    pub fn parentage(&self) -> Option<&TraitLocation> {
        self.parentage.as_ref()
    }
}

/// A subtree to insert, with ids already assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNode {
    pub id: NodeId,
    pub definition: Definition,
    pub payload: Option<Payload>,
    pub traits: BTreeMap<String, Vec<BuildNode>>,
}

impl BuildNode {
    /// Create a node with no payload and no children.
    pub fn new(id: NodeId, definition: Definition) -> Self {
        Self {
            id,
            definition,
            payload: None,
            traits: BTreeMap::new(),
        }
    }

    /// Create a string leaf.
    pub fn string(id: NodeId, value: impl Into<String>) -> Self {
        Self {
            payload: Some(Payload::Str(value.into())),
            ..Self::new(id, Definition::String)
        }
    }

    /// Create a number leaf.
    pub fn number(id: NodeId, value: i64) -> Self {
        Self {
            payload: Some(Payload::Num(value)),
            ..Self::new(id, Definition::Number)
        }
    }

    /// Attach children under `label`.
    #[must_use]
    pub fn with_trait(mut self, label: &str, children: Vec<BuildNode>) -> Self {
        self.traits.insert(label.to_string(), children);
        self
    }
}

/// Nodes addressed by a delete or move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StableRange {
    /// A single node.
    Only(NodeId),
    /// Every child under a trait.
    All(TraitLocation),
}

/// A single edit operation. Batches are applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Insert subtrees at the end of a trait.
    Insert {
        at: TraitLocation,
        nodes: Vec<BuildNode>,
    },
    /// Delete nodes together with their subtrees.
    Delete(StableRange),
    /// Move nodes to the end of a trait.
    Move { range: StableRange, to: TraitLocation },
}

/// An immutable view of the document tree.
#[derive(Debug, Clone)]
pub struct Snapshot {
    root: NodeId,
    nodes: im::HashMap<NodeId, RawNode>,
}

impl Snapshot {
    /// A snapshot holding only a root node.
    pub fn new(root: NodeId) -> Self {
        let node = RawNode {
            definition: Definition::Root,
            payload: None,
            traits: BTreeMap::new(),
            parentage: None,
        };
        let mut nodes = im::HashMap::new();
        nodes.insert(root.clone(), node);
        Self { root, nodes }
    }

    /// Id of the root node.
    #[must_use]
    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&RawNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes, leaves included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over every node in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &RawNode)> {
        self.nodes.iter()
    }

    /// Ordered child ids of `id` under `label`.
    #[must_use]
    pub fn children(&self, id: &NodeId, label: &str) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |node| node.children(label))
    }

    /// Payload of the first leaf under `label`.
    #[must_use]
    pub fn field(&self, id: &NodeId, label: &str) -> Option<&Payload> {
        self.children(id, label)
            .first()
            .and_then(|leaf| self.nodes.get(leaf))
            .and_then(RawNode::payload)
    }

    /// String value of the first leaf under `label`.
    #[must_use]
    pub fn str_field(&self, id: &NodeId, label: &str) -> Option<&str> {
        match self.field(id, label)? {
            Payload::Str(value) => Some(value),
            Payload::Num(_) => None,
        }
    }

    /// Numeric value of the first leaf under `label`.
    #[must_use]
    pub fn num_field(&self, id: &NodeId, label: &str) -> Option<i64> {
        match self.field(id, label)? {
            Payload::Num(value) => Some(*value),
            Payload::Str(_) => None,
        }
    }

    /// Whether `ancestor` lies on the parent chain of `node`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        let mut current = self.nodes.get(node).and_then(RawNode::parentage);
        while let Some(location) = current {
            if &location.parent == ancestor {
                return true;
            }
            current = self.nodes.get(&location.parent).and_then(RawNode::parentage);
        }
        false
    }

    /// Apply a batch of changes, producing a new snapshot.
    ///
    /// # Errors
    ///
    /// Fails without modifying anything if any change references an unknown
    /// node, reuses an id, removes the root, or would create a cycle.
    pub fn apply(&self, changes: &[Change]) -> Result<Self> {
        let mut next = self.clone();
        for change in changes {
            next.apply_one(change)?;
        }
        Ok(next)
    }

    fn apply_one(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::Insert { at, nodes } => self.insert(at, nodes),
            Change::Delete(range) => self
                .range_ids(range)?
                .iter()
                .try_for_each(|id| self.remove_subtree(id)),
            Change::Move { range, to } => self
                .range_ids(range)?
                .iter()
                .try_for_each(|id| self.move_node(id, to)),
        }
    }

    fn range_ids(&self, range: &StableRange) -> Result<Vec<NodeId>> {
        match range {
            StableRange::Only(id) if self.contains(id) => Ok(vec![id.clone()]),
            StableRange::Only(id) => Err(Error::node_not_found(id)),
            StableRange::All(location) if self.contains(&location.parent) => {
                Ok(self.children(&location.parent, &location.label).to_vec())
            }
            StableRange::All(location) => Err(Error::node_not_found(&location.parent)),
        }
    }

    fn insert(&mut self, at: &TraitLocation, nodes: &[BuildNode]) -> Result<()> {
        if !self.contains(&at.parent) {
            return Err(Error::node_not_found(&at.parent));
        }
        for node in nodes {
            self.insert_subtree(node, at.clone())?;
        }
        if !nodes.is_empty() {
            self.attach(at, nodes.iter().map(|n| n.id.clone()));
        }
        Ok(())
    }

    fn insert_subtree(&mut self, node: &BuildNode, parentage: TraitLocation) -> Result<()> {
        if self.contains(&node.id) {
            return Err(Error::DuplicateNode {
                node_id: node.id.clone(),
            });
        }
        let traits = node
            .traits
            .iter()
            .filter(|(_, children)| !children.is_empty())
            .map(|(label, children)| {
                (
                    label.clone(),
                    children.iter().map(|c| c.id.clone()).collect(),
                )
            })
            .collect();
        self.nodes.insert(
            node.id.clone(),
            RawNode {
                definition: node.definition,
                payload: node.payload.clone(),
                traits,
                parentage: Some(parentage),
            },
        );
        for (label, children) in &node.traits {
            for child in children {
                self.insert_subtree(child, TraitLocation::new(&node.id, label))?;
            }
        }
        Ok(())
    }

    fn remove_subtree(&mut self, id: &NodeId) -> Result<()> {
        if id == &self.root {
            return Err(Error::invalid_edit("the root node cannot be deleted"));
        }
        self.detach(id);
        let mut pending = vec![id.clone()];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                pending.extend(node.traits.into_values().flatten());
            }
        }
        Ok(())
    }

    fn move_node(&mut self, id: &NodeId, to: &TraitLocation) -> Result<()> {
        if id == &self.root {
            return Err(Error::invalid_edit("the root node cannot be moved"));
        }
        if !self.contains(&to.parent) {
            return Err(Error::node_not_found(&to.parent));
        }
        if id == &to.parent || self.is_ancestor(id, &to.parent) {
            return Err(Error::invalid_edit(format!(
                "moving '{id}' under '{}' would create a cycle",
                to.parent
            )));
        }
        self.detach(id);
        self.attach(to, std::iter::once(id.clone()));
        if let Some(node) = self.nodes.get_mut(id) {
            node.parentage = Some(to.clone());
        }
        Ok(())
    }

    fn attach(&mut self, at: &TraitLocation, ids: impl IntoIterator<Item = NodeId>) {
        if let Some(parent) = self.nodes.get_mut(&at.parent) {
            parent.traits.entry(at.label.clone()).or_default().extend(ids);
        }
    }

    fn detach(&mut self, id: &NodeId) {
        let Some(location) = self.nodes.get(id).and_then(|n| n.parentage.clone()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&location.parent) {
            if let Some(children) = parent.traits.get_mut(&location.label) {
                children.retain(|child| child != id);
                if children.is_empty() {
                    parent.traits.remove(&location.label);
                }
            }
        }
    }
}
