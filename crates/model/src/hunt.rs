//! The puzzle hunt: typed edits over a replicated document.

use std::collections::BTreeMap;
use std::sync::Arc;

use belle_core::{ChannelId, GuildId};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::document::{DocumentId, DocumentService, ReplicatedDocument};
use crate::error::{Error, Result};
use crate::handle::{
    self, NodeHandle, PuzzleAssociation, PuzzleHandle, RoundAssociation, RoundHandle,
};
use crate::schema;
use crate::snapshot::{
    BuildNode, Change, Definition, NodeId, Payload, Snapshot, StableRange, TraitLocation,
};

/// Channels that receive hunt activity logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingChannels {
    pub puzzle_add: Option<ChannelId>,
    pub puzzle_solve: Option<ChannelId>,
    pub puzzle_status_update: Option<ChannelId>,
}

/// Typed access to a hunt document.
#[derive(Clone)]
pub struct Puzzlehunt {
    document: Arc<dyn ReplicatedDocument>,
}

impl Puzzlehunt {
    pub fn new(document: Arc<dyn ReplicatedDocument>) -> Self {
        Self { document }
    }

    /// Create a new, empty hunt document.
    ///
    /// # Errors
    ///
    /// Fails when the document service fails.
    pub async fn create(service: &dyn DocumentService) -> Result<Self> {
        Ok(Self::new(service.create_document().await?))
    }

    /// Open a new handle on an existing hunt.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be opened.
    pub async fn open(service: &dyn DocumentService, id: &DocumentId) -> Result<Self> {
        Ok(Self::new(service.open_document(id).await?))
    }

    pub fn document(&self) -> &Arc<dyn ReplicatedDocument> {
        &self.document
    }

    pub fn id(&self) -> &DocumentId {
        self.document.id()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.document.current_snapshot()
    }

    pub fn dispose(&self) {
        self.document.dispose();
    }

    /// Look up a round in the current snapshot.
    ///
    /// # Errors
    ///
    /// Fails when `id` is missing or is not a round.
    pub fn round(&self, id: &NodeId) -> Result<RoundHandle> {
        match handle::resolve(&self.snapshot(), id) {
            Some(NodeHandle::Round(round)) => Ok(round),
            Some(_) => Err(Error::wrong_kind(id, "round")),
            None => Err(Error::node_not_found(id)),
        }
    }

    /// Look up a puzzle in the current snapshot.
    ///
    /// # Errors
    ///
    /// Fails when `id` is missing or is not a puzzle.
    pub fn puzzle(&self, id: &NodeId) -> Result<PuzzleHandle> {
        match handle::resolve(&self.snapshot(), id) {
            Some(NodeHandle::Puzzle(puzzle)) => Ok(puzzle),
            Some(_) => Err(Error::wrong_kind(id, "puzzle")),
            None => Err(Error::node_not_found(id)),
        }
    }

    /// Every round reachable from the root, in pre-order.
    pub fn rounds(&self) -> Vec<RoundHandle> {
        handle::walk(&self.snapshot())
            .into_iter()
            .filter_map(|node| match node {
                NodeHandle::Round(round) => Some(round),
                _ => None,
            })
            .collect()
    }

    /// Every puzzle reachable from the root, in pre-order.
    pub fn puzzles(&self) -> Vec<PuzzleHandle> {
        handle::walk(&self.snapshot())
            .into_iter()
            .filter_map(|node| match node {
                NodeHandle::Puzzle(puzzle) => Some(puzzle),
                _ => None,
            })
            .collect()
    }

    /// Add a puzzle at the end of `round`'s children.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn add_puzzle(&self, name: &str, url: &str, round: &NodeId) -> Result<NodeId> {
        let mut ids = self.add_puzzles(round, &[(name, url)])?;
        ids.pop().ok_or_else(|| Error::invalid_edit("no puzzle was inserted"))
    }

    /// Add several puzzles to the same round in one edit.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn add_puzzles(&self, round: &NodeId, puzzles: &[(&str, &str)]) -> Result<Vec<NodeId>> {
        self.insert_children(round, Definition::Puzzle, puzzles)
    }

    /// Add a round under `parent`, or at the top level.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn add_round(&self, name: &str, url: &str, parent: Option<&NodeId>) -> Result<NodeId> {
        let mut ids = self.add_rounds(parent, &[(name, url)])?;
        ids.pop().ok_or_else(|| Error::invalid_edit("no round was inserted"))
    }

    /// Add several rounds under the same parent in one edit.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn add_rounds(&self, parent: Option<&NodeId>, rounds: &[(&str, &str)]) -> Result<Vec<NodeId>> {
        let parent = match parent {
            Some(id) => id.clone(),
            None => self.snapshot().root_id().clone(),
        };
        self.insert_children(&parent, Definition::Round, rounds)
    }

    fn insert_children(
        &self,
        parent: &NodeId,
        definition: Definition,
        entries: &[(&str, &str)],
    ) -> Result<Vec<NodeId>> {
        let nodes: Vec<BuildNode> = entries
            .iter()
            .map(|(name, url)| {
                BuildNode::new(self.document.generate_id(), definition)
                    .with_trait(schema::NAME, vec![self.leaf(Payload::Str((*name).to_string()))])
                    .with_trait(schema::URL, vec![self.leaf(Payload::Str((*url).to_string()))])
            })
            .collect();
        let ids = nodes.iter().map(|node| node.id.clone()).collect();
        self.document.edit(vec![Change::Insert {
            at: TraitLocation::new(parent, schema::CHILDREN),
            nodes,
        }])?;
        Ok(ids)
    }

    /// Delete a round or puzzle together with everything beneath it.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn delete(&self, id: &NodeId) -> Result<()> {
        self.document
            .edit(vec![Change::Delete(StableRange::Only(id.clone()))])
    }

    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn change_name(&self, id: &NodeId, name: &str) -> Result<()> {
        self.document
            .edit(self.replace(id, schema::NAME, Payload::Str(name.to_string())))
    }

    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn change_url(&self, id: &NodeId, url: &str) -> Result<()> {
        self.document
            .edit(self.replace(id, schema::URL, Payload::Str(url.to_string())))
    }

    /// Move a node to the end of `new_parent`'s children in one edit.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn move_node(&self, id: &NodeId, new_parent: &NodeId) -> Result<()> {
        self.document.edit(vec![Change::Move {
            range: StableRange::Only(id.clone()),
            to: TraitLocation::new(new_parent, schema::CHILDREN),
        }])
    }

    /// Set the answer, or clear it with `None`.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn solve(&self, id: &NodeId, answer: Option<&str>) -> Result<()> {
        let changes = match answer {
            Some(answer) => self.replace(id, schema::ANSWER, Payload::Str(answer.to_string())),
            None => vec![clear(id, schema::ANSWER)],
        };
        self.document.edit(changes)
    }

    /// Write a status together with the current timestamp.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn update_status(&self, id: &NodeId, status: &str) -> Result<()> {
        let mut changes = self.replace(id, schema::STATUS, Payload::Str(status.to_string()));
        changes.extend(self.replace(
            id,
            schema::LAST_STATUS_UPDATE,
            Payload::Num(Utc::now().timestamp_millis()),
        ));
        self.document.edit(changes)
    }

    /// Remove the status and its timestamp.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn clear_status(&self, id: &NodeId) -> Result<()> {
        self.document.edit(vec![
            clear(id, schema::STATUS),
            clear(id, schema::LAST_STATUS_UPDATE),
        ])
    }

    /// Record a puzzle's chat resources in one edit.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn augment_puzzle(&self, id: &NodeId, association: &PuzzleAssociation) -> Result<()> {
        let mut changes = self.replace(
            id,
            schema::CHANNEL_ID,
            Payload::Str(association.channel_id.to_string()),
        );
        changes.extend(self.replace(
            id,
            schema::ROLE_ID,
            Payload::Str(association.role_id.to_string()),
        ));
        self.document.edit(changes)
    }

    /// Record a round's chat resources in one edit.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn augment_round(&self, id: &NodeId, association: &RoundAssociation) -> Result<()> {
        let fields = [
            (schema::CHANNEL_ID, association.channel_id.as_str()),
            (schema::ROLE_ID, association.role_id.as_str()),
            (schema::INDEX_CHANNEL_ID, association.index_channel_id.as_str()),
        ];
        let changes = fields
            .iter()
            .flat_map(|(label, value)| self.replace(id, label, Payload::Str((*value).to_string())))
            .collect();
        self.document.edit(changes)
    }

    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn augment_with_sheet(&self, id: &NodeId, sheet_id: &str) -> Result<()> {
        self.document
            .edit(self.replace(id, schema::SHEET_ID, Payload::Str(sheet_id.to_string())))
    }

    /// Guild that owns this hunt, if recorded.
    pub fn guild_id(&self) -> Option<GuildId> {
        let snapshot = self.snapshot();
        snapshot
            .str_field(snapshot.root_id(), schema::GUILD_ID)
            .map(GuildId::from)
    }

    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn set_guild_id(&self, guild_id: &GuildId) -> Result<()> {
        let root = self.snapshot().root_id().clone();
        self.document
            .edit(self.replace(&root, schema::GUILD_ID, Payload::Str(guild_id.to_string())))
    }

    pub fn logging_channels(&self) -> LoggingChannels {
        let snapshot = self.snapshot();
        let root = snapshot.root_id();
        let read = |label: &str| snapshot.str_field(root, label).map(ChannelId::from);
        LoggingChannels {
            puzzle_add: read(schema::PUZZLE_ADD_CHANNEL_ID),
            puzzle_solve: read(schema::PUZZLE_SOLVE_CHANNEL_ID),
            puzzle_status_update: read(schema::PUZZLE_STATUS_UPDATE_CHANNEL_ID),
        }
    }

    /// Replace every logging channel in one edit. `None` clears a channel.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn set_logging_channels(&self, channels: &LoggingChannels) -> Result<()> {
        let root = self.snapshot().root_id().clone();
        let fields = [
            (schema::PUZZLE_ADD_CHANNEL_ID, &channels.puzzle_add),
            (schema::PUZZLE_SOLVE_CHANNEL_ID, &channels.puzzle_solve),
            (schema::PUZZLE_STATUS_UPDATE_CHANNEL_ID, &channels.puzzle_status_update),
        ];
        let changes = fields
            .iter()
            .flat_map(|(label, value)| match value {
                Some(channel) => self.replace(&root, label, Payload::Str(channel.to_string())),
                None => vec![clear(&root, label)],
            })
            .collect();
        self.document.edit(changes)
    }

    /// Copy hunt metadata and every round subtree of `other` into this hunt
    /// under fresh ids.
    ///
    /// # Errors
    ///
    /// Fails when the document edit fails.
    pub fn copy_from(&self, other: &Snapshot) -> Result<()> {
        let source_root = other.root_id();
        let root = self.snapshot().root_id().clone();

        let mut changes = Vec::new();
        for (label, children) in other
            .get(source_root)
            .map(|node| node.traits().clone())
            .unwrap_or_default()
        {
            let nodes = children
                .iter()
                .filter_map(|child| self.rebuild(other, child))
                .collect();
            let at = TraitLocation::new(&root, &label);
            if label != schema::CHILDREN {
                changes.push(Change::Delete(StableRange::All(at.clone())));
            }
            changes.push(Change::Insert { at, nodes });
        }
        self.document.edit(changes)
    }

    fn rebuild(&self, source: &Snapshot, id: &NodeId) -> Option<BuildNode> {
        let node = source.get(id)?;
        let traits: BTreeMap<String, Vec<BuildNode>> = node
            .traits()
            .iter()
            .map(|(label, children)| {
                let rebuilt = children
                    .iter()
                    .filter_map(|child| self.rebuild(source, child))
                    .collect();
                (label.clone(), rebuilt)
            })
            .collect();
        Some(BuildNode {
            id: self.document.generate_id(),
            definition: node.definition(),
            payload: node.payload().cloned(),
            traits,
        })
    }

    fn leaf(&self, payload: Payload) -> BuildNode {
        let id = self.document.generate_id();
        match payload {
            Payload::Str(value) => BuildNode::string(id, value),
            Payload::Num(value) => BuildNode::number(id, value),
        }
    }

    /// Whole-value replace of a primitive field.
    fn replace(&self, id: &NodeId, label: &str, payload: Payload) -> Vec<Change> {
        let at = TraitLocation::new(id, label);
        vec![
            Change::Delete(StableRange::All(at.clone())),
            Change::Insert {
                at,
                nodes: vec![self.leaf(payload)],
            },
        ]
    }
}

fn clear(id: &NodeId, label: &str) -> Change {
    Change::Delete(StableRange::All(TraitLocation::new(id, label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocumentService;

    async fn hunt() -> Result<Puzzlehunt> {
        Puzzlehunt::create(&InMemoryDocumentService::new()).await
    }

    #[tokio::test]
    async fn test_add_and_read_back() -> Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("Intro", "https://hunt.example/intro", None)?;
        let puzzle = hunt.add_puzzle("Mind Bender!", "https://hunt.example/mb", &round)?;

        let handle = hunt.puzzle(&puzzle)?;
        assert_eq!(handle.name(), "Mind Bender!");
        assert_eq!(handle.round_id(), Some(round.clone()));
        assert!(hunt.round(&round)?.round_id().is_none());
        assert!(matches!(hunt.round(&puzzle), Err(Error::WrongKind { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_status_and_timestamp_move_together() -> Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("R", "", None)?;
        let puzzle = hunt.add_puzzle("P", "", &round)?;

        hunt.update_status(&puzzle, "extracting")?;
        let handle = hunt.puzzle(&puzzle)?;
        assert_eq!(handle.status(), Some("extracting"));
        assert!(handle.last_status_update().is_some());

        hunt.clear_status(&puzzle)?;
        let handle = hunt.puzzle(&puzzle)?;
        assert!(handle.status().is_none());
        assert!(handle.last_status_update().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_solve_and_unsolve() -> Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("R", "", None)?;
        let puzzle = hunt.add_puzzle("P", "", &round)?;

        hunt.solve(&puzzle, Some("FIRST"))?;
        hunt.solve(&puzzle, Some("SECOND"))?;
        assert_eq!(hunt.puzzle(&puzzle)?.answer(), Some("SECOND"));

        hunt.solve(&puzzle, None)?;
        assert!(!hunt.puzzle(&puzzle)?.is_solved());
        Ok(())
    }

    #[tokio::test]
    async fn test_association_written_atomically() -> Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("R", "", None)?;
        let association = RoundAssociation {
            channel_id: "cat".into(),
            role_id: "role".into(),
            index_channel_id: "index".into(),
        };
        hunt.augment_round(&round, &association)?;
        assert_eq!(hunt.round(&round)?.association(), Some(association));
        Ok(())
    }

    #[tokio::test]
    async fn test_hunt_metadata_on_root() -> Result<()> {
        let hunt = hunt().await?;
        hunt.set_guild_id(&GuildId::new("g-1"))?;
        let channels = LoggingChannels {
            puzzle_add: Some("add".into()),
            puzzle_solve: Some("solve".into()),
            puzzle_status_update: None,
        };
        hunt.set_logging_channels(&channels)?;

        assert_eq!(hunt.guild_id(), Some(GuildId::new("g-1")));
        assert_eq!(hunt.logging_channels(), channels);
        assert!(hunt.rounds().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_from_rebuilds_tree_with_fresh_ids() -> Result<()> {
        let service = InMemoryDocumentService::new();
        let source = Puzzlehunt::create(&service).await?;
        source.set_guild_id(&GuildId::new("g-1"))?;
        let round = source.add_round("R", "", None)?;
        source.add_puzzle("P", "", &round)?;

        let copy = Puzzlehunt::create(&service).await?;
        copy.copy_from(&source.snapshot())?;

        assert_eq!(copy.guild_id(), Some(GuildId::new("g-1")));
        let rounds = copy.rounds();
        assert_eq!(rounds.len(), 1);
        assert_ne!(rounds[0].id(), &round);
        assert_eq!(copy.puzzles()[0].name(), "P");
        Ok(())
    }
}
