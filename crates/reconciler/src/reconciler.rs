//! Reconciler implementation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use belle_model::{resolve, walk, ChangeNotification, NodeHandle, NodeId, Snapshot};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{NodeKind, ReconcileAction, ReconcileReport};

/// Trait for executing reconcile actions.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute an action.
    async fn execute(&self, action: &ReconcileAction) -> Result<()>;

    /// The document's current snapshot, used by full resyncs.
    fn snapshot(&self) -> Snapshot;
}

fn creation(node: &NodeHandle) -> Option<ReconcileAction> {
    match node {
        NodeHandle::Round(round) if round.association().is_none() => {
            Some(ReconcileAction::CreateAssociation {
                node_id: round.id().clone(),
                kind: NodeKind::Round,
                depth: round.ancestors().len(),
            })
        }
        NodeHandle::Puzzle(puzzle) if puzzle.association().is_none() => {
            Some(ReconcileAction::CreateAssociation {
                node_id: puzzle.id().clone(),
                kind: NodeKind::Puzzle,
                depth: puzzle.ancestors().len(),
            })
        }
        _ => None,
    }
}

fn sheet_creation(node: &NodeHandle) -> Option<ReconcileAction> {
    match node {
        NodeHandle::Puzzle(puzzle) if puzzle.sheet_id().is_none() => {
            Some(ReconcileAction::CreateSheet {
                puzzle_id: puzzle.id().clone(),
            })
        }
        _ => None,
    }
}

fn removal(node: &NodeHandle) -> Option<ReconcileAction> {
    match node {
        NodeHandle::Round(round) => round.association().map(|association| {
            ReconcileAction::RemoveAssociation {
                node_id: round.id().clone(),
                channel_id: association.channel_id,
                role_id: association.role_id,
                index_channel_id: Some(association.index_channel_id),
            }
        }),
        NodeHandle::Puzzle(puzzle) => puzzle.association().map(|association| {
            ReconcileAction::RemoveAssociation {
                node_id: puzzle.id().clone(),
                channel_id: association.channel_id,
                role_id: association.role_id,
                index_channel_id: None,
            }
        }),
        NodeHandle::Str(_) | NodeHandle::Num(_) => None,
    }
}

/// A node and every round or puzzle below it.
fn subtree(node: &NodeHandle) -> Vec<NodeId> {
    let mut ids = vec![node.id().clone()];
    if let NodeHandle::Round(round) = node {
        ids.extend(round.children().iter().flat_map(subtree));
    }
    ids
}

/// Work needed to bring the chat platform from `before` to `after`.
///
/// Removals resolve against `before`; everything else against `after`.
pub fn plan(before: &Snapshot, after: &Snapshot) -> Vec<ReconcileAction> {
    let delta = before.delta(after);
    if delta.is_empty() {
        return Vec::new();
    }

    let removals = delta
        .removed
        .iter()
        .filter_map(|id| resolve(before, id))
        .filter_map(|node| removal(&node));

    let added: Vec<NodeHandle> = delta
        .added
        .iter()
        .filter_map(|id| resolve(after, id))
        .collect();
    let sheets = added.iter().filter_map(sheet_creation);
    let creations = added.iter().filter_map(creation);

    let mut synced = BTreeSet::new();
    let mut moved = BTreeSet::new();
    for id in &delta.changed {
        let Some(node) = resolve(after, id) else {
            continue;
        };
        match &node {
            NodeHandle::Str(leaf) | NodeHandle::Num(leaf) => {
                warn!(node_id = %leaf.id(), "Primitive field reported as changed");
            }
            NodeHandle::Puzzle(puzzle) => {
                if puzzle.association().is_some() {
                    synced.insert(puzzle.id().clone());
                    synced.extend(puzzle.round_id());
                }
            }
            NodeHandle::Round(round) => {
                if round.association().is_some() {
                    synced.insert(round.id().clone());
                    synced.extend(round.round_id());
                }

                let previous: HashSet<&NodeId> = before
                    .children(round.id(), belle_model::schema::CHILDREN)
                    .iter()
                    .collect();
                if previous.len() != round.child_ids().len() {
                    let arrivals = round
                        .children()
                        .into_iter()
                        .filter(|child| !previous.contains(child.id()))
                        .filter(|child| !delta.is_added(child.id()));
                    for child in arrivals {
                        moved.extend(subtree(&child));
                    }
                }
            }
        }
    }

    removals
        .chain(sheets)
        .chain(creations)
        .chain(
            moved
                .into_iter()
                .map(|node_id| ReconcileAction::SyncPermissions { node_id }),
        )
        .chain(
            synced
                .into_iter()
                .map(|node_id| ReconcileAction::SyncChannel { node_id }),
        )
        .collect()
}

/// Associations and sheets missing anywhere in the tree.
pub fn plan_missing(snapshot: &Snapshot) -> Vec<ReconcileAction> {
    let nodes = walk(snapshot);
    let creations = nodes.iter().filter_map(creation);
    let sheets = nodes.iter().filter_map(sheet_creation);
    creations.chain(sheets).collect()
}

/// Channel and permission syncs for every round and puzzle.
pub fn plan_sync_all(snapshot: &Snapshot) -> Vec<ReconcileAction> {
    walk(snapshot)
        .iter()
        .flat_map(|node| {
            [
                ReconcileAction::SyncChannel {
                    node_id: node.id().clone(),
                },
                ReconcileAction::SyncPermissions {
                    node_id: node.id().clone(),
                },
            ]
        })
        .collect()
}

/// Rounds by depth, then puzzles.
fn creation_phase(action: &ReconcileAction) -> (NodeKind, usize) {
    match action {
        ReconcileAction::CreateAssociation {
            kind: NodeKind::Round,
            depth,
            ..
        } => (NodeKind::Round, *depth),
        _ => (NodeKind::Puzzle, 0),
    }
}

type Outcome = (ReconcileAction, Result<()>);

/// Applies the platform side of hunt document changes.
pub struct Reconciler {
    executor: Arc<dyn ActionExecutor>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(executor: Arc<dyn ActionExecutor>) -> Self {
        Self { executor }
    }

    /// Reconcile one change notification.
    ///
    /// # Errors
    ///
    /// Returns the first document-edit failure. Platform failures are only
    /// reported in the returned [`ReconcileReport`].
    pub async fn handle(&self, notification: &ChangeNotification) -> Result<ReconcileReport> {
        let actions = plan(&notification.before, &notification.after);
        if actions.is_empty() {
            return Ok(ReconcileReport::default());
        }
        debug!(actions = actions.len(), "Generated actions");
        self.apply_actions(actions).await
    }

    /// Re-derive the whole platform state from the current document.
    ///
    /// # Errors
    ///
    /// Returns the first document-edit failure of either phase.
    pub async fn full_resync(&self) -> Result<ReconcileReport> {
        info!("Starting full resync");
        let created = self.apply_actions(plan_missing(&self.executor.snapshot())).await?;
        let synced = self
            .apply_actions(plan_sync_all(&self.executor.snapshot()))
            .await?;
        let report = created.merge(synced);
        info!(
            actions_taken = report.actions_taken.len(),
            actions_failed = report.actions_failed.len(),
            "Full resync complete"
        );
        Ok(report)
    }

    async fn execute(&self, action: ReconcileAction) -> Outcome {
        debug!(action = %action.description(), "Applying action");
        let result = self.executor.execute(&action).await;
        (action, result)
    }

    /// Creations run one phase at a time; everything else runs at once.
    async fn apply_creations(&self, creations: Vec<ReconcileAction>) -> Vec<Outcome> {
        let mut phases: BTreeMap<(NodeKind, usize), Vec<ReconcileAction>> = BTreeMap::new();
        for action in creations {
            phases.entry(creation_phase(&action)).or_default().push(action);
        }

        let mut outcomes = Vec::new();
        for (_, phase) in phases {
            outcomes.extend(join_all(phase.into_iter().map(|action| self.execute(action))).await);
        }
        outcomes
    }

    async fn apply_actions(&self, actions: Vec<ReconcileAction>) -> Result<ReconcileReport> {
        let (creations, others): (Vec<_>, Vec<_>) = actions
            .into_iter()
            .partition(|action| matches!(action, ReconcileAction::CreateAssociation { .. }));

        let (mut outcomes, created) = futures::join!(
            join_all(others.into_iter().map(|action| self.execute(action))),
            self.apply_creations(creations),
        );
        outcomes.extend(created);

        let mut taken = Vec::new();
        let mut failed = Vec::new();
        let mut document_error = None;
        for (action, result) in outcomes {
            match result {
                Ok(()) => taken.push(action),
                Err(e) => {
                    warn!(action = %action.description(), error = %e, "Action failed");
                    failed.push((action, e.to_string()));
                    if e.is_document() && document_error.is_none() {
                        document_error = Some(e);
                    }
                }
            }
        }

        match document_error {
            Some(e) => Err(e),
            None => Ok(ReconcileReport::new(taken, failed)),
        }
    }
}

/// Executor that only records what it was asked to do.
pub struct RecordingExecutor {
    snapshot: Snapshot,
    executed: Mutex<Vec<ReconcileAction>>,
    failing: Mutex<HashSet<NodeId>>,
}

impl RecordingExecutor {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            executed: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Actions executed so far, in completion order.
    pub fn executed(&self) -> Vec<ReconcileAction> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every action targeting `node_id` fail with a platform error.
    pub fn fail_for(&self, node_id: NodeId) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id);
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &ReconcileAction) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(action.node_id());
        if failing {
            return Err(Error::platform(action.description(), "injected failure"));
        }
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action.clone());
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use belle_model::{
        InMemoryDocumentService, PuzzleAssociation, Puzzlehunt, RoundAssociation,
    };

    async fn hunt() -> belle_model::Result<Puzzlehunt> {
        Puzzlehunt::create(&InMemoryDocumentService::new()).await
    }

    fn associate_round(hunt: &Puzzlehunt, id: &NodeId, tag: &str) -> belle_model::Result<()> {
        hunt.augment_round(
            id,
            &RoundAssociation {
                channel_id: format!("cat-{tag}").into(),
                role_id: format!("role-{tag}").into(),
                index_channel_id: format!("index-{tag}").into(),
            },
        )
    }

    fn associate_puzzle(hunt: &Puzzlehunt, id: &NodeId, tag: &str) -> belle_model::Result<()> {
        hunt.augment_puzzle(
            id,
            &PuzzleAssociation {
                channel_id: format!("chan-{tag}").into(),
                role_id: format!("role-{tag}").into(),
            },
        )
    }

    #[tokio::test]
    async fn test_plan_empty_delta() -> belle_model::Result<()> {
        let hunt = hunt().await?;
        let snapshot = hunt.snapshot();
        assert!(plan(&snapshot, &snapshot).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_plan_added_puzzle_needs_sheet_and_channel() -> belle_model::Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("R", "", None)?;
        associate_round(&hunt, &round, "r")?;
        let before = hunt.snapshot();
        let puzzle = hunt.add_puzzle("P", "https://p", &round)?;

        let actions = plan(&before, &hunt.snapshot());
        assert!(actions.contains(&ReconcileAction::CreateSheet {
            puzzle_id: puzzle.clone()
        }));
        assert!(actions.contains(&ReconcileAction::CreateAssociation {
            node_id: puzzle,
            kind: NodeKind::Puzzle,
            depth: 1,
        }));
        // The round's child list changed, so its index needs refreshing.
        assert!(actions.contains(&ReconcileAction::SyncChannel { node_id: round }));
        Ok(())
    }

    #[tokio::test]
    async fn test_plan_removal_resolves_against_before() -> belle_model::Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("R", "", None)?;
        associate_round(&hunt, &round, "r")?;
        let puzzle = hunt.add_puzzle("P", "", &round)?;
        associate_puzzle(&hunt, &puzzle, "p")?;
        let before = hunt.snapshot();
        hunt.delete(&round)?;

        let removals: Vec<_> = plan(&before, &hunt.snapshot())
            .into_iter()
            .filter(|a| matches!(a, ReconcileAction::RemoveAssociation { .. }))
            .collect();
        assert_eq!(removals.len(), 2);
        assert!(removals.contains(&ReconcileAction::RemoveAssociation {
            node_id: round,
            channel_id: "cat-r".into(),
            role_id: "role-r".into(),
            index_channel_id: Some("index-r".into()),
        }));
        Ok(())
    }

    #[tokio::test]
    async fn test_plan_unassociated_removal_is_ignored() -> belle_model::Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("R", "", None)?;
        let before = hunt.snapshot();
        hunt.delete(&round)?;
        assert!(plan(&before, &hunt.snapshot()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_plan_unassociated_change_leaves_parent_alone() -> belle_model::Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("R", "", None)?;
        associate_round(&hunt, &round, "r")?;
        let puzzle = hunt.add_puzzle("P", "", &round)?;
        let before = hunt.snapshot();
        hunt.solve(&puzzle, Some("ANSWER"))?;

        let actions = plan(&before, &hunt.snapshot());
        assert!(!actions
            .iter()
            .any(|a| matches!(a, ReconcileAction::SyncChannel { .. })));

        associate_puzzle(&hunt, &puzzle, "p")?;
        let before = hunt.snapshot();
        hunt.change_name(&puzzle, "Renamed")?;
        let actions = plan(&before, &hunt.snapshot());
        assert!(actions.contains(&ReconcileAction::SyncChannel { node_id: puzzle }));
        assert!(actions.contains(&ReconcileAction::SyncChannel { node_id: round }));
        Ok(())
    }

    #[tokio::test]
    async fn test_plan_move_resyncs_permissions() -> belle_model::Result<()> {
        let hunt = hunt().await?;
        let r = hunt.add_round("R", "", None)?;
        let s = hunt.add_round("S", "", None)?;
        associate_round(&hunt, &r, "r")?;
        associate_round(&hunt, &s, "s")?;
        let a = hunt.add_puzzle("A", "", &r)?;
        associate_puzzle(&hunt, &a, "a")?;
        let before = hunt.snapshot();
        hunt.move_node(&a, &s)?;

        let actions = plan(&before, &hunt.snapshot());
        assert!(actions.contains(&ReconcileAction::SyncPermissions { node_id: a.clone() }));
        assert!(actions.contains(&ReconcileAction::SyncChannel { node_id: a }));
        assert!(actions.contains(&ReconcileAction::SyncChannel { node_id: r }));
        assert!(actions.contains(&ReconcileAction::SyncChannel { node_id: s }));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, ReconcileAction::CreateAssociation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_plan_moved_round_resyncs_its_subtree() -> belle_model::Result<()> {
        let hunt = hunt().await?;
        let outer = hunt.add_round("Outer", "", None)?;
        let inner = hunt.add_round("Inner", "", None)?;
        let puzzle = hunt.add_puzzle("P", "", &inner)?;
        let before = hunt.snapshot();
        hunt.move_node(&inner, &outer)?;

        let actions = plan(&before, &hunt.snapshot());
        assert!(actions.contains(&ReconcileAction::SyncPermissions { node_id: inner }));
        assert!(actions.contains(&ReconcileAction::SyncPermissions { node_id: puzzle }));
        Ok(())
    }

    #[tokio::test]
    async fn test_full_resync_orders_creations() -> Result<()> {
        let hunt = hunt().await?;
        let outer = hunt.add_round("Outer", "", None)?;
        let inner = hunt.add_round("Inner", "", Some(&outer))?;
        let puzzle = hunt.add_puzzle("P", "", &inner)?;

        let executor = Arc::new(RecordingExecutor::new(hunt.snapshot()));
        let reconciler = Reconciler::new(executor.clone());
        let report = reconciler.full_resync().await?;
        assert!(report.all_succeeded());

        let order: Vec<NodeId> = executor
            .executed()
            .into_iter()
            .filter(|a| matches!(a, ReconcileAction::CreateAssociation { .. }))
            .map(|a| a.node_id().clone())
            .collect();
        assert_eq!(order, vec![outer, inner, puzzle]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_action_does_not_abort_siblings() -> Result<()> {
        let hunt = hunt().await?;
        let round = hunt.add_round("R", "", None)?;
        let before = hunt.snapshot();
        let broken = hunt.add_puzzle("Broken", "", &round)?;
        let fine = hunt.add_puzzle("Fine", "", &round)?;

        let executor = Arc::new(RecordingExecutor::new(hunt.snapshot()));
        executor.fail_for(broken.clone());
        let reconciler = Reconciler::new(executor.clone());
        let report = reconciler
            .handle(&ChangeNotification::new(before, hunt.snapshot()))
            .await?;

        assert!(!report.all_succeeded());
        assert!(report
            .actions_failed
            .iter()
            .all(|(action, _)| action.node_id() == &broken));
        assert!(executor.executed().iter().any(|a| a.node_id() == &fine));
        Ok(())
    }
}
