//! End-to-end reconciliation against the in-memory platform.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use belle_core::{ChannelId, RoleId};
use belle_model::{ChangeNotification, InMemoryDocumentService, Puzzlehunt};
use belle_reconciler::{
    ChannelKind, Guild, HuntBinding, InMemoryGuild, InMemoryPlatform, InMemorySheets, Mutation,
    NewChannel, PlatformExecutor, Reconciler, Result,
};
use tokio::sync::mpsc;

struct Harness {
    hunt: Puzzlehunt,
    guild: Arc<InMemoryGuild>,
    sheets: Arc<InMemorySheets>,
    reconciler: Reconciler,
    notifications: mpsc::UnboundedReceiver<ChangeNotification>,
    binding: HuntBinding,
}

impl Harness {
    async fn new() -> Result<Self> {
        let platform = InMemoryPlatform::new("bot");
        let guild = platform.add_guild("guild");
        let index = guild
            .create_channel(NewChannel::category("Puzzle Index"))
            .await?;
        let all_puzzles = guild.create_role("All Puzzles").await?;
        let binding = HuntBinding {
            all_puzzles_role_id: all_puzzles,
            index_category_id: index.id,
            sheet_folder_id: "folder".to_string(),
        };

        let hunt = Puzzlehunt::create(&InMemoryDocumentService::new()).await?;
        let (tx, notifications) = mpsc::unbounded_channel();
        hunt.document()
            .subscribe(Arc::new(move |notification: ChangeNotification| {
                let _ = tx.send(notification);
            }));

        let sheets = Arc::new(InMemorySheets::new());
        let executor = PlatformExecutor::new(
            hunt.clone(),
            guild.clone(),
            sheets.clone(),
            "bot".into(),
            binding.clone(),
        );
        Ok(Self {
            hunt,
            guild,
            sheets,
            reconciler: Reconciler::new(Arc::new(executor)),
            notifications,
            binding,
        })
    }

    /// Reconcile notifications, including feedback edits, until none remain.
    async fn drain(&mut self) -> Result<()> {
        while let Ok(notification) = self.notifications.try_recv() {
            self.reconciler.handle(&notification).await?;
        }
        Ok(())
    }

    async fn converge(&mut self) -> Result<()> {
        self.reconciler.full_resync().await?;
        self.drain().await
    }

    fn channel(&self, id: &ChannelId) -> belle_reconciler::Channel {
        self.guild
            .channel_list()
            .into_iter()
            .find(|channel| &channel.id == id)
            .expect("channel exists")
    }

    fn overwrite_ids(&self, id: &ChannelId) -> Vec<String> {
        let mut ids: Vec<String> = self
            .channel(id)
            .overwrites
            .into_iter()
            .map(|overwrite| overwrite.id)
            .collect();
        ids.sort();
        ids
    }
}

fn sorted(ids: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = ids.iter().map(|id| (*id).to_string()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_full_resync_creates_everything() -> Result<()> {
    let mut harness = Harness::new().await?;
    let round = harness.hunt.add_round("Intro Round", "https://hunt/intro", None)?;
    let puzzle = harness
        .hunt
        .add_puzzle("Mind Bender!", "https://hunt/mb", &round)?;
    harness.drain().await?;
    harness.converge().await?;

    let round = harness.hunt.round(&round)?;
    let round_association = round.association().expect("round associated");
    let category = harness.channel(&round_association.channel_id);
    assert_eq!(category.name, "intro-round");
    assert_eq!(category.kind, ChannelKind::Category);
    let index = harness.channel(&round_association.index_channel_id);
    assert_eq!(index.name, "intro-round-puzzles");
    assert_eq!(index.parent_id, Some(harness.binding.index_category_id.clone()));

    let puzzle = harness.hunt.puzzle(&puzzle)?;
    assert_eq!(puzzle.sheet_id(), Some("sheet-1"));
    let association = puzzle.association().expect("puzzle associated");
    let channel = harness.channel(&association.channel_id);
    assert_eq!(channel.name, "mind-bender");
    assert_eq!(channel.parent_id, Some(round_association.channel_id.clone()));
    assert_eq!(
        harness.guild.role_name(&association.role_id).as_deref(),
        Some("Mind Bender!")
    );

    let pinned = harness.guild.pinned_messages(&association.channel_id).await?;
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0].embeds[0].title.as_deref(), Some("Mind Bender!"));

    let index_pins = harness
        .guild
        .pinned_messages(&round_association.index_channel_id)
        .await?;
    let description = index_pins[0].embeds[0].description.clone().unwrap_or_default();
    assert!(description.contains("**Mind Bender!**"));
    assert!(description.contains(&format!("<#{}>", association.channel_id)));
    Ok(())
}

#[tokio::test]
async fn test_second_full_resync_is_a_noop() -> Result<()> {
    let mut harness = Harness::new().await?;
    let outer = harness.hunt.add_round("Outer", "", None)?;
    let inner = harness.hunt.add_round("Inner", "", Some(&outer))?;
    harness.hunt.add_puzzle("Deep", "https://p/deep", &inner)?;
    harness.hunt.add_puzzle("Shallow", "https://p/shallow", &outer)?;
    harness.drain().await?;
    harness.converge().await?;

    let before = harness.guild.mutation_count();
    let report = harness.reconciler.full_resync().await?;
    harness.drain().await?;

    assert!(report.all_succeeded());
    assert_eq!(harness.guild.mutation_count(), before);
    assert_eq!(harness.sheets.created().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_nested_puzzle_has_six_overwrites() -> Result<()> {
    let mut harness = Harness::new().await?;
    let outer = harness.hunt.add_round("Outer", "", None)?;
    let inner = harness.hunt.add_round("Inner", "", Some(&outer))?;
    let puzzle = harness.hunt.add_puzzle("Deep", "", &inner)?;
    harness.drain().await?;
    harness.converge().await?;

    let outer = harness.hunt.round(&outer)?.association().expect("outer");
    let inner = harness.hunt.round(&inner)?.association().expect("inner");
    let puzzle = harness.hunt.puzzle(&puzzle)?.association().expect("puzzle");

    let ids = harness.overwrite_ids(&puzzle.channel_id);
    assert_eq!(
        ids,
        sorted(&[
            "bot",
            "guild",
            puzzle.role_id.as_str(),
            harness.binding.all_puzzles_role_id.as_str(),
            inner.role_id.as_str(),
            outer.role_id.as_str(),
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_added_puzzle_is_reconciled_from_notifications() -> Result<()> {
    let mut harness = Harness::new().await?;
    let round = harness.hunt.add_round("Round", "", None)?;
    harness.drain().await?;

    let puzzle = harness.hunt.add_puzzle("Late", "https://p/late", &round)?;
    harness.drain().await?;

    let puzzle = harness.hunt.puzzle(&puzzle)?;
    let association = puzzle.association().expect("created from notification");
    assert_eq!(puzzle.sheet_id(), Some("sheet-1"));
    let pinned = harness.guild.pinned_messages(&association.channel_id).await?;
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0].embeds[0].fields.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_move_reparents_and_resyncs_permissions() -> Result<()> {
    let mut harness = Harness::new().await?;
    let r = harness.hunt.add_round("R", "", None)?;
    let s = harness.hunt.add_round("S", "", None)?;
    let a = harness.hunt.add_puzzle("A", "", &r)?;
    harness.hunt.add_puzzle("B", "", &r)?;
    harness.drain().await?;
    harness.converge().await?;

    let r_role: RoleId = harness.hunt.round(&r)?.association().expect("r").role_id;
    let s_association = harness.hunt.round(&s)?.association().expect("s");
    let mark = harness.guild.mutation_count();

    harness.hunt.move_node(&a, &s)?;
    harness.drain().await?;

    let channel_id = harness.hunt.puzzle(&a)?.association().expect("a").channel_id;
    let channel = harness.channel(&channel_id);
    assert_eq!(channel.parent_id, Some(s_association.channel_id.clone()));

    let ids = harness.overwrite_ids(&channel_id);
    assert!(ids.contains(&s_association.role_id.to_string()));
    assert!(!ids.contains(&r_role.to_string()));

    let after_move = &harness.guild.mutations()[mark..];
    assert!(after_move
        .iter()
        .any(|m| matches!(m, Mutation::SetParent { channel, .. } if channel == &channel_id)));
    assert!(after_move
        .iter()
        .any(|m| matches!(m, Mutation::SetOverwrites { channel } if channel == &channel_id)));
    assert!(!after_move
        .iter()
        .any(|m| matches!(m, Mutation::CreateChannel { .. } | Mutation::CreateRole { .. })));
    Ok(())
}

#[tokio::test]
async fn test_deleting_round_removes_its_resources() -> Result<()> {
    let mut harness = Harness::new().await?;
    let round = harness.hunt.add_round("Gone", "", None)?;
    let puzzle = harness.hunt.add_puzzle("Also Gone", "", &round)?;
    harness.drain().await?;
    harness.converge().await?;

    let round_association = harness.hunt.round(&round)?.association().expect("round");
    let puzzle_association = harness.hunt.puzzle(&puzzle)?.association().expect("puzzle");
    let roles_before = harness.guild.role_count();

    harness.hunt.delete(&round)?;
    harness.drain().await?;

    let remaining: Vec<ChannelId> = harness
        .guild
        .channel_list()
        .into_iter()
        .map(|channel| channel.id)
        .collect();
    assert!(!remaining.contains(&round_association.channel_id));
    assert!(!remaining.contains(&round_association.index_channel_id));
    assert!(!remaining.contains(&puzzle_association.channel_id));
    assert_eq!(harness.guild.role_count(), roles_before - 2);
    // Spreadsheets are kept.
    assert_eq!(harness.sheets.created().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_solving_renames_and_edits_pinned_info() -> Result<()> {
    let mut harness = Harness::new().await?;
    let round = harness.hunt.add_round("Round", "", None)?;
    let puzzle = harness.hunt.add_puzzle("Mind Bender!", "", &round)?;
    harness.drain().await?;
    harness.converge().await?;

    let channel_id = harness.hunt.puzzle(&puzzle)?.association().expect("p").channel_id;
    let mark = harness.guild.mutation_count();
    harness.hunt.solve(&puzzle, Some("EUREKA"))?;
    harness.drain().await?;

    assert_eq!(harness.channel(&channel_id).name, "solved-mind-bender");
    let after = &harness.guild.mutations()[mark..];
    assert!(after
        .iter()
        .any(|m| matches!(m, Mutation::EditMessage { channel, .. } if channel == &channel_id)));
    assert!(!after
        .iter()
        .any(|m| matches!(m, Mutation::SendMessage { channel } if channel == &channel_id)));

    let pinned = harness.guild.pinned_messages(&channel_id).await?;
    assert!(pinned[0].embeds[0]
        .fields
        .iter()
        .any(|field| field.name == "Answer" && field.value == "EUREKA"));
    Ok(())
}

#[tokio::test]
async fn test_platform_failure_does_not_abort_other_actions() -> Result<()> {
    let mut harness = Harness::new().await?;
    let round = harness.hunt.add_round("Round", "", None)?;
    let puzzle = harness.hunt.add_puzzle("P", "", &round)?;

    harness.guild.fail_on("send_message");
    let report = harness.reconciler.full_resync().await?;

    assert!(!report.all_succeeded());
    assert!(harness.hunt.round(&round)?.association().is_some());
    assert!(harness.hunt.puzzle(&puzzle)?.association().is_some());
    assert!(harness.hunt.puzzle(&puzzle)?.sheet_id().is_some());
    Ok(())
}

#[tokio::test]
async fn test_document_failure_is_returned() -> Result<()> {
    let harness = Harness::new().await?;
    let round = harness.hunt.add_round("Round", "", None)?;
    let before = harness.hunt.snapshot();
    harness.hunt.add_puzzle("P", "", &round)?;
    let after = harness.hunt.snapshot();

    harness.hunt.dispose();
    let result = harness
        .reconciler
        .handle(&ChangeNotification::new(before, after))
        .await;

    assert!(result.is_err_and(|e| e.is_document()));
    Ok(())
}

#[tokio::test]
async fn test_unassociated_deletion_touches_nothing() -> Result<()> {
    let mut harness = Harness::new().await?;
    harness.guild.fail_on("create_role");
    let round = harness.hunt.add_round("Never Linked", "", None)?;
    harness.drain().await?;
    let mark = harness.guild.mutation_count();

    harness.hunt.delete(&round)?;
    harness.drain().await?;
    assert_eq!(harness.guild.mutation_count(), mark);
    Ok(())
}
