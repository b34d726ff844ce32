//! Executes reconcile actions against a guild and the spreadsheet service.

use std::sync::Arc;

use async_trait::async_trait;
use belle_core::{ChannelId, RoleId, UserId};
use belle_model::{
    resolve, NodeHandle, NodeId, PuzzleAssociation, PuzzleHandle, Puzzlehunt, RoundAssociation,
    RoundHandle, Snapshot,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embeds;
use crate::error::{Error, Result};
use crate::naming;
use crate::permissions;
use crate::platform::{find_bot_pinned, Guild, NewChannel, NewMessage};
use crate::reconciler::ActionExecutor;
use crate::sheets::SheetService;
use crate::types::ReconcileAction;

/// Guild objects shared by every node of one hunt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuntBinding {
    /// Role that can see every puzzle and round channel.
    pub all_puzzles_role_id: RoleId,
    /// Category holding every round's index channel.
    pub index_category_id: ChannelId,
    /// Drive folder new spreadsheets are created in.
    pub sheet_folder_id: String,
}

/// Applies actions to a live guild, writing results back into the hunt.
pub struct PlatformExecutor {
    hunt: Puzzlehunt,
    guild: Arc<dyn Guild>,
    sheets: Arc<dyn SheetService>,
    bot_user_id: UserId,
    binding: HuntBinding,
}

/// Deleting something already gone counts as done.
fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::NotFound { kind, id }) => {
            debug!(kind, id = %id, "Already removed");
            Ok(())
        }
        other => other,
    }
}

impl PlatformExecutor {
    pub fn new(
        hunt: Puzzlehunt,
        guild: Arc<dyn Guild>,
        sheets: Arc<dyn SheetService>,
        bot_user_id: UserId,
        binding: HuntBinding,
    ) -> Self {
        Self {
            hunt,
            guild,
            sheets,
            bot_user_id,
            binding,
        }
    }

    pub fn hunt(&self) -> &Puzzlehunt {
        &self.hunt
    }

    pub fn guild(&self) -> &Arc<dyn Guild> {
        &self.guild
    }

    /// Re-read a node from the document's latest snapshot.
    fn current(&self, id: &NodeId) -> Option<NodeHandle> {
        resolve(&self.hunt.snapshot(), id)
    }

    fn view_overwrites(
        &self,
        own_role: &RoleId,
        ancestors: &[RoundHandle],
    ) -> Vec<crate::platform::Overwrite> {
        let ancestor_roles = ancestors
            .iter()
            .filter_map(RoundHandle::association)
            .map(|association| association.role_id);
        let roles =
            permissions::view_roles(own_role, &self.binding.all_puzzles_role_id, ancestor_roles);
        permissions::view_overwrites(&self.bot_user_id, &self.guild.id().everyone_role(), &roles)
    }

    /// Best-effort cleanup after a partial creation.
    async fn discard_role(&self, role_id: &RoleId) {
        if let Err(e) = self.guild.delete_role(role_id).await {
            warn!(role_id = %role_id, error = %e, "Failed to clean up role");
        }
    }

    async fn discard_channel(&self, channel_id: &ChannelId) {
        if let Err(e) = self.guild.delete_channel(channel_id).await {
            warn!(channel_id = %channel_id, error = %e, "Failed to clean up channel");
        }
    }

    async fn remove(
        &self,
        channel_id: &ChannelId,
        role_id: &RoleId,
        index_channel_id: Option<&ChannelId>,
    ) -> Result<()> {
        let index = async {
            match index_channel_id {
                Some(index) => self.guild.delete_channel(index).await,
                None => Ok(()),
            }
        };
        let (role, channel, index) = futures::join!(
            self.guild.delete_role(role_id),
            self.guild.delete_channel(channel_id),
            index,
        );
        ignore_missing(role)?;
        ignore_missing(channel)?;
        ignore_missing(index)
    }

    async fn create_sheet(&self, puzzle_id: &NodeId) -> Result<()> {
        let Some(NodeHandle::Puzzle(puzzle)) = self.current(puzzle_id) else {
            debug!(node_id = %puzzle_id, "Puzzle gone before sheet creation");
            return Ok(());
        };
        if puzzle.sheet_id().is_some() {
            return Ok(());
        }
        let sheet_id = self
            .sheets
            .create_sheet(puzzle.name(), &self.binding.sheet_folder_id)
            .await?;
        info!(node_id = %puzzle_id, sheet_id = %sheet_id, "Created spreadsheet");
        self.hunt.augment_with_sheet(puzzle_id, &sheet_id)?;
        Ok(())
    }

    async fn create_association(&self, node_id: &NodeId) -> Result<()> {
        match self.current(node_id) {
            Some(NodeHandle::Puzzle(puzzle)) => self.create_puzzle_channel(&puzzle).await,
            Some(NodeHandle::Round(round)) => self.create_round_channels(&round).await,
            _ => {
                debug!(node_id = %node_id, "Node gone before channel creation");
                Ok(())
            }
        }
    }

    async fn create_puzzle_channel(&self, puzzle: &PuzzleHandle) -> Result<()> {
        if puzzle.association().is_some() {
            debug!(node_id = %puzzle.id(), "Puzzle already has a channel");
            return Ok(());
        }

        let role_id = self.guild.create_role(puzzle.name()).await?;
        let parent = puzzle
            .round()
            .and_then(|round| round.association())
            .map(|association| association.channel_id);
        let channel = NewChannel::text(naming::puzzle_channel_name(
            puzzle.name(),
            puzzle.is_solved(),
        ))
        .with_parent(parent)
        .with_overwrites(self.view_overwrites(&role_id, &puzzle.ancestors()));

        let channel = match self.guild.create_channel(channel).await {
            Ok(channel) => channel,
            Err(e) => {
                self.discard_role(&role_id).await;
                return Err(e);
            }
        };

        info!(node_id = %puzzle.id(), channel_id = %channel.id, "Created puzzle channel");
        self.hunt.augment_puzzle(
            puzzle.id(),
            &PuzzleAssociation {
                channel_id: channel.id,
                role_id,
            },
        )?;
        Ok(())
    }

    async fn create_round_channels(&self, round: &RoundHandle) -> Result<()> {
        if round.association().is_some() {
            debug!(node_id = %round.id(), "Round already has channels");
            return Ok(());
        }

        let role_id = self.guild.create_role(round.name()).await?;
        let everyone = self.guild.id().everyone_role();
        let category = NewChannel::category(naming::round_category_name(round.name()))
            .with_overwrites(self.view_overwrites(&role_id, &round.ancestors()));
        let index = NewChannel::text(naming::round_index_name(round.name()))
            .with_parent(Some(self.binding.index_category_id.clone()))
            .with_overwrites(permissions::index_overwrites(&self.bot_user_id, &everyone));

        let (category, index) = futures::join!(
            self.guild.create_channel(category),
            self.guild.create_channel(index),
        );
        let (category, index) = match (category, index) {
            (Ok(category), Ok(index)) => (category, index),
            (Err(e), created) | (created, Err(e)) => {
                if let Ok(channel) = created {
                    self.discard_channel(&channel.id).await;
                }
                self.discard_role(&role_id).await;
                return Err(e);
            }
        };

        info!(
            node_id = %round.id(),
            category_id = %category.id,
            index_channel_id = %index.id,
            "Created round channels"
        );
        self.hunt.augment_round(
            round.id(),
            &RoundAssociation {
                channel_id: category.id,
                role_id,
                index_channel_id: index.id,
            },
        )?;
        Ok(())
    }

    async fn sync_permissions(&self, node_id: &NodeId) -> Result<()> {
        let (channel_id, overwrites) = match self.current(node_id) {
            Some(NodeHandle::Puzzle(puzzle)) => match puzzle.association() {
                Some(association) => (
                    association.channel_id,
                    self.view_overwrites(&association.role_id, &puzzle.ancestors()),
                ),
                None => return Ok(()),
            },
            Some(NodeHandle::Round(round)) => match round.association() {
                Some(association) => (
                    association.channel_id,
                    self.view_overwrites(&association.role_id, &round.ancestors()),
                ),
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        let channel = self
            .guild
            .channel(&channel_id)
            .await?
            .ok_or_else(|| Error::not_found("channel", channel_id.as_str()))?;
        if permissions::equivalent(&channel.overwrites, &overwrites) {
            return Ok(());
        }
        debug!(node_id = %node_id, channel_id = %channel_id, "Rewriting overwrites");
        self.guild.set_overwrites(&channel_id, &overwrites).await
    }

    async fn rename_if_needed(&self, channel_id: &ChannelId, name: &str) -> Result<()> {
        let channel = self
            .guild
            .channel(channel_id)
            .await?
            .ok_or_else(|| Error::not_found("channel", channel_id.as_str()))?;
        if channel.name == name {
            return Ok(());
        }
        self.guild.rename_channel(channel_id, name).await
    }

    async fn sync_embed(&self, channel_id: &ChannelId, target: NewMessage) -> Result<()> {
        let pinned = self.guild.pinned_messages(channel_id).await?;
        match find_bot_pinned(&pinned, &self.bot_user_id) {
            Some(message)
                if embeds::equivalent(&message.embeds, &target.embeds)
                    && message.components == target.components =>
            {
                Ok(())
            }
            Some(message) => {
                self.guild
                    .edit_message(channel_id, &message.id, target)
                    .await
            }
            None => {
                let sent = self.guild.send_message(channel_id, target).await?;
                self.guild.pin_message(channel_id, &sent.id).await
            }
        }
    }

    async fn sync_puzzle_channel(&self, puzzle: &PuzzleHandle) -> Result<()> {
        let Some(association) = puzzle.association() else {
            return Ok(());
        };
        let channel = self
            .guild
            .channel(&association.channel_id)
            .await?
            .ok_or_else(|| Error::not_found("channel", association.channel_id.as_str()))?;

        let name = naming::puzzle_channel_name(puzzle.name(), puzzle.is_solved());
        let rename = async {
            if channel.name == name {
                return Ok(());
            }
            self.guild.rename_channel(&channel.id, &name).await
        };

        let category = puzzle
            .round()
            .and_then(|round| round.association())
            .map(|association| association.channel_id);
        let reparent = async {
            match &category {
                Some(category) if channel.parent_id.as_ref() != Some(category) => {
                    debug!(channel_id = %channel.id, category_id = %category, "Moving puzzle channel");
                    self.guild.set_channel_parent(&channel.id, Some(category)).await
                }
                _ => Ok(()),
            }
        };

        let embed = self.sync_embed(
            &channel.id,
            NewMessage::embeds(vec![embeds::puzzle_embed(puzzle)]),
        );
        let (rename, reparent, embed) = futures::join!(rename, reparent, embed);
        rename?;
        reparent?;
        embed
    }

    async fn sync_round_channels(&self, round: &RoundHandle) -> Result<()> {
        let Some(association) = round.association() else {
            return Ok(());
        };
        let category_name = naming::round_category_name(round.name());
        let index_name = naming::round_index_name(round.name());
        let (category, index, embed) = futures::join!(
            self.rename_if_needed(&association.channel_id, &category_name),
            self.rename_if_needed(&association.index_channel_id, &index_name),
            self.sync_embed(
                &association.index_channel_id,
                NewMessage::embeds(vec![embeds::round_embed(round)])
                    .with_components(embeds::round_components(round))
            ),
        );
        category?;
        index?;
        embed
    }

    async fn sync_channel(&self, node_id: &NodeId) -> Result<()> {
        match self.current(node_id) {
            Some(NodeHandle::Puzzle(puzzle)) => self.sync_puzzle_channel(&puzzle).await,
            Some(NodeHandle::Round(round)) => self.sync_round_channels(&round).await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ActionExecutor for PlatformExecutor {
    async fn execute(&self, action: &ReconcileAction) -> Result<()> {
        match action {
            ReconcileAction::RemoveAssociation {
                node_id,
                channel_id,
                role_id,
                index_channel_id,
            } => {
                info!(node_id = %node_id, "Removing chat resources");
                self.remove(channel_id, role_id, index_channel_id.as_ref())
                    .await
            }
            ReconcileAction::CreateSheet { puzzle_id } => self.create_sheet(puzzle_id).await,
            ReconcileAction::CreateAssociation { node_id, .. } => {
                self.create_association(node_id).await
            }
            ReconcileAction::SyncPermissions { node_id } => self.sync_permissions(node_id).await,
            ReconcileAction::SyncChannel { node_id } => self.sync_channel(node_id).await,
        }
    }

    fn snapshot(&self) -> Snapshot {
        self.hunt.snapshot()
    }
}
