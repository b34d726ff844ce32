//! Role toggles behind the buttons and menus on round index messages.
//!
//! Visibility is role based: a member sees a puzzle channel while holding
//! the puzzle's role, its round's role, or the hunt-wide all-puzzles role.

use std::collections::BTreeSet;

use belle_core::{ResultExt, RoleId};
use belle_model::{resolve, walk, NodeHandle, NodeId, PuzzleHandle, Snapshot};
use belle_reconciler::embeds::{HIDE_PUZZLES, SHOW_PUZZLES, TOGGLE_ALL, TOGGLE_ROUND};
use futures::future::try_join_all;
use tracing::info;

use crate::commands::HuntSession;
use crate::error::Result;
use crate::interaction::Interaction;

const NOTHING_SELECTED: &str = "No channels selected.";
const NOT_AN_INDEX_CHANNEL: &str = "This button only works in a round's index channel.";

/// What a pressed button or submitted menu asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentAction {
    /// Flip the round role of the index channel the button sits in.
    ToggleRound,
    /// Flip the hunt-wide all-puzzles role.
    ToggleAll,
    /// Grant the roles of the selected puzzles.
    ShowPuzzles(Vec<NodeId>),
    /// Drop the roles of the selected puzzles and of the rounds above them.
    HidePuzzles(Vec<NodeId>),
}

impl ComponentAction {
    /// Decode a component's custom id and selected values. `None` for
    /// components this bot did not create.
    pub fn parse(custom_id: &str, values: &[String]) -> Option<Self> {
        let selected = || values.iter().map(NodeId::new).collect();
        match custom_id {
            TOGGLE_ROUND => Some(Self::ToggleRound),
            TOGGLE_ALL => Some(Self::ToggleAll),
            SHOW_PUZZLES => Some(Self::ShowPuzzles(selected())),
            HIDE_PUZZLES => Some(Self::HidePuzzles(selected())),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ToggleRound => TOGGLE_ROUND,
            Self::ToggleAll => TOGGLE_ALL,
            Self::ShowPuzzles(_) => SHOW_PUZZLES,
            Self::HidePuzzles(_) => HIDE_PUZZLES,
        }
    }
}

fn round_role_for_index(snapshot: &Snapshot, channel: &belle_core::ChannelId) -> Option<RoleId> {
    walk(snapshot).into_iter().find_map(|node| match node {
        NodeHandle::Round(round) => round
            .association()
            .filter(|association| &association.index_channel_id == channel)
            .map(|association| association.role_id),
        _ => None,
    })
}

fn associated_puzzles(snapshot: &Snapshot, ids: &[NodeId]) -> Vec<PuzzleHandle> {
    ids.iter()
        .filter_map(|id| match resolve(snapshot, id)? {
            NodeHandle::Puzzle(puzzle) if puzzle.association().is_some() => Some(puzzle),
            _ => None,
        })
        .collect()
}

fn channel_count(count: usize) -> String {
    if count == 1 {
        "1 channel".to_string()
    } else {
        format!("{count} channels")
    }
}

/// Apply `action` for the member who triggered `interaction`.
///
/// # Errors
///
/// Fails when a role grant, a removal or the reply fails.
pub async fn execute(
    session: &HuntSession,
    action: ComponentAction,
    interaction: &dyn Interaction,
) -> Result<()> {
    let guild = session.guild.as_ref();
    let user = interaction.user_id();
    let snapshot = session.hunt.snapshot();
    info!(
        action = action.name(),
        guild_id = %interaction.guild_id(),
        user_id = %user,
        "Handling component"
    );
    let held: BTreeSet<RoleId> = guild
        .member_roles(user)
        .await
        .or_default_logged(None, "Failed to read member roles")
        .unwrap_or_default()
        .into_iter()
        .collect();

    match action {
        ComponentAction::ToggleRound => {
            let Some(role) = round_role_for_index(&snapshot, interaction.channel_id()) else {
                return interaction.reply(NOT_AN_INDEX_CHANNEL).await;
            };
            if held.contains(&role) {
                guild.remove_member_role(user, &role).await?;
                interaction
                    .reply("Only selected puzzles in this round will now be visible.")
                    .await
            } else {
                guild.add_member_role(user, &role).await?;
                interaction
                    .reply("All puzzles in this round are now visible.")
                    .await
            }
        }

        ComponentAction::ToggleAll => {
            let role = &session.context.context.all_puzzles_role_id;
            if held.contains(role) {
                guild.remove_member_role(user, role).await?;
                interaction.reply("Removed the \"all channels\" role.").await
            } else {
                guild.add_member_role(user, role).await?;
                interaction.reply("All channels are now visible.").await
            }
        }

        ComponentAction::ShowPuzzles(ids) => {
            let puzzles = associated_puzzles(&snapshot, &ids);
            if puzzles.is_empty() {
                return interaction.reply(NOTHING_SELECTED).await;
            }
            let roles: BTreeSet<RoleId> = puzzles
                .iter()
                .filter_map(|puzzle| puzzle.association())
                .map(|association| association.role_id)
                .filter(|role| !held.contains(role))
                .collect();
            try_join_all(roles.iter().map(|role| guild.add_member_role(user, role))).await?;
            interaction
                .reply(&format!("Subscribed to {}.", channel_count(puzzles.len())))
                .await
        }

        ComponentAction::HidePuzzles(ids) => {
            let puzzles = associated_puzzles(&snapshot, &ids);
            let Some(first) = puzzles.first() else {
                return interaction.reply(NOTHING_SELECTED).await;
            };
            // A held round role would keep the hidden puzzles visible.
            let rounds = first
                .ancestors()
                .into_iter()
                .filter_map(|round| round.association())
                .map(|association| association.role_id);
            let roles: BTreeSet<RoleId> = puzzles
                .iter()
                .filter_map(|puzzle| puzzle.association())
                .map(|association| association.role_id)
                .chain(rounds)
                .filter(|role| held.contains(role))
                .collect();
            try_join_all(roles.iter().map(|role| guild.remove_member_role(user, role))).await?;
            interaction
                .reply(&format!("Unsubscribed from {}.", channel_count(puzzles.len())))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_known_components() {
        assert_eq!(
            ComponentAction::parse(TOGGLE_ROUND, &[]),
            Some(ComponentAction::ToggleRound)
        );
        assert_eq!(
            ComponentAction::parse(SHOW_PUZZLES, &["a".to_string(), "b".to_string()]),
            Some(ComponentAction::ShowPuzzles(vec![NodeId::new("a"), NodeId::new("b")]))
        );
        assert_eq!(
            ComponentAction::parse(HIDE_PUZZLES, &[]),
            Some(ComponentAction::HidePuzzles(Vec::new()))
        );
        assert_eq!(ComponentAction::parse("somethingElse", &[]), None);
    }

    #[test]
    fn test_channel_counts() {
        assert_eq!(channel_count(1), "1 channel");
        assert_eq!(channel_count(3), "3 channels");
    }
}
