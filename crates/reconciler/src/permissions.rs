//! Channel visibility overwrites.
//!
//! Puzzle and round channels are hidden from `@everyone` and shown to the
//! node's own role, the hunt-wide all-puzzles role and the role of every
//! enclosing round. Index channels are readable by everyone and writable
//! only by the bot.

use belle_core::{RoleId, UserId};
use itertools::Itertools;

use crate::platform::{Overwrite, SEND_MESSAGES, VIEW_CHANNEL};

/// Roles that may view a node's channel.
pub fn view_roles(
    own: &RoleId,
    all_puzzles: &RoleId,
    ancestors: impl IntoIterator<Item = RoleId>,
) -> Vec<RoleId> {
    [own.clone(), all_puzzles.clone()]
        .into_iter()
        .chain(ancestors)
        .collect()
}

/// Overwrites for a puzzle or round channel, de-duplicated by id.
pub fn view_overwrites(bot: &UserId, everyone: &RoleId, roles: &[RoleId]) -> Vec<Overwrite> {
    [
        Overwrite::allow_member(bot, VIEW_CHANNEL),
        Overwrite::deny_role(everyone, VIEW_CHANNEL),
    ]
    .into_iter()
    .chain(roles.iter().map(|role| Overwrite::allow_role(role, VIEW_CHANNEL)))
    .unique_by(|overwrite| overwrite.id.clone())
    .collect()
}

/// Overwrites for a round's read-only index channel.
pub fn index_overwrites(bot: &UserId, everyone: &RoleId) -> Vec<Overwrite> {
    vec![
        Overwrite::deny_role(everyone, SEND_MESSAGES),
        Overwrite::allow_member(bot, SEND_MESSAGES),
    ]
}

/// Same ids with the same allow and deny bits, regardless of order.
pub fn equivalent(current: &[Overwrite], target: &[Overwrite]) -> bool {
    current.len() == target.len()
        && target.iter().all(|wanted| {
            current.iter().any(|have| {
                have.id == wanted.id && have.allow == wanted.allow && have.deny == wanted.deny
            })
        })
}
