//! The hunt context pinned in a guild's admin channel.
//!
//! A guild hosts at most one hunt. Its admin channel carries a pinned,
//! bot-authored message whose content is the JSON-serialized
//! [`SerializedHuntContext`].

use belle_core::{ChannelId, MessageId, RoleId, UserId};
use belle_model::DocumentId;
use belle_reconciler::{find_bot_pinned, ChannelKind, Guild, HuntBinding};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the bot's private admin channel.
pub const ADMIN_CHANNEL_NAME: &str = "belle-bot-admin";

/// Everything the bot needs to find a guild's hunt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedHuntContext {
    pub fluid_file_id: DocumentId,
    pub google_folder_id: String,
    /// The "Puzzle Index" category holding every round index channel.
    pub index_id: ChannelId,
    pub name: String,
    pub all_puzzles_role_id: RoleId,
}

impl SerializedHuntContext {
    pub fn binding(&self) -> HuntBinding {
        HuntBinding {
            all_puzzles_role_id: self.all_puzzles_role_id.clone(),
            index_category_id: self.index_id.clone(),
            sheet_folder_id: self.google_folder_id.clone(),
        }
    }

    /// Serialize for the pinned admin message.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn to_message(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::invalid_context(e.to_string()))
    }
}

/// A hunt context together with where it is pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuntContext {
    pub context: SerializedHuntContext,
    pub admin_channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Outcome of looking for a guild's hunt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextLookup {
    Found(HuntContext),
    NoAdminChannel,
    MultipleAdminChannels,
    MissingMessage,
}

impl ContextLookup {
    /// Text shown to a user when no usable context was found.
    pub fn problem(&self) -> Option<&'static str> {
        match self {
            Self::Found(_) => None,
            Self::NoAdminChannel => {
                Some("No puzzle hunt was found on this server. Create one with \"/create\".")
            }
            Self::MultipleAdminChannels => Some(
                "Multiple candidate admin channels were found. Please delete any excess channels named \"belle-bot-admin\".",
            ),
            Self::MissingMessage => Some(
                "The puzzle hunt information message is missing from the admin channel.",
            ),
        }
    }

    pub fn into_found(self) -> Option<HuntContext> {
        match self {
            Self::Found(found) => Some(found),
            _ => None,
        }
    }
}

/// Text channels named like the admin channel.
///
/// # Errors
///
/// Fails when listing channels fails.
pub async fn admin_channels(guild: &dyn Guild) -> Result<Vec<ChannelId>> {
    Ok(guild
        .channels()
        .await?
        .into_iter()
        .filter(|channel| channel.kind == ChannelKind::Text && channel.name == ADMIN_CHANNEL_NAME)
        .map(|channel| channel.id)
        .collect())
}

/// Read the hunt context of `guild`.
///
/// # Errors
///
/// Fails when a platform call fails or the pinned message is not a valid
/// context.
pub async fn find_context(guild: &dyn Guild, bot: &UserId) -> Result<ContextLookup> {
    let admin_channel_id = match admin_channels(guild).await?.as_slice() {
        [] => return Ok(ContextLookup::NoAdminChannel),
        [only] => only.clone(),
        _ => return Ok(ContextLookup::MultipleAdminChannels),
    };

    let pinned = guild.pinned_messages(&admin_channel_id).await?;
    let Some(message) = find_bot_pinned(&pinned, bot) else {
        debug!(guild_id = %guild.id(), "Admin channel has no bot-authored pin");
        return Ok(ContextLookup::MissingMessage);
    };

    let context: SerializedHuntContext = serde_json::from_str(&message.content)
        .map_err(|e| Error::invalid_context(e.to_string()))?;
    Ok(ContextLookup::Found(HuntContext {
        context,
        admin_channel_id,
        message_id: message.id.clone(),
    }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use belle_reconciler::{InMemoryPlatform, NewChannel};

    fn context() -> SerializedHuntContext {
        SerializedHuntContext {
            fluid_file_id: DocumentId::new("doc"),
            google_folder_id: "folder".to_owned(),
            index_id: ChannelId::new("index"),
            name: "Mystery Hunt".to_owned(),
            all_puzzles_role_id: RoleId::new("all"),
        }
    }

    #[test]
    fn test_serialized_with_camel_case_keys() {
        let json: serde_json::Value =
            serde_json::from_str(&context().to_message().unwrap()).unwrap();
        assert_eq!(json["fluidFileId"], "doc");
        assert_eq!(json["googleFolderId"], "folder");
        assert_eq!(json["indexId"], "index");
        assert_eq!(json["allPuzzlesRoleId"], "all");
    }

    #[tokio::test]
    async fn test_lookup_outcomes() -> Result<()> {
        let platform = InMemoryPlatform::new("bot");
        let guild = platform.add_guild("guild");
        let bot = UserId::new("bot");

        assert_eq!(find_context(guild.as_ref(), &bot).await?, ContextLookup::NoAdminChannel);

        let admin = guild
            .create_channel(NewChannel::text(ADMIN_CHANNEL_NAME))
            .await?;
        assert_eq!(find_context(guild.as_ref(), &bot).await?, ContextLookup::MissingMessage);

        guild.post_as(&admin.id, &UserId::new("someone"), &context().to_message()?, true);
        assert_eq!(find_context(guild.as_ref(), &bot).await?, ContextLookup::MissingMessage);

        let pinned = guild.post_as(&admin.id, &bot, &context().to_message()?, true);
        let found = find_context(guild.as_ref(), &bot).await?.into_found().unwrap();
        assert_eq!(found.context, context());
        assert_eq!(found.admin_channel_id, admin.id);
        assert_eq!(found.message_id, pinned);

        guild
            .create_channel(NewChannel::text(ADMIN_CHANNEL_NAME))
            .await?;
        let lookup = find_context(guild.as_ref(), &bot).await?;
        assert_eq!(lookup, ContextLookup::MultipleAdminChannels);
        assert!(lookup.problem().unwrap().starts_with("Multiple candidate"));
        Ok(())
    }

    #[tokio::test]
    async fn test_garbled_message_is_an_error() -> Result<()> {
        let platform = InMemoryPlatform::new("bot");
        let guild = platform.add_guild("guild");
        let admin = guild
            .create_channel(NewChannel::text(ADMIN_CHANNEL_NAME))
            .await?;
        guild.post_as(&admin.id, &UserId::new("bot"), "not json", true);

        let result = find_context(guild.as_ref(), &UserId::new("bot")).await;
        assert!(matches!(result, Err(Error::InvalidContext { .. })));
        Ok(())
    }
}
