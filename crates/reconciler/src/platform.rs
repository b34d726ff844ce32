//! Chat platform collaborator: objects and the traits the reconciler drives.

use std::sync::Arc;

use async_trait::async_trait;
use belle_core::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Permission bit allowing a principal to see a channel.
pub const VIEW_CHANNEL: u64 = 1 << 10;
/// Permission bit allowing a principal to post in a channel.
pub const SEND_MESSAGES: u64 = 1 << 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Text,
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverwriteKind {
    Role,
    Member,
}

/// A per-channel permission override for a role or member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overwrite {
    pub id: String,
    pub kind: OverwriteKind,
    pub allow: u64,
    pub deny: u64,
}

impl Overwrite {
    pub fn allow_role(role: &RoleId, bits: u64) -> Self {
        Self {
            id: role.to_string(),
            kind: OverwriteKind::Role,
            allow: bits,
            deny: 0,
        }
    }

    pub fn deny_role(role: &RoleId, bits: u64) -> Self {
        Self {
            id: role.to_string(),
            kind: OverwriteKind::Role,
            allow: 0,
            deny: bits,
        }
    }

    pub fn allow_member(user: &UserId, bits: u64) -> Self {
        Self {
            id: user.to_string(),
            kind: OverwriteKind::Member,
            allow: bits,
            deny: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    pub parent_id: Option<ChannelId>,
    pub overwrites: Vec<Overwrite>,
}

/// Parameters for creating a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub parent_id: Option<ChannelId>,
    pub overwrites: Vec<Overwrite>,
}

impl NewChannel {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Text,
            parent_id: None,
            overwrites: Vec::new(),
        }
    }

    pub fn category(name: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::Category,
            ..Self::text(name)
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Option<ChannelId>) -> Self {
        self.parent_id = parent;
        self
    }

    #[must_use]
    pub fn with_overwrites(mut self, overwrites: Vec<Overwrite>) -> Self {
        self.overwrites = overwrites;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// Rich message content. Only the parts the bot renders are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

/// Interactive element attached to a message. Presses and selections come
/// back to the bot tagged with `custom_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    Button {
        custom_id: String,
        label: String,
    },
    /// Multi-select; any number of options, including none, may be picked.
    Select {
        custom_id: String,
        placeholder: String,
        options: Vec<SelectOption>,
    },
}

/// One horizontal row of components.
pub type ActionRow = Vec<Component>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub pinned: bool,
    pub embeds: Vec<Embed>,
    pub components: Vec<ActionRow>,
}

/// Body of a message to send or the replacement body of an edit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewMessage {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub components: Vec<ActionRow>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn embeds(embeds: Vec<Embed>) -> Self {
        Self {
            embeds,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_components(mut self, components: Vec<ActionRow>) -> Self {
        self.components = components;
        self
    }
}

/// One chat server, as seen by the bot.
#[async_trait]
pub trait Guild: Send + Sync {
    fn id(&self) -> &GuildId;

    async fn create_role(&self, name: &str) -> Result<RoleId>;
    async fn delete_role(&self, role: &RoleId) -> Result<()>;

    async fn create_channel(&self, channel: NewChannel) -> Result<Channel>;
    async fn delete_channel(&self, channel: &ChannelId) -> Result<()>;
    async fn rename_channel(&self, channel: &ChannelId, name: &str) -> Result<()>;
    async fn set_channel_parent(&self, channel: &ChannelId, parent: Option<&ChannelId>) -> Result<()>;
    async fn set_overwrites(&self, channel: &ChannelId, overwrites: &[Overwrite]) -> Result<()>;

    async fn channels(&self) -> Result<Vec<Channel>>;
    async fn channel(&self, channel: &ChannelId) -> Result<Option<Channel>>;

    async fn pinned_messages(&self, channel: &ChannelId) -> Result<Vec<Message>>;
    async fn send_message(&self, channel: &ChannelId, message: NewMessage) -> Result<Message>;
    async fn edit_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        body: NewMessage,
    ) -> Result<()>;
    async fn pin_message(&self, channel: &ChannelId, message: &MessageId) -> Result<()>;

    /// Roles held by `user`, or `None` when the user is not a member.
    async fn member_roles(&self, user: &UserId) -> Result<Option<Vec<RoleId>>>;
    async fn add_member_role(&self, user: &UserId, role: &RoleId) -> Result<()>;
    async fn remove_member_role(&self, user: &UserId, role: &RoleId) -> Result<()>;
}

/// Entry point to the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The bot's own user id.
    fn bot_user_id(&self) -> &UserId;

    /// A guild the bot is a member of.
    async fn guild(&self, id: &GuildId) -> Result<Option<Arc<dyn Guild>>>;

    /// Identify the user behind an OAuth bearer token.
    async fn resolve_bearer(&self, token: &str) -> Result<Option<UserId>>;
}

/// The pinned message the bot authored in a channel, if any.
pub fn find_bot_pinned<'a>(messages: &'a [Message], bot: &UserId) -> Option<&'a Message> {
    messages
        .iter()
        .find(|message| message.pinned && &message.author_id == bot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, author: &str, pinned: bool) -> Message {
        Message {
            id: id.into(),
            channel_id: "c".into(),
            author_id: author.into(),
            content: String::new(),
            pinned,
            embeds: Vec::new(),
            components: Vec::new(),
        }
    }

    #[test]
    fn test_find_bot_pinned_ignores_other_authors() {
        let bot = UserId::new("bot");
        let messages = vec![
            message("1", "someone", true),
            message("2", "bot", false),
            message("3", "bot", true),
        ];
        let found = find_bot_pinned(&messages, &bot).map(|m| m.id.as_str());
        assert_eq!(found, Some("3"));
    }

    #[test]
    fn test_overwrite_constructors() {
        let role = RoleId::new("r");
        assert_eq!(Overwrite::deny_role(&role, VIEW_CHANNEL).deny, VIEW_CHANNEL);
        assert_eq!(
            Overwrite::allow_member(&UserId::new("u"), SEND_MESSAGES).kind,
            OverwriteKind::Member
        );
    }
}
