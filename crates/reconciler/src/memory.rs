//! In-memory chat platform for tests and local runs.
//!
//! Every mutating call is recorded so tests can assert on exactly which
//! platform operations a reconciliation performed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use belle_core::{ChannelId, GuildId, MessageId, RoleId, UserId};

use crate::error::{Error, Result};
use crate::platform::{Channel, ChatPlatform, Guild, Message, NewChannel, NewMessage, Overwrite};

/// A mutating call made against an [`InMemoryGuild`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateRole { name: String },
    DeleteRole { role: RoleId },
    CreateChannel { name: String },
    DeleteChannel { channel: ChannelId },
    RenameChannel { channel: ChannelId, name: String },
    SetParent { channel: ChannelId, parent: Option<ChannelId> },
    SetOverwrites { channel: ChannelId },
    SendMessage { channel: ChannelId },
    EditMessage { channel: ChannelId, message: MessageId },
    PinMessage { channel: ChannelId, message: MessageId },
    AddMemberRole { user: UserId, role: RoleId },
    RemoveMemberRole { user: UserId, role: RoleId },
}

impl Mutation {
    /// Operation name, as used by [`InMemoryGuild::fail_on`].
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateRole { .. } => "create_role",
            Self::DeleteRole { .. } => "delete_role",
            Self::CreateChannel { .. } => "create_channel",
            Self::DeleteChannel { .. } => "delete_channel",
            Self::RenameChannel { .. } => "rename_channel",
            Self::SetParent { .. } => "set_channel_parent",
            Self::SetOverwrites { .. } => "set_overwrites",
            Self::SendMessage { .. } => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::PinMessage { .. } => "pin_message",
            Self::AddMemberRole { .. } => "add_member_role",
            Self::RemoveMemberRole { .. } => "remove_member_role",
        }
    }
}

#[derive(Default)]
struct GuildState {
    roles: BTreeMap<RoleId, String>,
    channels: BTreeMap<ChannelId, Channel>,
    messages: BTreeMap<ChannelId, Vec<Message>>,
    members: HashMap<UserId, Vec<RoleId>>,
}

pub struct InMemoryGuild {
    id: GuildId,
    bot_user: UserId,
    state: Mutex<GuildState>,
    mutations: Mutex<Vec<Mutation>>,
    failing: Mutex<HashSet<&'static str>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryGuild {
    fn new(id: GuildId, bot_user: UserId, next_id: Arc<AtomicU64>) -> Self {
        let guild = Self {
            id,
            bot_user: bot_user.clone(),
            state: Mutex::new(GuildState::default()),
            mutations: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            next_id,
        };
        guild.add_member(&bot_user, Vec::new());
        guild
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GuildState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn record(&self, mutation: Mutation) -> Result<()> {
        let operation = mutation.operation();
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(operation)
        {
            return Err(Error::platform(operation, "injected failure"));
        }
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mutation);
        Ok(())
    }

    /// Every mutation performed so far, in call order.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Make every later call of `operation` fail.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation);
    }

    pub fn add_member(&self, user: &UserId, roles: Vec<RoleId>) {
        self.state().members.insert(user.clone(), roles);
    }

    pub fn role_name(&self, role: &RoleId) -> Option<String> {
        self.state().roles.get(role).cloned()
    }

    pub fn role_count(&self) -> usize {
        self.state().roles.len()
    }

    /// Snapshot of every channel, ordered by id.
    pub fn channel_list(&self) -> Vec<Channel> {
        self.state().channels.values().cloned().collect()
    }

    pub fn channel_named(&self, name: &str) -> Option<Channel> {
        self.state()
            .channels
            .values()
            .find(|channel| channel.name == name)
            .cloned()
    }

    /// Post a message as another user, without recording a mutation.
    pub fn post_as(&self, channel: &ChannelId, author: &UserId, content: &str, pinned: bool) -> MessageId {
        let id = MessageId::new(self.next_id());
        self.state()
            .messages
            .entry(channel.clone())
            .or_default()
            .push(Message {
                id: id.clone(),
                channel_id: channel.clone(),
                author_id: author.clone(),
                content: content.to_string(),
                pinned,
                embeds: Vec::new(),
                components: Vec::new(),
            });
        id
    }

    /// All messages in a channel, pinned or not.
    pub fn messages(&self, channel: &ChannelId) -> Vec<Message> {
        self.state().messages.get(channel).cloned().unwrap_or_default()
    }

    /// Move a channel without going through the recorded API, the way a
    /// user dragging it in the client would.
    pub fn move_externally(&self, channel: &ChannelId, parent: Option<&ChannelId>) -> Option<Channel> {
        let mut state = self.state();
        let entry = state.channels.get_mut(channel)?;
        entry.parent_id = parent.cloned();
        Some(entry.clone())
    }

    fn with_channel<T>(&self, channel: &ChannelId, f: impl FnOnce(&mut Channel) -> T) -> Result<T> {
        let mut state = self.state();
        state
            .channels
            .get_mut(channel)
            .map(f)
            .ok_or_else(|| Error::not_found("channel", channel.as_str()))
    }
}

#[async_trait]
impl Guild for InMemoryGuild {
    fn id(&self) -> &GuildId {
        &self.id
    }

    async fn create_role(&self, name: &str) -> Result<RoleId> {
        self.record(Mutation::CreateRole {
            name: name.to_string(),
        })?;
        let id = RoleId::new(self.next_id());
        self.state().roles.insert(id.clone(), name.to_string());
        Ok(id)
    }

    async fn delete_role(&self, role: &RoleId) -> Result<()> {
        self.record(Mutation::DeleteRole { role: role.clone() })?;
        let mut state = self.state();
        if state.roles.remove(role).is_none() {
            return Err(Error::not_found("role", role.as_str()));
        }
        for roles in state.members.values_mut() {
            roles.retain(|held| held != role);
        }
        Ok(())
    }

    async fn create_channel(&self, channel: NewChannel) -> Result<Channel> {
        self.record(Mutation::CreateChannel {
            name: channel.name.clone(),
        })?;
        let created = Channel {
            id: ChannelId::new(self.next_id()),
            name: channel.name,
            kind: channel.kind,
            parent_id: channel.parent_id,
            overwrites: channel.overwrites,
        };
        self.state()
            .channels
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn delete_channel(&self, channel: &ChannelId) -> Result<()> {
        self.record(Mutation::DeleteChannel {
            channel: channel.clone(),
        })?;
        let mut state = self.state();
        if state.channels.remove(channel).is_none() {
            return Err(Error::not_found("channel", channel.as_str()));
        }
        state.messages.remove(channel);
        // Children of a deleted category become top-level.
        for child in state.channels.values_mut() {
            if child.parent_id.as_ref() == Some(channel) {
                child.parent_id = None;
            }
        }
        Ok(())
    }

    async fn rename_channel(&self, channel: &ChannelId, name: &str) -> Result<()> {
        self.record(Mutation::RenameChannel {
            channel: channel.clone(),
            name: name.to_string(),
        })?;
        self.with_channel(channel, |c| c.name = name.to_string())
    }

    async fn set_channel_parent(&self, channel: &ChannelId, parent: Option<&ChannelId>) -> Result<()> {
        self.record(Mutation::SetParent {
            channel: channel.clone(),
            parent: parent.cloned(),
        })?;
        self.with_channel(channel, |c| c.parent_id = parent.cloned())
    }

    async fn set_overwrites(&self, channel: &ChannelId, overwrites: &[Overwrite]) -> Result<()> {
        self.record(Mutation::SetOverwrites {
            channel: channel.clone(),
        })?;
        self.with_channel(channel, |c| c.overwrites = overwrites.to_vec())
    }

    async fn channels(&self) -> Result<Vec<Channel>> {
        Ok(self.channel_list())
    }

    async fn channel(&self, channel: &ChannelId) -> Result<Option<Channel>> {
        Ok(self.state().channels.get(channel).cloned())
    }

    async fn pinned_messages(&self, channel: &ChannelId) -> Result<Vec<Message>> {
        let state = self.state();
        if !state.channels.contains_key(channel) {
            return Err(Error::not_found("channel", channel.as_str()));
        }
        Ok(state
            .messages
            .get(channel)
            .map(|messages| messages.iter().filter(|m| m.pinned).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(&self, channel: &ChannelId, message: NewMessage) -> Result<Message> {
        self.record(Mutation::SendMessage {
            channel: channel.clone(),
        })?;
        let mut state = self.state();
        if !state.channels.contains_key(channel) {
            return Err(Error::not_found("channel", channel.as_str()));
        }
        let sent = Message {
            id: MessageId::new(self.next_id()),
            channel_id: channel.clone(),
            author_id: self.bot_user.clone(),
            content: message.content,
            pinned: false,
            embeds: message.embeds,
            components: message.components,
        };
        state
            .messages
            .entry(channel.clone())
            .or_default()
            .push(sent.clone());
        Ok(sent)
    }

    async fn edit_message(&self, channel: &ChannelId, message: &MessageId, body: NewMessage) -> Result<()> {
        self.record(Mutation::EditMessage {
            channel: channel.clone(),
            message: message.clone(),
        })?;
        let mut state = self.state();
        let existing = state
            .messages
            .get_mut(channel)
            .and_then(|messages| messages.iter_mut().find(|m| &m.id == message))
            .ok_or_else(|| Error::not_found("message", message.as_str()))?;
        existing.content = body.content;
        existing.embeds = body.embeds;
        existing.components = body.components;
        Ok(())
    }

    async fn pin_message(&self, channel: &ChannelId, message: &MessageId) -> Result<()> {
        self.record(Mutation::PinMessage {
            channel: channel.clone(),
            message: message.clone(),
        })?;
        let mut state = self.state();
        let existing = state
            .messages
            .get_mut(channel)
            .and_then(|messages| messages.iter_mut().find(|m| &m.id == message))
            .ok_or_else(|| Error::not_found("message", message.as_str()))?;
        existing.pinned = true;
        Ok(())
    }

    async fn member_roles(&self, user: &UserId) -> Result<Option<Vec<RoleId>>> {
        Ok(self.state().members.get(user).cloned())
    }

    async fn add_member_role(&self, user: &UserId, role: &RoleId) -> Result<()> {
        self.record(Mutation::AddMemberRole {
            user: user.clone(),
            role: role.clone(),
        })?;
        let mut state = self.state();
        if !state.roles.contains_key(role) {
            return Err(Error::not_found("role", role.as_str()));
        }
        let held = state
            .members
            .get_mut(user)
            .ok_or_else(|| Error::not_found("member", user.as_str()))?;
        if !held.contains(role) {
            held.push(role.clone());
        }
        Ok(())
    }

    async fn remove_member_role(&self, user: &UserId, role: &RoleId) -> Result<()> {
        self.record(Mutation::RemoveMemberRole {
            user: user.clone(),
            role: role.clone(),
        })?;
        let mut state = self.state();
        let held = state
            .members
            .get_mut(user)
            .ok_or_else(|| Error::not_found("member", user.as_str()))?;
        held.retain(|r| r != role);
        Ok(())
    }
}

/// A platform hosting any number of [`InMemoryGuild`]s.
pub struct InMemoryPlatform {
    bot_user: UserId,
    guilds: Mutex<HashMap<GuildId, Arc<InMemoryGuild>>>,
    tokens: Mutex<HashMap<String, UserId>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryPlatform {
    pub fn new(bot_user: impl Into<UserId>) -> Self {
        Self {
            bot_user: bot_user.into(),
            guilds: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            next_id: Arc::new(AtomicU64::new(1000)),
        }
    }

    /// Add a guild the bot is a member of.
    pub fn add_guild(&self, id: impl Into<GuildId>) -> Arc<InMemoryGuild> {
        let id = id.into();
        let guild = Arc::new(InMemoryGuild::new(
            id.clone(),
            self.bot_user.clone(),
            Arc::clone(&self.next_id),
        ));
        self.guilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&guild));
        guild
    }

    /// Make `token` resolve to `user` in [`ChatPlatform::resolve_bearer`].
    pub fn register_token(&self, token: &str, user: impl Into<UserId>) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), user.into());
    }
}

#[async_trait]
impl ChatPlatform for InMemoryPlatform {
    fn bot_user_id(&self) -> &UserId {
        &self.bot_user
    }

    async fn guild(&self, id: &GuildId) -> Result<Option<Arc<dyn Guild>>> {
        let guild = self
            .guilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        Ok(guild.map(|g| g as Arc<dyn Guild>))
    }

    async fn resolve_bearer(&self, token: &str) -> Result<Option<UserId>> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned())
    }
}
