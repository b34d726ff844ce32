//! The user interaction a command arrived on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use belle_core::{ChannelId, GuildId, UserId};

use crate::error::Result;

/// A slash-command invocation that can be answered once with plain text.
#[async_trait]
pub trait Interaction: Send + Sync {
    fn guild_id(&self) -> &GuildId;

    fn channel_id(&self) -> &ChannelId;

    fn user_id(&self) -> &UserId;

    /// Whether a reply has already been sent.
    fn replied(&self) -> bool;

    /// Send the reply.
    async fn reply(&self, content: &str) -> Result<()>;
}

/// Interaction that records its replies, for tests and local tooling.
pub struct RecordingInteraction {
    guild_id: GuildId,
    channel_id: ChannelId,
    user_id: UserId,
    replied: AtomicBool,
    replies: Mutex<Vec<String>>,
}

impl RecordingInteraction {
    pub fn new(guild_id: GuildId, channel_id: ChannelId, user_id: UserId) -> Self {
        Self {
            guild_id,
            channel_id,
            user_id,
            replied: AtomicBool::new(false),
            replies: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(&self) -> Vec<String> {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent reply.
    pub fn last_reply(&self) -> Option<String> {
        self.replies().pop()
    }
}

#[async_trait]
impl Interaction for RecordingInteraction {
    fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }

    async fn reply(&self, content: &str) -> Result<()> {
        self.replied.store(true, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(content.to_owned());
        Ok(())
    }
}
