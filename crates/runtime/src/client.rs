//! The bot client: routes platform events to hunt sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use belle_core::{ChannelId, GuildId};
use belle_model::{DocumentId, DocumentService, NodeHandle, Puzzlehunt, walk};
use belle_reconciler::{
    ChannelKind, ChatPlatform, Guild, HuntBinding, PlatformExecutor, Reconciler, SheetService,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheConfig, DocumentCache};
use crate::commands::{self, Command, HuntSession};
use crate::context::{find_context, HuntContext};
use crate::error::{Error, Result};
use crate::interaction::Interaction;
use crate::queue::DocumentQueue;
use crate::registry::{WorkKind, WorkRegistry};
use crate::toggles::{self, ComponentAction};

/// Which guilds the bot serves.
///
/// A non-empty allow list admits only the guilds on it; otherwise every
/// guild not on the block list is served.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildFilter {
    #[serde(default)]
    pub allowed: Vec<GuildId>,
    #[serde(default)]
    pub blocked: Vec<GuildId>,
}

impl GuildFilter {
    pub fn allows(&self, guild: &GuildId) -> bool {
        if self.allowed.is_empty() {
            !self.blocked.contains(guild)
        } else {
            self.allowed.contains(guild)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub cache: CacheConfig,
    pub guilds: GuildFilter,
}

/// A text channel was dragged between categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub kind: ChannelKind,
    pub old_parent: Option<ChannelId>,
    pub new_parent: Option<ChannelId>,
}

/// Shared state behind every command and platform event.
pub struct BelleClient {
    platform: Arc<dyn ChatPlatform>,
    documents: Arc<dyn DocumentService>,
    sheets: Arc<dyn SheetService>,
    cache: Arc<DocumentCache>,
    registry: WorkRegistry,
    guilds: GuildFilter,
    queues: Mutex<HashMap<DocumentId, Weak<DocumentQueue>>>,
    this: Weak<BelleClient>,
}

impl BelleClient {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        documents: Arc<dyn DocumentService>,
        sheets: Arc<dyn SheetService>,
        config: ClientConfig,
    ) -> Arc<Self> {
        Self::with_registry(platform, documents, sheets, config, WorkRegistry::new())
    }

    pub fn with_registry(
        platform: Arc<dyn ChatPlatform>,
        documents: Arc<dyn DocumentService>,
        sheets: Arc<dyn SheetService>,
        config: ClientConfig,
        registry: WorkRegistry,
    ) -> Arc<Self> {
        let cache = DocumentCache::new(Arc::clone(&documents), config.cache);
        Arc::new_cyclic(|this| Self {
            platform,
            documents,
            sheets,
            cache,
            registry,
            guilds: config.guilds,
            queues: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    pub fn platform(&self) -> &Arc<dyn ChatPlatform> {
        &self.platform
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    pub fn registry(&self) -> &WorkRegistry {
        &self.registry
    }

    /// Resolve once every dispatched command, event and reconciliation is
    /// done.
    pub async fn ensure_pending_work_processed(&self) {
        self.registry.ensure_pending_work_processed().await;
    }

    /// Let pending work finish, then close every open document.
    pub async fn shutdown(&self) {
        self.registry.ensure_pending_work_processed().await;
        self.cache.shutdown().await;
        info!("Client shut down");
    }

    async fn guild(&self, id: &GuildId) -> Result<Arc<dyn Guild>> {
        self.platform
            .guild(id)
            .await?
            .ok_or_else(|| Error::guild_unavailable(id.as_str()))
    }

    /// The live queue of an open document.
    pub fn queue(&self, id: &DocumentId) -> Option<Arc<DocumentQueue>> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(Weak::upgrade)
    }

    /// Wire a freshly loaded hunt to its reconciler. Runs under the cache
    /// lock, once per loaded document instance.
    fn attach(&self, hunt: &Puzzlehunt, guild: Arc<dyn Guild>, binding: HuntBinding) {
        let executor = PlatformExecutor::new(
            hunt.clone(),
            guild,
            Arc::clone(&self.sheets),
            self.platform.bot_user_id().clone(),
            binding,
        );
        let reconciler = Reconciler::new(Arc::new(executor));
        let queue = DocumentQueue::spawn(hunt.id().clone(), Arc::new(reconciler), self.registry.clone());
        hunt.document().subscribe(queue.clone());

        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.retain(|_, queue| queue.strong_count() > 0);
        queues.insert(hunt.id().clone(), Arc::downgrade(&queue));
        debug!(document_id = %hunt.id(), "Attached reconciler to document");
    }

    /// Open the hunt described by `context` through the cache.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be opened or its queue is gone.
    pub async fn session(&self, guild: Arc<dyn Guild>, context: HuntContext) -> Result<HuntSession> {
        let id = context.context.fluid_file_id.clone();
        let binding = context.context.binding();
        let hunt = self
            .cache
            .get_or_load(&id, |hunt| self.attach(hunt, Arc::clone(&guild), binding))
            .await?;
        let queue = self.queue(&id).ok_or_else(|| Error::queue_closed(id.as_str()))?;
        Ok(HuntSession {
            hunt,
            guild,
            context,
            queue,
            documents: Arc::clone(&self.documents),
            sheets: Arc::clone(&self.sheets),
        })
    }

    /// Open the hunt of `guild_id`, or `None` when the guild has none.
    ///
    /// # Errors
    ///
    /// Fails when the guild is unavailable or the context is unreadable.
    pub async fn open_guild(&self, guild_id: &GuildId) -> Result<Option<HuntSession>> {
        let guild = self.guild(guild_id).await?;
        let lookup = find_context(guild.as_ref(), self.platform.bot_user_id()).await?;
        match lookup.into_found() {
            Some(context) => Ok(Some(self.session(guild, context).await?)),
            None => Ok(None),
        }
    }

    /// Run `command` in the background. Returns `None` for filtered guilds.
    pub fn dispatch_command(
        &self,
        command: Command,
        interaction: Arc<dyn Interaction>,
    ) -> Option<JoinHandle<()>> {
        if !self.guilds.allows(interaction.guild_id()) {
            debug!(guild_id = %interaction.guild_id(), "Ignoring command from filtered guild");
            return None;
        }
        let client = self.this.upgrade()?;
        let origin = Arc::clone(&interaction);
        Some(self.registry.push(
            WorkKind::Command,
            async move { client.run_command(command, origin.as_ref()).await },
            Some(interaction),
        ))
    }

    /// Run a command to completion.
    ///
    /// # Errors
    ///
    /// Fails when the guild, the document or a platform call fails.
    pub async fn run_command(&self, command: Command, interaction: &dyn Interaction) -> Result<()> {
        let guild = self.guild(interaction.guild_id()).await?;
        let command = match command {
            Command::Create { name, folder_link } => {
                return commands::create_hunt(
                    guild.as_ref(),
                    self.platform.bot_user_id(),
                    self.documents.as_ref(),
                    &name,
                    &folder_link,
                    interaction,
                )
                .await;
            }
            Command::Hunt(command) => command,
        };

        let Some(session) = self.interaction_session(guild, interaction).await? else {
            return Ok(());
        };
        commands::execute(&session, command, interaction).await
    }

    /// Open the hunt an interaction's guild is bound to. A missing or
    /// unreadable context is explained to the user and yields `None`.
    async fn interaction_session(
        &self,
        guild: Arc<dyn Guild>,
        interaction: &dyn Interaction,
    ) -> Result<Option<HuntSession>> {
        let lookup = find_context(guild.as_ref(), self.platform.bot_user_id()).await?;
        if let Some(problem) = lookup.problem() {
            interaction.reply(problem).await?;
            return Ok(None);
        }
        match lookup.into_found() {
            Some(context) => Ok(Some(self.session(guild, context).await?)),
            None => Ok(None),
        }
    }

    /// Handle a button press or menu selection in the background. Returns
    /// `None` for filtered guilds.
    pub fn dispatch_component(
        &self,
        action: ComponentAction,
        interaction: Arc<dyn Interaction>,
    ) -> Option<JoinHandle<()>> {
        if !self.guilds.allows(interaction.guild_id()) {
            return None;
        }
        let client = self.this.upgrade()?;
        let origin = Arc::clone(&interaction);
        Some(self.registry.push(
            WorkKind::Command,
            async move { client.run_component(action, origin.as_ref()).await },
            Some(interaction),
        ))
    }

    /// Run a component action to completion.
    ///
    /// # Errors
    ///
    /// Fails when the guild, the document or a role change fails.
    pub async fn run_component(
        &self,
        action: ComponentAction,
        interaction: &dyn Interaction,
    ) -> Result<()> {
        let guild = self.guild(interaction.guild_id()).await?;
        let Some(session) = self.interaction_session(guild, interaction).await? else {
            return Ok(());
        };
        toggles::execute(&session, action, interaction).await
    }

    /// Handle a channel move in the background. Returns `None` for filtered
    /// guilds.
    pub fn dispatch_channel_update(&self, update: ChannelUpdate) -> Option<JoinHandle<()>> {
        if !self.guilds.allows(&update.guild_id) {
            return None;
        }
        let client = self.this.upgrade()?;
        Some(self.registry.push(
            WorkKind::ChannelUpdate,
            async move { client.handle_channel_update(&update).await },
            None,
        ))
    }

    /// Move the puzzle of a re-parented text channel to the round owning
    /// its new category.
    ///
    /// # Errors
    ///
    /// Fails when the hunt cannot be opened or the move edit fails.
    pub async fn handle_channel_update(&self, update: &ChannelUpdate) -> Result<()> {
        let (Some(old_parent), Some(new_parent)) = (&update.old_parent, &update.new_parent) else {
            return Ok(());
        };
        if update.kind != ChannelKind::Text || old_parent == new_parent {
            return Ok(());
        }
        let Some(session) = self.open_guild(&update.guild_id).await? else {
            return Ok(());
        };

        let nodes = walk(&session.hunt.snapshot());
        let puzzle = nodes.iter().find_map(|node| match node {
            NodeHandle::Puzzle(puzzle)
                if puzzle
                    .association()
                    .is_some_and(|association| association.channel_id == update.channel_id) =>
            {
                Some(puzzle)
            }
            _ => None,
        });
        let round = nodes.iter().find_map(|node| match node {
            NodeHandle::Round(round)
                if round
                    .association()
                    .is_some_and(|association| &association.channel_id == new_parent) =>
            {
                Some(round)
            }
            _ => None,
        });
        let (Some(puzzle), Some(round)) = (puzzle, round) else {
            return Ok(());
        };
        if puzzle.round_id().as_ref() == Some(round.id()) {
            return Ok(());
        }

        info!(
            puzzle = puzzle.name(),
            round = round.name(),
            "Moving puzzle to follow its channel"
        );
        session.hunt.move_node(puzzle.id(), round.id())?;
        Ok(())
    }
}
