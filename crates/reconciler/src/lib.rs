//! Keeps a chat guild in step with a puzzle hunt document.
//!
//! Every change notification from the hunt document is turned into a plan of
//! [`ReconcileAction`]s by the pure [`plan`] function and then executed
//! through an [`ActionExecutor`]:
//!
//! - **Removals**: roles and channels of deleted rounds and puzzles
//! - **Creations**: spreadsheets, roles and channels for new nodes, written
//!   back into the document as feedback edits
//! - **Syncs**: channel names, placement, pinned info messages and
//!   permission overwrites of changed nodes
//!
//! The chat platform and spreadsheet service are consumed through the
//! [`ChatPlatform`]/[`Guild`] and [`SheetService`] traits, with in-memory
//! implementations for tests and HTTP implementations for production.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use belle_reconciler::{
//!     HuntBinding, InMemoryPlatform, InMemorySheets, PlatformExecutor, Reconciler,
//! };
//!
//! let platform = InMemoryPlatform::new("bot");
//! let guild = platform.add_guild("guild");
//! let executor = PlatformExecutor::new(hunt, guild, Arc::new(InMemorySheets::new()), "bot".into(), binding);
//! let reconciler = Reconciler::new(Arc::new(executor));
//! reconciler.full_resync().await?;
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod discord;
pub mod embeds;
pub mod error;
pub mod executor;
pub mod memory;
pub mod naming;
pub mod permissions;
pub mod platform;
pub mod reconciler;
pub mod sheets;
pub mod types;

// Re-export main types
pub use discord::DiscordPlatform;
pub use error::{Error, Result};
pub use executor::{HuntBinding, PlatformExecutor};
pub use memory::{InMemoryGuild, InMemoryPlatform, Mutation};
pub use platform::{
    find_bot_pinned, ActionRow, Channel, ChannelKind, ChatPlatform, Component, Embed, EmbedField,
    Guild, Message, NewChannel, NewMessage, Overwrite, OverwriteKind, SelectOption,
};
pub use reconciler::{plan, plan_missing, plan_sync_all, ActionExecutor, RecordingExecutor, Reconciler};
pub use sheets::{DriveSheets, InMemorySheets, SheetService, SheetTab};
pub use types::{NodeKind, ReconcileAction, ReconcileReport};
