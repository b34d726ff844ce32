//! Runtime for the Belle bot.
//!
//! - [`DocumentCache`]: open hunt documents, closed after inactivity
//! - [`DocumentQueue`]: one worker per document, reconciling change
//!   notifications strictly in order
//! - [`WorkRegistry`]: in-flight work tracking and error surfacing
//! - [`BelleClient`]: hunt context lookup, sessions, commands, role
//!   toggles and channel move handling

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cache;
pub mod client;
pub mod commands;
pub mod context;
pub mod error;
pub mod interaction;
pub mod queue;
pub mod registry;
pub mod toggles;

pub use cache::{CacheConfig, DocumentCache, DEFAULT_INACTIVITY_TIMEOUT};
pub use client::{BelleClient, ChannelUpdate, ClientConfig, GuildFilter};
pub use commands::{Command, EditField, HuntCommand, HuntSession};
pub use context::{
    find_context, ContextLookup, HuntContext, SerializedHuntContext, ADMIN_CHANNEL_NAME,
};
pub use error::{Error, Result};
pub use interaction::{Interaction, RecordingInteraction};
pub use queue::{ChangeHandler, DocumentQueue};
pub use registry::{ErrorHandler, SurfaceErrors, WorkGuard, WorkKind, WorkRegistry};
pub use toggles::ComponentAction;
