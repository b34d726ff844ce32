//! Core ids, errors, and result combinators shared by every Belle crate.
//!
//! Chat platform identifiers are opaque strings (snowflakes on Discord). They are wrapped in
//! newtypes so a role id can never be handed to an API expecting a channel id.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod ids;
pub mod result;

pub use error::Error;
pub use ids::{ChannelId, GuildId, MessageId, RoleId, UserId};
pub use result::{Result, ResultExt};
