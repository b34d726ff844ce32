#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Belle
//!
//! Puzzle hunt bot: keeps a chat server's channels, roles and spreadsheets
//! in sync with a replicated hunt document, and serves the hunt context to
//! the web front end.

pub use belle_core;
pub use belle_model;
pub use belle_reconciler;
pub use belle_runtime;
pub use belle_web;

pub mod cli;
pub mod config;
