//! Tracks in-flight work so callers can wait for the bot to go quiet.
//!
//! Every command, channel update and queued reconciliation holds a
//! [`WorkGuard`] while it runs. Failures are routed to an [`ErrorHandler`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use belle_core::ResultExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

use crate::error::{Error, Result};
use crate::interaction::Interaction;

/// The source of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    Command,
    ChannelUpdate,
    Reconcile,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "command",
            Self::ChannelUpdate => "channel update",
            Self::Reconcile => "reconcile",
        };
        f.write_str(name)
    }
}

/// Receives failures of tracked work.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, error: &Error, kind: WorkKind, interaction: Option<&dyn Interaction>);
}

/// Logs the failure and tells the user something went wrong.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurfaceErrors;

#[async_trait]
impl ErrorHandler for SurfaceErrors {
    async fn handle(&self, error: &Error, kind: WorkKind, interaction: Option<&dyn Interaction>) {
        error!(kind = %kind, error = %error, "Tracked work failed");
        let Some(interaction) = interaction else {
            return;
        };
        if interaction.replied() {
            return;
        }
        let message = format!("There was an error while executing a {kind}!");
        interaction
            .reply(&message)
            .await
            .into_option_logged("Failed to report error to the user");
    }
}

/// Counts one unit of pending work until dropped.
pub struct WorkGuard {
    pending: Arc<watch::Sender<usize>>,
    kind: WorkKind,
}

impl WorkGuard {
    pub fn kind(&self) -> WorkKind {
        self.kind
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.pending
            .send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}

/// Registry of in-flight work.
#[derive(Clone)]
pub struct WorkRegistry {
    pending: Arc<watch::Sender<usize>>,
    handler: Arc<dyn ErrorHandler>,
}

impl Default for WorkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkRegistry {
    pub fn new() -> Self {
        Self::with_error_handler(Arc::new(SurfaceErrors))
    }

    pub fn with_error_handler(handler: Arc<dyn ErrorHandler>) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            pending: Arc::new(pending),
            handler,
        }
    }

    /// Number of units of work not yet finished.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Start tracking work that runs elsewhere.
    pub fn begin(&self, kind: WorkKind) -> WorkGuard {
        self.pending.send_modify(|pending| *pending += 1);
        WorkGuard {
            pending: Arc::clone(&self.pending),
            kind,
        }
    }

    /// Hand a failure to the error handler.
    pub async fn report(&self, error: &Error, kind: WorkKind, interaction: Option<&dyn Interaction>) {
        self.handler.handle(error, kind, interaction).await;
    }

    /// Spawn and track `work`. Its failure goes to the error handler.
    pub fn push<F>(
        &self,
        kind: WorkKind,
        work: F,
        interaction: Option<Arc<dyn Interaction>>,
    ) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let guard = self.begin(kind);
        let registry = self.clone();
        tokio::spawn(async move {
            if let Err(error) = work.await {
                registry
                    .report(&error, guard.kind(), interaction.as_deref())
                    .await;
            }
            drop(guard);
        })
    }

    /// Resolve once no tracked work is pending, including work started while
    /// waiting.
    pub async fn ensure_pending_work_processed(&self) {
        let mut rx = self.pending.subscribe();
        // The sender is owned by `self`, so the channel stays open.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }
}
