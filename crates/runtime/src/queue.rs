//! Per-document work queue.
//!
//! Change notifications arrive synchronously while the document applies an
//! edit. Each one is enqueued immediately and handled by a single worker
//! task, so reconciliation of one document never overlaps and runs in
//! notification order. A full resync goes through the same queue.

use std::sync::Arc;

use async_trait::async_trait;
use belle_model::{ChangeNotification, ChangeSink, DocumentId};
use belle_reconciler::{ReconcileReport, Reconciler};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::{WorkGuard, WorkKind, WorkRegistry};

/// Work performed by a queue's worker.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, notification: &ChangeNotification) -> Result<ReconcileReport>;

    async fn resync(&self) -> Result<ReconcileReport>;
}

#[async_trait]
impl ChangeHandler for Reconciler {
    async fn handle(&self, notification: &ChangeNotification) -> Result<ReconcileReport> {
        Ok(Reconciler::handle(self, notification).await?)
    }

    async fn resync(&self) -> Result<ReconcileReport> {
        Ok(self.full_resync().await?)
    }
}

enum Job {
    Notification {
        notification: ChangeNotification,
        guard: WorkGuard,
    },
    Resync {
        done: oneshot::Sender<Result<ReconcileReport>>,
    },
}

/// Serializes all reconciliation work for one document.
pub struct DocumentQueue {
    document_id: DocumentId,
    jobs: mpsc::UnboundedSender<Job>,
    registry: WorkRegistry,
}

impl DocumentQueue {
    /// Start the worker. It runs until every handle on the queue is dropped,
    /// which happens once the document is disposed.
    pub fn spawn(
        document_id: DocumentId,
        handler: Arc<dyn ChangeHandler>,
        registry: WorkRegistry,
    ) -> Arc<Self> {
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            document_id.clone(),
            rx,
            handler,
            registry.clone(),
        ));
        Arc::new(Self {
            document_id,
            jobs,
            registry,
        })
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Queue a full resync behind any pending notifications and wait for it.
    ///
    /// # Errors
    ///
    /// Returns the resync's own error, or [`Error::QueueClosed`] when the
    /// worker is gone.
    pub async fn resync(&self) -> Result<ReconcileReport> {
        let (done, rx) = oneshot::channel();
        self.jobs
            .send(Job::Resync { done })
            .map_err(|_| Error::queue_closed(self.document_id.as_str()))?;
        rx.await
            .map_err(|_| Error::queue_closed(self.document_id.as_str()))?
    }
}

impl ChangeSink for DocumentQueue {
    fn on_change(&self, notification: ChangeNotification) {
        let guard = self.registry.begin(WorkKind::Reconcile);
        if self
            .jobs
            .send(Job::Notification {
                notification,
                guard,
            })
            .is_err()
        {
            warn!(document_id = %self.document_id, "Dropping change notification, queue is closed");
        }
    }
}

async fn run_worker(
    document_id: DocumentId,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    handler: Arc<dyn ChangeHandler>,
    registry: WorkRegistry,
) {
    debug!(document_id = %document_id, "Document queue started");
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Notification {
                notification,
                guard,
            } => {
                match handler.handle(&notification).await {
                    Ok(report) if !report.is_noop() => {
                        info!(
                            document_id = %document_id,
                            taken = report.actions_taken.len(),
                            failed = report.actions_failed.len(),
                            "Reconciled change"
                        );
                    }
                    Ok(_) => {}
                    Err(error) => registry.report(&error, guard.kind(), None).await,
                }
                drop(guard);
            }
            Job::Resync { done } => {
                let result = handler.resync().await;
                if done.send(result).is_err() {
                    debug!(document_id = %document_id, "Resync requester went away");
                }
            }
        }
    }
    debug!(document_id = %document_id, "Document queue stopped");
}
