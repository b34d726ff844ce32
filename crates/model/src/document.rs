//! Replicated document traits and the in-memory document service.
//!
//! The merge algorithm behind a real replicated document is out of scope;
//! the in-memory service keeps one authoritative snapshot per document and
//! fans every edit out to all open replicas, which is the behaviour the
//! rest of the system depends on.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use ulid::Ulid;

use crate::delta::ChangeNotification;
use crate::error::{Error, Result};
use crate::snapshot::{Change, NodeId, Snapshot};

/// Identifier of a replicated document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receives change notifications synchronously, in edit order.
///
/// Sinks run while the document is delivering an edit and must not call
/// back into the document; enqueue work instead.
pub trait ChangeSink: Send + Sync {
    fn on_change(&self, notification: ChangeNotification);
}

impl<F> ChangeSink for F
where
    F: Fn(ChangeNotification) + Send + Sync,
{
    fn on_change(&self, notification: ChangeNotification) {
        self(notification);
    }
}

/// One client's view of a replicated document.
#[async_trait]
pub trait ReplicatedDocument: Send + Sync {
    fn id(&self) -> &DocumentId;

    /// The latest merged snapshot.
    fn current_snapshot(&self) -> Snapshot;

    /// A fresh node id for use in an insert.
    fn generate_id(&self) -> NodeId;

    /// Apply a batch of changes atomically and notify every subscriber.
    ///
    /// # Errors
    ///
    /// Fails when the handle is disposed or the batch is invalid against the
    /// current snapshot.
    fn edit(&self, changes: Vec<Change>) -> Result<()>;

    fn subscribe(&self, sink: Arc<dyn ChangeSink>);

    /// Whether local edits are still waiting to be persisted.
    fn is_dirty(&self) -> bool;

    /// Resolves once no local edits are pending.
    async fn saved(&self);

    /// Detach this handle. Further edits fail; no more notifications arrive.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Creates and opens replicated documents.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Create an empty document holding only a root node.
    async fn create_document(&self) -> Result<Arc<dyn ReplicatedDocument>>;

    /// Open a new handle on an existing document.
    async fn open_document(&self, id: &DocumentId) -> Result<Arc<dyn ReplicatedDocument>>;
}

struct SharedDocument {
    snapshot: Snapshot,
    replicas: Vec<Weak<InMemoryDocument>>,
}

/// A handle on a document held by [`InMemoryDocumentService`].
pub struct InMemoryDocument {
    id: DocumentId,
    shared: Arc<Mutex<SharedDocument>>,
    sinks: Mutex<Vec<Arc<dyn ChangeSink>>>,
    disposed: AtomicBool,
    dirty: watch::Sender<bool>,
    hold_saves: Arc<AtomicBool>,
    disposals: Arc<AtomicUsize>,
}

impl InMemoryDocument {
    fn deliver(&self, notification: &ChangeNotification) {
        if self.is_disposed() {
            return;
        }
        let sinks = self
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in sinks {
            sink.on_change(notification.clone());
        }
    }

    fn mark_saved(&self) {
        self.dirty.send_replace(false);
    }
}

#[async_trait]
impl ReplicatedDocument for InMemoryDocument {
    fn id(&self) -> &DocumentId {
        &self.id
    }

    fn current_snapshot(&self) -> Snapshot {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
    }

    fn generate_id(&self) -> NodeId {
        NodeId::generate()
    }

    fn edit(&self, changes: Vec<Change>) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::detached(self.id.as_str()));
        }
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let before = shared.snapshot.clone();
        let after = before.apply(&changes)?;
        shared.snapshot = after.clone();
        if self.hold_saves.load(Ordering::SeqCst) {
            self.dirty.send_replace(true);
        }

        tracing::trace!(document_id = %self.id, changes = changes.len(), "Applied edit");

        // Delivering under the lock keeps notification order equal to edit order.
        shared.replicas.retain(|replica| replica.strong_count() > 0);
        let notification = ChangeNotification::new(before, after);
        for replica in shared.replicas.iter().filter_map(Weak::upgrade) {
            replica.deliver(&notification);
        }
        Ok(())
    }

    fn subscribe(&self, sink: Arc<dyn ChangeSink>) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    fn is_dirty(&self) -> bool {
        *self.dirty.borrow()
    }

    async fn saved(&self) {
        let mut rx = self.dirty.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|dirty| !*dirty).await;
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::debug!(document_id = %self.id, "Disposed document handle");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Process-local document service for tests and local runs.
#[derive(Default)]
pub struct InMemoryDocumentService {
    documents: Mutex<HashMap<DocumentId, Arc<Mutex<SharedDocument>>>>,
    hold_saves: Arc<AtomicBool>,
    opened: AtomicUsize,
    disposals: Arc<AtomicUsize>,
}

impl InMemoryDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// While held, edits leave handles dirty until [`Self::release_saves`].
    pub fn hold_saves(&self, hold: bool) {
        self.hold_saves.store(hold, Ordering::SeqCst);
    }

    /// Mark every open handle as saved.
    pub fn release_saves(&self) {
        let documents = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for shared in documents.values() {
            let shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
            for replica in shared.replicas.iter().filter_map(Weak::upgrade) {
                replica.mark_saved();
            }
        }
    }

    /// Number of handles handed out by `open_document` and `create_document`.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of handles disposed so far.
    pub fn dispose_count(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    fn replica(&self, id: DocumentId, shared: &Arc<Mutex<SharedDocument>>) -> Arc<InMemoryDocument> {
        let (dirty, _) = watch::channel(false);
        let replica = Arc::new(InMemoryDocument {
            id,
            shared: Arc::clone(shared),
            sinks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            dirty,
            hold_saves: Arc::clone(&self.hold_saves),
            disposals: Arc::clone(&self.disposals),
        });
        shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replicas
            .push(Arc::downgrade(&replica));
        self.opened.fetch_add(1, Ordering::SeqCst);
        replica
    }
}

#[async_trait]
impl DocumentService for InMemoryDocumentService {
    async fn create_document(&self) -> Result<Arc<dyn ReplicatedDocument>> {
        let id = DocumentId::new(Ulid::new().to_string());
        let shared = Arc::new(Mutex::new(SharedDocument {
            snapshot: Snapshot::new(NodeId::generate()),
            replicas: Vec::new(),
        }));
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::clone(&shared));

        tracing::info!(document_id = %id, "Created document");
        Ok(self.replica(id, &shared))
    }

    async fn open_document(&self, id: &DocumentId) -> Result<Arc<dyn ReplicatedDocument>> {
        // Opening is asynchronous for real services; yield so concurrent
        // opens interleave the same way.
        tokio::task::yield_now().await;

        let shared = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::document_not_found(id.as_str()))?;
        Ok(self.replica(id.clone(), &shared))
    }
}
