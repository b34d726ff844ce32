//! Open hunt documents, shared by every command and event touching a hunt.
//!
//! Documents stay open while they are in use and are disposed after a period
//! of inactivity. There is no capacity limit: a bot serving many hunts at
//! once keeps all of them open until their timers fire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use belle_model::{DocumentId, DocumentService, Puzzlehunt};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default inactivity timeout: 10 minutes.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Cache configuration.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// How long an unused document stays open.
    pub inactivity_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }
}

struct Entry {
    hunt: Puzzlehunt,
    generation: u64,
    eviction: JoinHandle<()>,
}

#[derive(Default)]
struct Entries {
    open: HashMap<DocumentId, Entry>,
    next_generation: u64,
    shut_down: bool,
}

/// Cache of open hunt documents keyed by document id.
pub struct DocumentCache {
    service: Arc<dyn DocumentService>,
    config: CacheConfig,
    entries: Mutex<Entries>,
    this: Weak<DocumentCache>,
}

/// Dispose a document once its local edits have been persisted.
async fn dispose_when_saved(hunt: Puzzlehunt) {
    let document = hunt.document();
    if document.is_dirty() {
        debug!(document_id = %hunt.id(), "Waiting for pending saves before disposing");
        document.saved().await;
    }
    document.dispose();
}

impl DocumentCache {
    pub fn new(service: Arc<dyn DocumentService>, config: CacheConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            service,
            config,
            entries: Mutex::new(Entries::default()),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of open documents.
    pub fn len(&self) -> usize {
        self.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.lock().open.contains_key(id)
    }

    /// Start the inactivity timer for `id`. Must be called with the lock held.
    fn schedule_eviction(&self, entries: &mut Entries, id: &DocumentId) -> (u64, JoinHandle<()>) {
        let generation = entries.next_generation;
        entries.next_generation += 1;

        let cache = self.this.clone();
        let timeout = self.config.inactivity_timeout;
        let id = id.clone();
        let eviction = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(hunt) = cache.upgrade().and_then(|cache| cache.expire(&id, generation)) else {
                return;
            };
            info!(document_id = %id, timeout_secs = timeout.as_secs(), "Closing document after inactivity");
            dispose_when_saved(hunt).await;
        });
        (generation, eviction)
    }

    /// Remove the entry if its timer was not reset since `generation`.
    fn expire(&self, id: &DocumentId, generation: u64) -> Option<Puzzlehunt> {
        let mut entries = self.lock();
        if entries.open.get(id)?.generation != generation {
            return None;
        }
        entries.open.remove(id).map(|entry| entry.hunt)
    }

    /// Return the cached hunt and reset its timer.
    fn touch(&self, id: &DocumentId) -> Option<Puzzlehunt> {
        let mut entries = self.lock();
        if !entries.open.contains_key(id) {
            return None;
        }
        let (generation, eviction) = self.schedule_eviction(&mut entries, id);
        let entry = entries.open.get_mut(id)?;
        entry.eviction.abort();
        entry.eviction = eviction;
        entry.generation = generation;
        Some(entry.hunt.clone())
    }

    /// Get an open hunt, loading it on a miss.
    ///
    /// `on_initial_load` runs once for the instance that ends up cached,
    /// before any other caller can observe it. It runs under the cache lock
    /// and must not call back into the cache.
    ///
    /// When two loads of the same id race, the one finishing second disposes
    /// its freshly opened document and returns the cached instance.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be opened or the cache is shut down.
    pub async fn get_or_load<F>(&self, id: &DocumentId, on_initial_load: F) -> Result<Puzzlehunt>
    where
        F: FnOnce(&Puzzlehunt),
    {
        if let Some(hunt) = self.touch(id) {
            debug!(document_id = %id, "Document cache hit");
            return Ok(hunt);
        }

        let loaded = Puzzlehunt::open(self.service.as_ref(), id).await?;

        let mut entries = self.lock();
        if entries.shut_down {
            drop(entries);
            loaded.dispose();
            return Err(Error::CacheShutdown);
        }
        if entries.open.contains_key(id) {
            drop(entries);
            debug!(document_id = %id, "Concurrent load lost the race, disposing duplicate");
            loaded.dispose();
            return self.touch(id).ok_or(Error::CacheShutdown);
        }

        on_initial_load(&loaded);
        let (generation, eviction) = self.schedule_eviction(&mut entries, id);
        entries.open.insert(
            id.clone(),
            Entry {
                hunt: loaded.clone(),
                generation,
                eviction,
            },
        );
        info!(document_id = %id, "Opened document");
        Ok(loaded)
    }

    /// Cancel every timer and dispose every open document.
    ///
    /// Documents with unsaved edits are disposed once they report saved.
    pub async fn shutdown(&self) {
        let open: Vec<Entry> = {
            let mut entries = self.lock();
            entries.shut_down = true;
            entries.open.drain().map(|(_, entry)| entry).collect()
        };
        info!(documents = open.len(), "Shutting down document cache");

        let disposals = open.into_iter().map(|entry| {
            entry.eviction.abort();
            dispose_when_saved(entry.hunt)
        });
        futures::future::join_all(disposals).await;
    }
}
