//! Background persistence task.
//!
//! Callers hand over snapshots through a [`PersistHandle`] and never wait
//! for the disk. Requests are written in the order they were issued; a
//! failed write is logged and the next request is processed as usual.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::pipeline::{CacheSnapshot, RegistrySnapshot};
use crate::storage::StateStore;

#[derive(Debug)]
enum PersistRequest {
    Registry(RegistrySnapshot),
    Cache(CacheSnapshot),
}

/// Cheap, cloneable sender side of the persister.
#[derive(Debug, Clone)]
pub struct PersistHandle {
    tx: UnboundedSender<PersistRequest>,
}

impl PersistHandle {
    pub fn save_registry(&self, snapshot: RegistrySnapshot) {
        self.submit(PersistRequest::Registry(snapshot));
    }

    pub fn save_cache(&self, snapshot: CacheSnapshot) {
        self.submit(PersistRequest::Cache(snapshot));
    }

    fn submit(&self, request: PersistRequest) {
        if self.tx.send(request).is_err() {
            log::error!("Persister is not running, state change not saved");
        }
    }
}

/// Owner of the persistence task.
pub struct Persister {
    handle: PersistHandle,
    task: JoinHandle<()>,
}

impl Persister {
    /// Spawn the persistence task on the current runtime.
    pub fn spawn(store: Arc<dyn StateStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(store, rx));
        Self {
            handle: PersistHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> PersistHandle {
        self.handle.clone()
    }

    /// Wait until every queued request is written.
    ///
    /// Only completes once all handles obtained from [`Persister::handle`]
    /// are dropped as well.
    pub async fn shutdown(self) {
        drop(self.handle);
        if let Err(e) = self.task.await {
            log::error!("Persister task failed: {}", e);
        }
    }
}

async fn write_loop(store: Arc<dyn StateStore>, mut rx: UnboundedReceiver<PersistRequest>) {
    while let Some(request) = rx.recv().await {
        let result = match &request {
            PersistRequest::Registry(snapshot) => store.save_registry(snapshot).await,
            PersistRequest::Cache(snapshot) => store.save_cache(snapshot).await,
        };

        match (result, &request) {
            (Ok(()), PersistRequest::Registry(snapshot)) => {
                log::debug!("Saved registry ({} regions)", snapshot.len());
            }
            (Ok(()), PersistRequest::Cache(snapshot)) => {
                log::debug!("Saved cache ({} regions)", snapshot.len());
            }
            (Err(e), PersistRequest::Registry(_)) => {
                log::error!("Failed to persist registry: {}", e);
            }
            (Err(e), PersistRequest::Cache(_)) => {
                log::error!("Failed to persist cache: {}", e);
            }
        }
    }
    log::debug!("Persister stopped");
}
