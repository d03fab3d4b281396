//! Storage abstractions for bot state.
//!
//! The subscriber registry and the dedup cache are flushed after every
//! mutation and reloaded at startup.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml           # Bot configuration
//! ├── volume.json           # Region → subscribers
//! └── cache.json            # Region → delivered warning fingerprints
//! ```

pub mod local;
#[cfg(test)]
pub mod memory;
pub mod persister;

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::{CacheSnapshot, RegistrySnapshot};

pub use local::LocalStorage;
pub use persister::{PersistHandle, Persister};

/// Trait for state storage backends.
///
/// Missing state is not an error: loads return an empty snapshot.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_registry(&self) -> Result<RegistrySnapshot>;

    async fn save_registry(&self, snapshot: &RegistrySnapshot) -> Result<()>;

    async fn load_cache(&self) -> Result<CacheSnapshot>;

    async fn save_cache(&self, snapshot: &CacheSnapshot) -> Result<()>;
}
