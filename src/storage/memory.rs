//! In-memory state store for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::pipeline::{CacheSnapshot, RegistrySnapshot};
use crate::storage::StateStore;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    pub registry: Mutex<RegistrySnapshot>,
    pub cache: Mutex<CacheSnapshot>,
    pub registry_saves: Mutex<usize>,
    pub cache_saves: Mutex<usize>,
    pub fail_writes: bool,
}

impl MemoryStorage {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            return Err(AppError::Io(std::io::Error::other("disk full")));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStorage {
    async fn load_registry(&self) -> Result<RegistrySnapshot> {
        Ok(self.registry.lock().unwrap().clone())
    }

    async fn save_registry(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        self.check_writable()?;
        *self.registry.lock().unwrap() = snapshot.clone();
        *self.registry_saves.lock().unwrap() += 1;
        Ok(())
    }

    async fn load_cache(&self) -> Result<CacheSnapshot> {
        Ok(self.cache.lock().unwrap().clone())
    }

    async fn save_cache(&self, snapshot: &CacheSnapshot) -> Result<()> {
        self.check_writable()?;
        *self.cache.lock().unwrap() = snapshot.clone();
        *self.cache_saves.lock().unwrap() += 1;
        Ok(())
    }
}
