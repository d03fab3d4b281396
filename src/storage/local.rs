//! Local filesystem storage implementation.
//!
//! Keeps the registry and the cache as two JSON documents under a root
//! directory. Writes go to a temporary file first and are renamed into place,
//! so a crash never leaves a half-written state file behind.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── volume.json   # {"8045": [{"UserID": 1, "ChatID": 11}]}
//! └── cache.json    # {"8045": ["<sha256-hex>", ...]}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Region, StorageConfig};
use crate::pipeline::{CacheSnapshot, RegistrySnapshot};
use crate::storage::StateStore;

/// Fingerprints of one region as found on disk.
///
/// Older cache files map each fingerprint to a flag. Those fingerprints were
/// computed over a different rendering and can never match again, so they
/// are dropped on load; the affected regions get their active warnings
/// delivered once more.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredFingerprints {
    Current(BTreeSet<String>),
    Legacy(BTreeMap<String, bool>),
}

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    registry_file: String,
    cache_file: String,
}

impl LocalStorage {
    /// Create a LocalStorage rooted at the given directory with the default
    /// file names.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self::from_config(&StorageConfig {
            dir: root_dir.into(),
            ..StorageConfig::default()
        })
    }

    /// Create a LocalStorage from the `[storage]` configuration section.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            root_dir: config.dir.clone(),
            registry_file: config.registry_file.clone(),
            cache_file: config.cache_file.clone(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StateStore for LocalStorage {
    async fn load_registry(&self) -> Result<RegistrySnapshot> {
        match self.read_json(&self.registry_file).await? {
            Some(snapshot) => Ok(snapshot),
            None => {
                log::warn!("No {} found, starting without subscribers", self.registry_file);
                Ok(RegistrySnapshot::new())
            }
        }
    }

    async fn save_registry(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        self.write_json(&self.registry_file, snapshot).await
    }

    async fn load_cache(&self) -> Result<CacheSnapshot> {
        let stored: Option<BTreeMap<Region, StoredFingerprints>> =
            self.read_json(&self.cache_file).await?;

        match stored {
            Some(stored) => Ok(stored
                .into_iter()
                .filter_map(|(region, fingerprints)| match fingerprints {
                    StoredFingerprints::Current(set) => Some((region, set)),
                    StoredFingerprints::Legacy(flags) => {
                        log::warn!(
                            "Discarding {} legacy cache entries for {}",
                            flags.len(),
                            region
                        );
                        None
                    }
                })
                .collect()),
            None => {
                log::warn!("No {} found, starting with an empty cache", self.cache_file);
                Ok(CacheSnapshot::new())
            }
        }
    }

    async fn save_cache(&self, snapshot: &CacheSnapshot) -> Result<()> {
        self.write_json(&self.cache_file, snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Subscriber;
    use tempfile::TempDir;

    fn region(code: &str) -> Region {
        Region::parse(code).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!tmp.path().join("test.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_files_are_empty_state() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("not-yet-created"));

        assert!(storage.load_registry().await.unwrap().is_empty());
        assert!(storage.load_cache().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_file_layout() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let mut snapshot = RegistrySnapshot::new();
        snapshot.insert(region("8045"), vec![Subscriber::new(1, 11)]);
        storage.save_registry(&snapshot).await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("volume.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"8045": [{"UserID": 1, "ChatID": 11}]}));

        assert_eq!(storage.load_registry().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_registry_accepts_lowercase_keys() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("volume.json"),
            r#"{"5621": [{"userID": 7, "chatID": 70}]}"#,
        )
        .unwrap();

        let storage = LocalStorage::new(tmp.path());
        let snapshot = storage.load_registry().await.unwrap();
        assert_eq!(snapshot[&region("5621")], vec![Subscriber::new(7, 70)]);
    }

    #[tokio::test]
    async fn test_cache_round_trip_with_custom_file_name() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::from_config(&StorageConfig {
            dir: tmp.path().to_path_buf(),
            cache_file: "seen.json".to_string(),
            ..StorageConfig::default()
        });

        let mut snapshot = CacheSnapshot::new();
        snapshot.insert(region("8045"), ["abc".to_string()].into_iter().collect());
        storage.save_cache(&snapshot).await.unwrap();

        assert!(tmp.path().join("seen.json").exists());
        assert_eq!(storage.load_cache().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_legacy_flag_maps_are_discarded() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("cache.json"),
            r#"{"8045": {"0cc175b9c0f1b6a831c399e269772661": true}, "5621": ["abc"]}"#,
        )
        .unwrap();

        let storage = LocalStorage::new(tmp.path());
        let snapshot = storage.load_cache().await.unwrap();
        assert!(!snapshot.contains_key(&region("8045")));
        assert_eq!(snapshot[&region("5621")].len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("volume.json"), "not json").unwrap();

        let storage = LocalStorage::new(tmp.path());
        assert!(matches!(
            storage.load_registry().await,
            Err(AppError::Json(_))
        ));
    }
}
