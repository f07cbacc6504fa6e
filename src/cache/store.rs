//! Artifact storage backends.
//!
//! The durable store is modeled as an injected collaborator so tests can
//! substitute an in-memory stand-in. Two implementations ship: an LRU
//! memory store and a filesystem store that survives restarts.

use std::{
    io::{ErrorKind, Write},
    num::NonZeroUsize,
    path::PathBuf,
    sync::RwLock,
};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use thiserror::Error;
use tracing::error;

use super::keys::ArtifactKey;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key/value blob store for rendered artifacts.
///
/// Writes are idempotent overwrites of content-addressed keys, so no
/// locking is required across concurrent writers.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(&self, key: &ArtifactKey) -> Result<Option<Bytes>, StoreError>;
    async fn put(&self, key: &ArtifactKey, bytes: Bytes) -> Result<(), StoreError>;
}

// ============================================================================
// Memory store
// ============================================================================

/// In-memory LRU store. Bounded by entry count; eviction only re-exposes
/// the render path, it never changes what a key resolves to.
pub struct MemoryStore {
    entries: RwLock<LruCache<ArtifactKey, Bytes>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    fn with_entries<R>(&self, op: &'static str, f: impl FnOnce(&mut LruCache<ArtifactKey, Bytes>) -> R) -> R {
        let mut guard = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!(
                    target = "disegno::cache",
                    source = SOURCE,
                    op = op,
                    "artifact store lock poisoned; recovering"
                );
                poisoned.into_inner()
            }
        };
        f(&mut guard)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get(&self, key: &ArtifactKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self.with_entries("get", |entries| entries.get(key).cloned()))
    }

    async fn put(&self, key: &ArtifactKey, bytes: Bytes) -> Result<(), StoreError> {
        self.with_entries("put", |entries| {
            entries.put(key.clone(), bytes);
        });
        Ok(())
    }
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Filesystem-backed store: one file per artifact under a flat directory,
/// named by the key's content hash.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create the store, ensuring `root` exists.
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn artifact_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.storage_name())
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn get(&self, key: &ArtifactKey) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(self.artifact_path(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &ArtifactKey, bytes: Bytes) -> Result<(), StoreError> {
        let root = self.root.clone();
        let path = self.artifact_path(key);

        // Write-then-persist so readers never observe a partial artifact.
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut staged = tempfile::NamedTempFile::new_in(&root)?;
            staged.write_all(&bytes)?;
            staged.flush()?;
            match staged.persist(&path) {
                Ok(_) => Ok(()),
                // A concurrent writer won the race with identical bytes.
                Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(()),
                Err(err) => Err(err.error.into()),
            }
        })
        .await
        .map_err(|err| StoreError::Io(std::io::Error::other(err)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::format::RenderFormat;

    fn key(token: &str) -> ArtifactKey {
        ArtifactKey::new(RenderFormat::Svg, token)
    }

    #[tokio::test]
    async fn memory_store_serves_what_it_stored() {
        let store = MemoryStore::new(NonZeroUsize::new(8).expect("capacity"));
        let k = key("Zmlyc3Q");

        assert!(store.get(&k).await.expect("get").is_none());

        store.put(&k, Bytes::from_static(b"<svg/>")).await.expect("put");
        assert_eq!(
            store.get(&k).await.expect("get"),
            Some(Bytes::from_static(b"<svg/>"))
        );
    }

    #[tokio::test]
    async fn memory_store_evicts_least_recently_used() {
        let store = MemoryStore::new(NonZeroUsize::new(2).expect("capacity"));

        store.put(&key("YQ"), Bytes::from_static(b"a")).await.expect("put");
        store.put(&key("Yg"), Bytes::from_static(b"b")).await.expect("put");
        store.put(&key("Yw"), Bytes::from_static(b"c")).await.expect("put");

        assert!(store.get(&key("YQ")).await.expect("get").is_none());
        assert!(store.get(&key("Yg")).await.expect("get").is_some());
        assert!(store.get(&key("Yw")).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn fs_store_round_trips_artifacts() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let store = FsStore::new(dir.path().join("artifacts")).expect("store");
        let k = key("Zmxvd2NoYXJ0");

        assert!(store.get(&k).await.expect("get").is_none());

        store.put(&k, Bytes::from_static(b"<svg>ok</svg>")).await.expect("put");
        assert_eq!(
            store.get(&k).await.expect("get"),
            Some(Bytes::from_static(b"<svg>ok</svg>"))
        );
    }

    #[tokio::test]
    async fn fs_store_isolates_formats_of_one_token() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let store = FsStore::new(dir.path().to_path_buf()).expect("store");

        let svg = ArtifactKey::new(RenderFormat::Svg, "Zm9v");
        let png = ArtifactKey::new(RenderFormat::Png, "Zm9v");

        store.put(&svg, Bytes::from_static(b"vector")).await.expect("put");
        assert!(store.get(&png).await.expect("get").is_none());
    }
}
