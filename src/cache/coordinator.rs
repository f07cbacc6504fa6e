//! Cache population protocol.
//!
//! The coordinator is the only component that reads or writes the artifact
//! store. Hits are served unchanged; misses render once and store the
//! result only on success, so a failed render is retried by the next
//! request. Store outages degrade to direct rendering instead of failing
//! the request.

use std::{future::Future, sync::Arc, time::Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{keys::ArtifactKey, store::ArtifactStore};

pub struct CacheCoordinator {
    store: Arc<dyn ArtifactStore>,
    in_flight: DashMap<ArtifactKey, Arc<Mutex<()>>>,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            in_flight: DashMap::new(),
        }
    }

    /// Serve `key` from cache, rendering and storing on miss.
    ///
    /// Concurrent misses for the same key are coalesced through a per-key
    /// mutex, so within one process a key is normally rendered at most
    /// once. This is best effort: rendering is deterministic and writes
    /// are idempotent, so correctness never depends on the coalescing.
    pub async fn fetch_or_render<F, Fut, E>(&self, key: &ArtifactKey, render: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        let started_at = Instant::now();

        let mut store_healthy = true;
        match self.lookup(key, &mut store_healthy).await {
            Some(bytes) => {
                metrics::counter!("disegno_cache_hit_total").increment(1);
                debug!(
                    target = "disegno::cache",
                    op = "fetch_or_render",
                    outcome = "hit",
                    path = %key.request_path(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "serving cached artifact"
                );
                return Ok(bytes);
            }
            None => {
                metrics::counter!("disegno_cache_miss_total").increment(1);
            }
        }

        let cell = {
            let entry = self.in_flight.entry(key.clone()).or_default();
            entry.value().clone()
        };
        let guard = cell.lock().await;

        // A coalesced waiter may find the artifact stored by the request
        // that held the lock before it.
        if store_healthy {
            if let Some(bytes) = self.lookup(key, &mut store_healthy).await {
                metrics::counter!("disegno_cache_hit_total").increment(1);
                debug!(
                    target = "disegno::cache",
                    op = "fetch_or_render",
                    outcome = "coalesced_hit",
                    path = %key.request_path(),
                    "artifact rendered by a concurrent request"
                );
                drop(guard);
                self.release(key);
                return Ok(bytes);
            }
        }

        let rendered = render().await;

        if let Ok(bytes) = &rendered {
            if store_healthy {
                if let Err(err) = self.store.put(key, bytes.clone()).await {
                    metrics::counter!("disegno_cache_store_error_total").increment(1);
                    warn!(
                        target = "disegno::cache",
                        op = "fetch_or_render",
                        outcome = "store_write_failed",
                        path = %key.request_path(),
                        error = %err,
                        "artifact rendered but not cached"
                    );
                }
            }
            debug!(
                target = "disegno::cache",
                op = "fetch_or_render",
                outcome = "miss",
                path = %key.request_path(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "artifact rendered and stored"
            );
        }

        drop(guard);
        self.release(key);
        rendered
    }

    async fn lookup(&self, key: &ArtifactKey, store_healthy: &mut bool) -> Option<Bytes> {
        match self.store.get(key).await {
            Ok(found) => found,
            Err(err) => {
                *store_healthy = false;
                metrics::counter!("disegno_cache_store_error_total").increment(1);
                warn!(
                    target = "disegno::cache",
                    op = "lookup",
                    path = %key.request_path(),
                    error = %err,
                    "artifact store unreachable; rendering without cache"
                );
                None
            }
        }
    }

    fn release(&self, key: &ArtifactKey) {
        // Two strong counts left means the map and this request are the
        // only holders; any higher count is a waiter still queued.
        self.in_flight
            .remove_if(key, |_, value| Arc::strong_count(value) <= 2);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::store::{MemoryStore, StoreError};
    use crate::domain::format::RenderFormat;

    fn key(token: &str) -> ArtifactKey {
        ArtifactKey::new(RenderFormat::Svg, token)
    }

    fn coordinator() -> CacheCoordinator {
        let store = MemoryStore::new(std::num::NonZeroUsize::new(16).expect("capacity"));
        CacheCoordinator::new(Arc::new(store))
    }

    #[tokio::test]
    async fn second_request_bypasses_rendering() {
        let coordinator = coordinator();
        let renders = AtomicUsize::new(0);
        let k = key("Zmlyc3Q");

        for _ in 0..5 {
            let bytes = coordinator
                .fetch_or_render(&k, || async {
                    renders.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(Bytes::from_static(b"<svg/>"))
                })
                .await
                .expect("fetched");
            assert_eq!(bytes, Bytes::from_static(b"<svg/>"));
        }

        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn render_failure_is_never_cached() {
        let coordinator = coordinator();
        let attempts = AtomicUsize::new(0);
        let k = key("ZmFpbA");

        let first = coordinator
            .fetch_or_render(&k, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<Bytes, &str>("diagram syntax error")
            })
            .await;
        assert!(first.is_err());

        // The failed render left nothing behind; the retry renders again.
        let second = coordinator
            .fetch_or_render(&k, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(Bytes::from_static(b"ok"))
            })
            .await
            .expect("retried");
        assert_eq!(second, Bytes::from_static(b"ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn formats_are_cached_independently() {
        let coordinator = coordinator();
        let renders = AtomicUsize::new(0);

        for format in RenderFormat::ALL {
            let k = ArtifactKey::new(format, "c2hhcmVk");
            coordinator
                .fetch_or_render(&k, || async {
                    renders.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(Bytes::from_static(b"img"))
                })
                .await
                .expect("fetched");
        }

        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_render_at_most_once() {
        let coordinator = Arc::new(coordinator());
        let renders = Arc::new(AtomicUsize::new(0));
        let k = key("Y29uY3VycmVudA");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let renders = renders.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .fetch_or_render(&k, || async move {
                        renders.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Ok::<_, std::convert::Infallible>(Bytes::from_static(b"once"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(
                handle.await.expect("joined").expect("fetched"),
                Bytes::from_static(b"once")
            );
        }
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl ArtifactStore for BrokenStore {
        async fn get(&self, _key: &ArtifactKey) -> Result<Option<Bytes>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("store down")))
        }

        async fn put(&self, _key: &ArtifactKey, _bytes: Bytes) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("store down")))
        }
    }

    #[tokio::test]
    async fn store_outage_degrades_to_direct_rendering() {
        let coordinator = CacheCoordinator::new(Arc::new(BrokenStore));
        let renders = AtomicUsize::new(0);
        let k = key("ZG93bg");

        for _ in 0..2 {
            let bytes = coordinator
                .fetch_or_render(&k, || async {
                    renders.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(Bytes::from_static(b"direct"))
                })
                .await
                .expect("fetched despite outage");
            assert_eq!(bytes, Bytes::from_static(b"direct"));
        }

        // No cache to hit, so every request renders.
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }
}
