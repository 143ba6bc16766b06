//! SKU/Capacity Resolver
//!
//! Maps a machine type (plus optional zone or region) to a vCPU count. In
//! bulk mode the whole catalog is fetched on first use and shared for the
//! rest of the run. In lazy mode each distinct key is fetched once; hits and
//! misses are both cached, and concurrent callers asking for the same key
//! wait on the same fetch. Fetch errors are not cached.

use super::model::SkuKey;
use super::provider::{SkuCatalog, SkuMode};
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

pub struct SkuResolver {
    mode: SkuMode,
    catalog: OnceCell<Arc<SkuCatalog>>,
    entries: Mutex<HashMap<SkuKey, Arc<OnceCell<Option<u32>>>>>,
    lookups: AtomicUsize,
}

impl SkuResolver {
    pub fn new(mode: SkuMode) -> Self {
        Self {
            mode,
            catalog: OnceCell::new(),
            entries: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn mode(&self) -> SkuMode {
        self.mode
    }

    /// Number of underlying fetches issued so far
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Resolve one key, calling `fetch` only if no result is cached
    pub async fn resolve_lazy<F, Fut>(&self, key: &SkuKey, fetch: F) -> Result<Option<u32>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<u32>>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(key.clone()).or_default().clone()
        };

        let vcpus = cell
            .get_or_try_init(|| async {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                tracing::debug!("Resolving machine type {}", key);
                fetch().await
            })
            .await?;

        Ok(*vcpus)
    }

    /// Resolve one key against the catalog, loading it on first use
    pub async fn resolve_bulk<F, Fut>(&self, key: &SkuKey, load: F) -> Result<Option<u32>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SkuCatalog>>,
    {
        let catalog = self
            .catalog
            .get_or_try_init(|| async {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                let catalog = load().await?;
                tracing::info!("Loaded SKU catalog with {} entries", catalog.len());
                Ok::<_, anyhow::Error>(Arc::new(catalog))
            })
            .await?;

        Ok(catalog.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lazy_hit_is_cached() {
        let resolver = SkuResolver::new(SkuMode::Lazy);
        let key = SkuKey::new("n1-standard-4", Some("us-central1-a".into()));

        let first = resolver.resolve_lazy(&key, || async { Ok::<_, anyhow::Error>(Some(4)) }).await.unwrap();
        let second = resolver
            .resolve_lazy(&key, || async { Ok::<_, anyhow::Error>(Some(0)) })
            .await
            .unwrap();

        assert_eq!(first, Some(4));
        assert_eq!(second, Some(4));
        assert_eq!(resolver.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_lazy_miss_is_cached() {
        let resolver = SkuResolver::new(SkuMode::Lazy);
        let key = SkuKey::global("mystery");

        assert_eq!(resolver.resolve_lazy(&key, || async { Ok::<_, anyhow::Error>(None) }).await.unwrap(), None);
        assert_eq!(resolver.resolve_lazy(&key, || async { Ok::<_, anyhow::Error>(Some(99)) }).await.unwrap(), None);
        assert_eq!(resolver.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_lazy_error_is_not_cached() {
        let resolver = SkuResolver::new(SkuMode::Lazy);
        let key = SkuKey::global("m5.large");

        let failed = resolver
            .resolve_lazy(&key, || async { Err::<Option<u32>, _>(anyhow::anyhow!("throttled")) })
            .await;
        assert!(failed.is_err());

        let retried = resolver.resolve_lazy(&key, || async { Ok::<_, anyhow::Error>(Some(2)) }).await.unwrap();
        assert_eq!(retried, Some(2));
        assert_eq!(resolver.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let resolver = Arc::new(SkuResolver::new(SkuMode::Lazy));
        let fetches = Arc::new(AtomicU32::new(0));
        let key = SkuKey::new("m5.xlarge", Some("us-east-1".into()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            let fetches = fetches.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                resolver
                    .resolve_lazy(&key, || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, anyhow::Error>(Some(4))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Some(4));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_bulk_catalog_loaded_once() {
        let resolver = SkuResolver::new(SkuMode::Bulk);
        let load = || async {
            let mut catalog = SkuCatalog::new();
            catalog.insert(SkuKey::global("standard_d4s_v3"), 4);
            Ok::<_, anyhow::Error>(catalog)
        };

        let hit = resolver.resolve_bulk(&SkuKey::global("standard_d4s_v3"), load).await.unwrap();
        let miss = resolver.resolve_bulk(&SkuKey::global("standard_zz"), load).await.unwrap();

        assert_eq!(hit, Some(4));
        assert_eq!(miss, None);
        assert_eq!(resolver.lookup_count(), 1);
    }
}
