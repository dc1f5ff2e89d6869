//! Cache-aside read layer.
//!
//! Reads consult the byte cache first and fall back to the source of truth
//! for every key that misses, fails to decode, or errors. The caller waits
//! only on the source-of-truth fetch; writing fetched rows back into the
//! cache and deleting invalidated keys happen on the [`BackgroundExecutor`].
//!
//! Only exact-id lookups go through here. Filtered or full-text queries hit
//! the repository directly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use encore_core::{
    CacheNamespace, CatalogError, CatalogResult, ItemId, RequestContext, StoreError, StoreResult,
};
use futures_util::future::join_all;

use super::background::BackgroundExecutor;
use super::traits::{ByteCache, CacheableEntity};

/// `ids` with repeats removed, keeping the first occurrence of each.
pub fn first_occurrences(ids: &[ItemId]) -> Vec<ItemId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Source-of-truth access for one namespace.
#[async_trait]
pub trait BatchFetcher<T: CacheableEntity>: Send + Sync {
    /// Fetch every existing row among `ids`. Missing ids are skipped.
    async fn fetch_batch(&self, ids: &[ItemId]) -> StoreResult<Vec<T>>;

    /// Fetch one row, `None` if it does not exist.
    async fn fetch_one(&self, id: ItemId) -> StoreResult<Option<T>>;

    /// Whether a cached row is visible to this fetcher's caller.
    ///
    /// A rejected hit is treated as a miss and re-fetched.
    fn accepts(&self, _row: &T) -> bool {
        true
    }
}

/// Counters for cache-aside reads.
#[derive(Debug, Default)]
pub struct CacheAsideMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub corrupt_entries: AtomicU64,
    pub cache_errors: AtomicU64,
    pub source_fetches: AtomicU64,
}

/// Snapshot of cache-aside counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheAsideSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub corrupt_entries: u64,
    pub cache_errors: u64,
    pub source_fetches: u64,
}

impl CacheAsideMetrics {
    pub fn snapshot(&self) -> CacheAsideSnapshot {
        CacheAsideSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            source_fetches: self.source_fetches.load(Ordering::Relaxed),
        }
    }
}

/// Namespaced cache-aside reader with asynchronous population and invalidation.
#[derive(Clone)]
pub struct CacheAside {
    cache: Arc<dyn ByteCache>,
    executor: BackgroundExecutor,
    namespaces: Arc<Vec<CacheNamespace>>,
    metrics: Arc<CacheAsideMetrics>,
}

impl CacheAside {
    /// `namespaces` lists every partition an invalidation must clear.
    pub fn new(
        cache: Arc<dyn ByteCache>,
        executor: BackgroundExecutor,
        namespaces: Vec<CacheNamespace>,
    ) -> Self {
        Self {
            cache,
            executor,
            namespaces: Arc::new(namespaces),
            metrics: Arc::new(CacheAsideMetrics::default()),
        }
    }

    pub fn namespaces(&self) -> &[CacheNamespace] {
        &self.namespaces
    }

    pub fn executor(&self) -> &BackgroundExecutor {
        &self.executor
    }

    pub fn metrics(&self) -> CacheAsideSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve `ids` as cache hits followed by freshly fetched misses.
    ///
    /// Cache faults never surface; only a failed source-of-truth fetch does.
    pub async fn get_batch<T, F>(
        &self,
        ctx: &RequestContext,
        namespace: &CacheNamespace,
        ids: &[ItemId],
        fetcher: &F,
    ) -> CatalogResult<Vec<T>>
    where
        T: CacheableEntity,
        F: BatchFetcher<T> + ?Sized,
    {
        ctx.ensure_active()?;
        let ids = first_occurrences(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let lookups = join_all(ids.iter().map(|id| self.lookup(namespace, *id, fetcher))).await;

        let mut hits = Vec::with_capacity(ids.len());
        let mut misses = Vec::new();
        for (id, cached) in ids.iter().zip(lookups) {
            match cached {
                Some(row) => hits.push(row),
                None => misses.push(*id),
            }
        }

        tracing::debug!(
            namespace = namespace.name,
            hits = hits.len(),
            misses = misses.len(),
            "cache-aside batch lookup"
        );

        if misses.is_empty() {
            return Ok(hits);
        }

        self.metrics.source_fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = ctx
            .run(async {
                match fetcher.fetch_batch(&misses).await {
                    Ok(rows) => Ok(rows),
                    Err(StoreError::EmptyResult) => Ok(Vec::new()),
                    Err(e) => Err(CatalogError::from_store(e, None)),
                }
            })
            .await?;

        self.populate(namespace, &fetched);
        hits.extend(fetched);
        Ok(hits)
    }

    /// Resolve one id, `NotFound` if the source of truth has no row.
    pub async fn get_single<T, F>(
        &self,
        ctx: &RequestContext,
        namespace: &CacheNamespace,
        id: ItemId,
        fetcher: &F,
    ) -> CatalogResult<T>
    where
        T: CacheableEntity,
        F: BatchFetcher<T> + ?Sized,
    {
        ctx.ensure_active()?;
        if let Some(row) = self.lookup(namespace, id, fetcher).await {
            return Ok(row);
        }

        self.metrics.source_fetches.fetch_add(1, Ordering::Relaxed);
        let row = ctx
            .run(async {
                match fetcher.fetch_one(id).await {
                    Ok(Some(row)) => Ok(row),
                    Ok(None) | Err(StoreError::EmptyResult) => Err(CatalogError::NotFound { id }),
                    Err(e) => Err(CatalogError::from_store(e, Some(id))),
                }
            })
            .await?;

        self.populate(namespace, std::slice::from_ref(&row));
        Ok(row)
    }

    /// Schedule deletion of `ids` from every registered namespace.
    ///
    /// Runs detached from the caller; returns false if the job was dropped.
    pub fn invalidate(&self, ids: &[ItemId]) -> bool {
        if ids.is_empty() {
            return true;
        }
        let keys: Vec<String> = ids
            .iter()
            .flat_map(|id| self.namespaces.iter().map(move |ns| ns.key(*id)))
            .collect();
        let cache = Arc::clone(&self.cache);

        tracing::debug!(ids = ids.len(), keys = keys.len(), "scheduling cache invalidation");

        self.executor.submit("cache_invalidate", async move {
            let mut first_err = None;
            for key in keys {
                if let Err(e) = cache.delete(&key).await {
                    tracing::warn!(key = %key, error = %e, "Cache invalidation failed");
                    first_err.get_or_insert(e);
                }
            }
            first_err.map_or(Ok(()), Err)
        })
    }

    async fn lookup<T, F>(&self, namespace: &CacheNamespace, id: ItemId, fetcher: &F) -> Option<T>
    where
        T: CacheableEntity,
        F: BatchFetcher<T> + ?Sized,
    {
        let key = namespace.key(id);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(row) if row.entity_id() == id && fetcher.accepts(&row) => {
                    self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                    Some(row)
                }
                Ok(_) => {
                    self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "cached row not visible to caller");
                    None
                }
                Err(e) => {
                    self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                    self.metrics.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(key = %key, error = %e, "Corrupt cache entry, treating as miss");
                    None
                }
            },
            Ok(None) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                self.metrics.cache_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Cache lookup failed, using source of truth");
                None
            }
        }
    }

    fn populate<T: CacheableEntity>(&self, namespace: &CacheNamespace, rows: &[T]) {
        let entries: Vec<(String, Bytes)> = rows
            .iter()
            .filter_map(|row| match serde_json::to_vec(row) {
                Ok(json) => Some((namespace.key(row.entity_id()), Bytes::from(json))),
                Err(e) => {
                    tracing::warn!(id = %row.entity_id(), error = %e, "Failed to serialize row for cache");
                    None
                }
            })
            .collect();
        if entries.is_empty() {
            return;
        }

        let cache = Arc::clone(&self.cache);
        let ttl = namespace.ttl;
        self.executor.submit("cache_populate", async move {
            let mut first_err = None;
            for (key, value) in entries {
                if let Err(e) = cache.set(&key, value, ttl).await {
                    tracing::warn!(key = %key, error = %e, "Cache population failed");
                    first_err.get_or_insert(e);
                }
            }
            first_err.map_or(Ok(()), Err)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BackgroundConfig, BackgroundHandle, InMemoryByteCache};
    use chrono::Utc;
    use encore_core::CatalogItem;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct MockFetcher {
        rows: HashMap<ItemId, CatalogItem>,
        owner: Option<Uuid>,
        fail: bool,
        batches: Mutex<Vec<Vec<ItemId>>>,
    }

    impl MockFetcher {
        fn new(rows: &[CatalogItem]) -> Self {
            Self {
                rows: rows.iter().map(|r| (r.id, r.clone())).collect(),
                owner: None,
                fail: false,
                batches: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<Vec<ItemId>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchFetcher<CatalogItem> for MockFetcher {
        async fn fetch_batch(&self, ids: &[ItemId]) -> StoreResult<Vec<CatalogItem>> {
            self.batches.lock().unwrap().push(ids.to_vec());
            if self.fail {
                return Err(StoreError::Unavailable {
                    reason: "db down".into(),
                });
            }
            Ok(ids.iter().filter_map(|id| self.rows.get(id).cloned()).collect())
        }

        async fn fetch_one(&self, id: ItemId) -> StoreResult<Option<CatalogItem>> {
            self.batches.lock().unwrap().push(vec![id]);
            Ok(self.rows.get(&id).cloned())
        }

        fn accepts(&self, row: &CatalogItem) -> bool {
            self.owner.map_or(true, |owner| row.owner_id == owner)
        }
    }

    fn item(owner: Uuid) -> CatalogItem {
        CatalogItem {
            id: Uuid::now_v7(),
            owner_id: owner,
            name: "Track".to_string(),
            blob_ref: None,
            image_ref: None,
            weight_bytes: None,
            duration_micros: None,
            uploaded_at: Utc::now(),
            published_at: Some(Utc::now()),
            featured_subject_ids: vec![],
        }
    }

    fn ns() -> CacheNamespace {
        CacheNamespace::published(Duration::from_secs(300))
    }

    fn setup() -> (CacheAside, InMemoryByteCache, BackgroundHandle) {
        let cache = InMemoryByteCache::new();
        let (executor, handle) = BackgroundExecutor::start(BackgroundConfig::default());
        let aside = CacheAside::new(
            Arc::new(cache.clone()),
            executor,
            vec![ns(), CacheNamespace::owner(Duration::from_secs(300))],
        );
        (aside, cache, handle)
    }

    fn plant(cache: &InMemoryByteCache, row: &CatalogItem) {
        cache.insert_raw(
            &ns().key(row.id),
            serde_json::to_vec(row).unwrap(),
            Duration::from_secs(300),
        );
    }

    #[tokio::test]
    async fn test_batch_returns_hits_then_fetched_misses() {
        let (aside, cache, _handle) = setup();
        let owner = Uuid::now_v7();
        let rows: Vec<_> = (0..4).map(|_| item(owner)).collect();
        plant(&cache, &rows[1]);
        plant(&cache, &rows[3]);
        let fetcher = MockFetcher::new(&rows);

        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        let got = aside
            .get_batch(&RequestContext::new(), &ns(), &ids, &fetcher)
            .await
            .unwrap();

        let got_ids: Vec<_> = got.iter().map(|r| r.id).collect();
        assert_eq!(got_ids, vec![rows[1].id, rows[3].id, rows[0].id, rows[2].id]);
        assert_eq!(fetcher.fetched(), vec![vec![rows[0].id, rows[2].id]]);
    }

    #[tokio::test]
    async fn test_repeated_id_resolves_once_cold_and_warm() {
        let (aside, cache, _handle) = setup();
        let a = item(Uuid::now_v7());
        let b = item(Uuid::now_v7());
        let fetcher = MockFetcher::new(&[a.clone(), b.clone()]);
        let request = [a.id, b.id, a.id];

        let cold = aside
            .get_batch(&RequestContext::new(), &ns(), &request, &fetcher)
            .await
            .unwrap();
        assert_eq!(fetcher.fetched(), vec![vec![a.id, b.id]]);

        plant(&cache, &a);
        plant(&cache, &b);
        let warm = aside
            .get_batch(&RequestContext::new(), &ns(), &request, &fetcher)
            .await
            .unwrap();

        let cold_ids: Vec<_> = cold.iter().map(|r| r.id).collect();
        let warm_ids: Vec<_> = warm.iter().map(|r| r.id).collect();
        assert_eq!(cold_ids, vec![a.id, b.id]);
        assert_eq!(warm_ids, cold_ids);
    }

    #[test]
    fn test_first_occurrences_keeps_first_position() {
        let (a, b, c) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        assert_eq!(first_occurrences(&[b, a, b, c, a]), vec![b, a, c]);
        assert!(first_occurrences(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_all_hits_skip_source() {
        let (aside, cache, _handle) = setup();
        let row = item(Uuid::now_v7());
        plant(&cache, &row);
        let fetcher = MockFetcher::new(&[row.clone()]);
        let got = aside
            .get_batch(&RequestContext::new(), &ns(), &[row.id], &fetcher)
            .await
            .unwrap();
        assert_eq!(got, vec![row]);
        assert!(fetcher.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_fetched_rows_are_populated_in_background() {
        let (aside, cache, _handle) = setup();
        let row = item(Uuid::now_v7());
        let fetcher = MockFetcher::new(&[row.clone()]);
        aside
            .get_batch(&RequestContext::new(), &ns(), &[row.id], &fetcher)
            .await
            .unwrap();
        aside.executor().flush().await;
        assert!(cache.contains(&ns().key(row.id)));

        aside
            .get_batch(&RequestContext::new(), &ns(), &[row.id], &fetcher)
            .await
            .unwrap();
        assert_eq!(fetcher.fetched().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_refetched() {
        let (aside, cache, _handle) = setup();
        let row = item(Uuid::now_v7());
        cache.insert_raw(&ns().key(row.id), Bytes::from_static(b"{not json"), Duration::from_secs(300));
        let fetcher = MockFetcher::new(&[row.clone()]);
        let got = aside
            .get_batch(&RequestContext::new(), &ns(), &[row.id], &fetcher)
            .await
            .unwrap();
        assert_eq!(got, vec![row]);
        assert_eq!(aside.metrics().corrupt_entries, 1);
    }

    #[tokio::test]
    async fn test_cache_outage_degrades_to_source() {
        let (aside, cache, _handle) = setup();
        cache.set_unavailable(true);
        let rows: Vec<_> = (0..3).map(|_| item(Uuid::now_v7())).collect();
        let fetcher = MockFetcher::new(&rows);
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        let got = aside
            .get_batch(&RequestContext::new(), &ns(), &ids, &fetcher)
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(aside.metrics().cache_errors, 3);
    }

    #[tokio::test]
    async fn test_source_failure_surfaces_as_upstream() {
        let (aside, _cache, _handle) = setup();
        let mut fetcher = MockFetcher::new(&[]);
        fetcher.fail = true;
        let err = aside
            .get_batch::<CatalogItem, _>(&RequestContext::new(), &ns(), &[Uuid::now_v7()], &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_single_not_found() {
        let (aside, _cache, _handle) = setup();
        let fetcher = MockFetcher::new(&[]);
        let id = Uuid::now_v7();
        let err = aside
            .get_single::<CatalogItem, _>(&RequestContext::new(), &ns(), id, &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { id: missing } if missing == id));
    }

    #[tokio::test]
    async fn test_rejected_hit_is_refetched() {
        let (aside, cache, _handle) = setup();
        let owner = Uuid::now_v7();
        let row = item(Uuid::now_v7());
        plant(&cache, &row);
        let mut fetcher = MockFetcher::new(&[]);
        fetcher.owner = Some(owner);
        let got = aside
            .get_batch(&RequestContext::new(), &ns(), &[row.id], &fetcher)
            .await
            .unwrap();
        assert!(got.is_empty());
        assert_eq!(fetcher.fetched(), vec![vec![row.id]]);
    }

    #[tokio::test]
    async fn test_invalidate_clears_every_namespace() {
        let (aside, cache, _handle) = setup();
        let row = item(Uuid::now_v7());
        for namespace in aside.namespaces().to_vec() {
            cache.insert_raw(&namespace.key(row.id), Bytes::from_static(b"{}"), Duration::from_secs(300));
        }
        assert!(aside.invalidate(&[row.id]));
        aside.executor().flush().await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_short_circuits() {
        let (aside, _cache, _handle) = setup();
        let ctx = RequestContext::new();
        ctx.cancel();
        let fetcher = MockFetcher::new(&[]);
        let err = aside
            .get_batch::<CatalogItem, _>(&ctx, &ns(), &[Uuid::now_v7()], &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Cancelled));
        assert!(fetcher.fetched().is_empty());
    }
}
