//! Read paths: cache-aside lookups by id, uncached search, enrichment.

use std::sync::Arc;

use async_trait::async_trait;
use encore_core::{
    CacheNamespace, CatalogError, CatalogItem, CatalogResult, EnrichedItem, EnrichmentSubject,
    ItemId, RequestContext, StoreError, StoreResult, SubjectId,
};
use encore_storage::{BatchFetcher, CacheAside, CatalogRepository, ItemQuery};
use tracing::Instrument;

use crate::enrichment::EnrichmentCoordinator;

/// Source of truth for the published namespace.
pub struct PublishedFetcher<'a> {
    repo: &'a dyn CatalogRepository,
}

impl<'a> PublishedFetcher<'a> {
    pub fn new(repo: &'a dyn CatalogRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl<'a> BatchFetcher<CatalogItem> for PublishedFetcher<'a> {
    async fn fetch_batch(&self, ids: &[ItemId]) -> StoreResult<Vec<CatalogItem>> {
        self.repo.published_by_ids(ids).await
    }

    async fn fetch_one(&self, id: ItemId) -> StoreResult<Option<CatalogItem>> {
        match self.repo.item(id).await {
            Ok(item) if item.is_published() => Ok(Some(item)),
            Ok(_) | Err(StoreError::EmptyResult) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn accepts(&self, row: &CatalogItem) -> bool {
        row.is_published()
    }
}

/// Source of truth for one owner's view, drafts included.
pub struct OwnedFetcher<'a> {
    repo: &'a dyn CatalogRepository,
    owner: SubjectId,
}

impl<'a> OwnedFetcher<'a> {
    pub fn new(repo: &'a dyn CatalogRepository, owner: SubjectId) -> Self {
        Self { repo, owner }
    }
}

#[async_trait]
impl<'a> BatchFetcher<CatalogItem> for OwnedFetcher<'a> {
    async fn fetch_batch(&self, ids: &[ItemId]) -> StoreResult<Vec<CatalogItem>> {
        self.repo.owned_by_ids(self.owner, ids).await
    }

    async fn fetch_one(&self, id: ItemId) -> StoreResult<Option<CatalogItem>> {
        match self.repo.owned_item(self.owner, id).await {
            Ok(item) => Ok(Some(item)),
            Err(StoreError::EmptyResult) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn accepts(&self, row: &CatalogItem) -> bool {
        row.owner_id == self.owner
    }
}

/// Catalog read API.
#[derive(Clone)]
pub struct CatalogReader {
    repo: Arc<dyn CatalogRepository>,
    cache: CacheAside,
    enricher: EnrichmentCoordinator,
    published: CacheNamespace,
    owned: CacheNamespace,
}

impl CatalogReader {
    pub fn new(
        repo: Arc<dyn CatalogRepository>,
        cache: CacheAside,
        enricher: EnrichmentCoordinator,
        published: CacheNamespace,
        owned: CacheNamespace,
    ) -> Self {
        Self {
            repo,
            cache,
            enricher,
            published,
            owned,
        }
    }

    /// Published items among `ids`, enriched. Unknown ids and rows that fail
    /// enrichment are left out.
    pub async fn get_published(
        &self,
        ctx: &RequestContext,
        ids: &[ItemId],
    ) -> CatalogResult<Vec<EnrichedItem>> {
        async {
            let fetcher = PublishedFetcher::new(self.repo.as_ref());
            let rows = self
                .cache
                .get_batch(ctx, &self.published, ids, &fetcher)
                .await?;
            Ok(self.enricher.enrich(ctx, rows, EnrichedItem::build).await)
        }
        .instrument(ctx.span("get_published"))
        .await
    }

    /// One published item, enriched.
    pub async fn get_published_one(
        &self,
        ctx: &RequestContext,
        id: ItemId,
    ) -> CatalogResult<EnrichedItem> {
        async {
            let fetcher = PublishedFetcher::new(self.repo.as_ref());
            let row = self
                .cache
                .get_single(ctx, &self.published, id, &fetcher)
                .await?;
            self.enrich_one(ctx, row).await
        }
        .instrument(ctx.span("get_published_one"))
        .await
    }

    /// Items among `ids` owned by `owner`, drafts included.
    pub async fn get_owned(
        &self,
        ctx: &RequestContext,
        owner: SubjectId,
        ids: &[ItemId],
    ) -> CatalogResult<Vec<EnrichedItem>> {
        async {
            let fetcher = OwnedFetcher::new(self.repo.as_ref(), owner);
            let rows = self.cache.get_batch(ctx, &self.owned, ids, &fetcher).await?;
            Ok(self.enricher.enrich(ctx, rows, EnrichedItem::build).await)
        }
        .instrument(ctx.span("get_owned"))
        .await
    }

    /// One item owned by `owner`, drafts included.
    pub async fn get_owned_one(
        &self,
        ctx: &RequestContext,
        owner: SubjectId,
        id: ItemId,
    ) -> CatalogResult<EnrichedItem> {
        async {
            let fetcher = OwnedFetcher::new(self.repo.as_ref(), owner);
            let row = self.cache.get_single(ctx, &self.owned, id, &fetcher).await?;
            self.enrich_one(ctx, row).await
        }
        .instrument(ctx.span("get_owned_one"))
        .await
    }

    /// Filtered query straight against the repository, enriched.
    pub async fn search(
        &self,
        ctx: &RequestContext,
        query: &ItemQuery,
    ) -> CatalogResult<Vec<EnrichedItem>> {
        async {
            let rows = ctx
                .run(async {
                    self.repo
                        .search(query)
                        .await
                        .or_else(|e| match e {
                            StoreError::EmptyResult => Ok(Vec::new()),
                            e => Err(CatalogError::from_store(e, None)),
                        })
                })
                .await?;
            tracing::debug!(rows = rows.len(), "search matched");
            Ok(self.enricher.enrich(ctx, rows, EnrichedItem::build).await)
        }
        .instrument(ctx.span("search"))
        .await
    }

    /// Directory subjects whose display name contains `name`.
    pub async fn find_subjects(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> CatalogResult<Vec<EnrichmentSubject>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(Vec::new());
        }
        ctx.run(async {
            match self.enricher.directory().lookup_by_name(name).await {
                Ok(found) => Ok(found),
                Err(StoreError::EmptyResult) => Ok(Vec::new()),
                Err(e) => Err(CatalogError::Upstream(e)),
            }
        })
        .await
    }

    async fn enrich_one(
        &self,
        ctx: &RequestContext,
        row: CatalogItem,
    ) -> CatalogResult<EnrichedItem> {
        let id = row.id;
        let mut enriched = self
            .enricher
            .enrich(ctx, vec![row], EnrichedItem::build)
            .await;
        ctx.ensure_active()?;
        enriched.pop().ok_or_else(|| {
            CatalogError::Upstream(StoreError::Unavailable {
                reason: format!("subjects for item {} could not be resolved", id),
            })
        })
    }
}
