//! In-memory catalog repository.
//!
//! Transactions stage patches privately and publish them on commit, so a
//! rolled-back or failed transaction leaves committed rows untouched. Fault
//! switches and call counters let tests drive every branch of the write
//! protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use encore_core::{BlobKind, CatalogItem, ItemId, ItemPatch, StoreError, StoreResult, SubjectId};

use crate::cache::first_occurrences;
use crate::repository::{references_blob, CatalogRepository, CatalogTransaction, ItemQuery};

#[derive(Debug, Default)]
struct RepoFaults {
    fail_reads: AtomicBool,
    fail_begin: AtomicBool,
    fail_patch: AtomicBool,
    fail_commit: AtomicBool,
}

#[derive(Debug, Default)]
struct RepoCalls {
    begins: AtomicUsize,
    patches: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    batch_reads: Mutex<Vec<Vec<ItemId>>>,
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Unavailable {
        reason: format!("{} failed (injected)", what),
    }
}

/// Shared in-memory repository. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogRepository {
    items: Arc<RwLock<HashMap<ItemId, CatalogItem>>>,
    faults: Arc<RepoFaults>,
    calls: Arc<RepoCalls>,
}

impl MemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a committed row.
    pub fn insert(&self, item: CatalogItem) {
        if let Ok(mut items) = self.items.write() {
            items.insert(item.id, item);
        }
    }

    /// Snapshot of a committed row.
    pub fn get(&self, id: ItemId) -> Option<CatalogItem> {
        self.items.read().ok().and_then(|items| items.get(&id).cloned())
    }

    pub fn count(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_begin(&self, fail: bool) {
        self.faults.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_patch(&self, fail: bool) {
        self.faults.fail_patch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.faults.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn begin_calls(&self) -> usize {
        self.calls.begins.load(Ordering::SeqCst)
    }

    pub fn patch_calls(&self) -> usize {
        self.calls.patches.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.calls.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_calls(&self) -> usize {
        self.calls.rollbacks.load(Ordering::SeqCst)
    }

    /// Id lists passed to every batched read, in call order.
    pub fn batch_reads(&self) -> Vec<Vec<ItemId>> {
        self.calls
            .batch_reads
            .lock()
            .map(|reads| reads.clone())
            .unwrap_or_default()
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            Err(unavailable("read"))
        } else {
            Ok(())
        }
    }

    fn record_batch(&self, ids: &[ItemId]) {
        if let Ok(mut reads) = self.calls.batch_reads.lock() {
            reads.push(ids.to_vec());
        }
    }

    fn select_by_ids(
        &self,
        ids: &[ItemId],
        keep: impl Fn(&CatalogItem) -> bool,
    ) -> StoreResult<Vec<CatalogItem>> {
        let items = self.items.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(first_occurrences(ids)
            .iter()
            .filter_map(|id| items.get(id))
            .filter(|item| keep(item))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalogRepository {
    async fn item(&self, id: ItemId) -> StoreResult<CatalogItem> {
        self.check_reads()?;
        self.get(id).ok_or(StoreError::EmptyResult)
    }

    async fn owned_item(&self, owner: SubjectId, id: ItemId) -> StoreResult<CatalogItem> {
        self.check_reads()?;
        self.get(id)
            .filter(|item| item.owner_id == owner)
            .ok_or(StoreError::EmptyResult)
    }

    async fn published_by_ids(&self, ids: &[ItemId]) -> StoreResult<Vec<CatalogItem>> {
        self.record_batch(ids);
        self.check_reads()?;
        self.select_by_ids(ids, CatalogItem::is_published)
    }

    async fn owned_by_ids(
        &self,
        owner: SubjectId,
        ids: &[ItemId],
    ) -> StoreResult<Vec<CatalogItem>> {
        self.record_batch(ids);
        self.check_reads()?;
        self.select_by_ids(ids, |item| item.owner_id == owner)
    }

    async fn search(&self, query: &ItemQuery) -> StoreResult<Vec<CatalogItem>> {
        self.check_reads()?;
        let items = self.items.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut matched: Vec<CatalogItem> =
            items.values().filter(|i| query.matches(i)).cloned().collect();
        matched.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(a.id.cmp(&b.id)));
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn blob_in_use(&self, kind: BlobKind, key: &str) -> StoreResult<bool> {
        self.check_reads()?;
        let items = self.items.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(items.values().any(|item| references_blob(item, kind, key)))
    }

    async fn begin(&self) -> StoreResult<Box<dyn CatalogTransaction>> {
        self.calls.begins.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_begin.load(Ordering::SeqCst) {
            return Err(unavailable("begin"));
        }
        Ok(Box::new(MemoryTransaction {
            repo: self.clone(),
            staged: HashMap::new(),
        }))
    }
}

/// Transaction over [`MemoryCatalogRepository`].
struct MemoryTransaction {
    repo: MemoryCatalogRepository,
    staged: HashMap<ItemId, CatalogItem>,
}

#[async_trait]
impl CatalogTransaction for MemoryTransaction {
    async fn patch_item(
        &mut self,
        owner: SubjectId,
        id: ItemId,
        patch: &ItemPatch,
    ) -> StoreResult<CatalogItem> {
        self.repo.calls.patches.fetch_add(1, Ordering::SeqCst);
        if self.repo.faults.fail_patch.load(Ordering::SeqCst) {
            return Err(unavailable("patch"));
        }
        let base = match self.staged.get(&id) {
            Some(staged) => Some(staged.clone()),
            None => self.repo.get(id),
        }
        .filter(|item| item.owner_id == owner)
        .ok_or(StoreError::EmptyResult)?;

        let next = patch.apply_to(&base);
        self.staged.insert(id, next.clone());
        Ok(next)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { repo, staged } = *self;
        repo.calls.commits.fetch_add(1, Ordering::SeqCst);
        if repo.faults.fail_commit.load(Ordering::SeqCst) {
            return Err(unavailable("commit"));
        }
        let mut items = repo.items.write().map_err(|_| StoreError::LockPoisoned)?;
        items.extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.repo.calls.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
