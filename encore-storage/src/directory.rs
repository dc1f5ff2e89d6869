//! External subject directory (artist profiles).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use encore_core::{EnrichmentSubject, StoreError, StoreResult, SubjectId};

/// Maximum subjects returned by a name lookup.
pub const NAME_LOOKUP_LIMIT: usize = 100;

/// Batch lookup of externally owned subjects. Read-only.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Subjects among `ids`, in request order, skipping unknown ids.
    ///
    /// `EmptyResult` when none of the ids is known.
    async fn lookup_by_ids(&self, ids: &[SubjectId]) -> StoreResult<Vec<EnrichmentSubject>>;

    /// Subjects whose display name contains `query`, case-insensitively.
    ///
    /// `EmptyResult` when nothing matches.
    async fn lookup_by_name(&self, query: &str) -> StoreResult<Vec<EnrichmentSubject>>;
}

/// In-process directory backed by a fixed set of subjects.
///
/// Lookups touching a subject marked failing return `Unavailable`; per-subject
/// delays let tests force out-of-order completion.
#[derive(Debug, Clone, Default)]
pub struct StaticSubjectDirectory {
    subjects: Arc<RwLock<HashMap<SubjectId, EnrichmentSubject>>>,
    failing: Arc<RwLock<HashSet<SubjectId>>>,
    delays: Arc<RwLock<HashMap<SubjectId, Duration>>>,
    calls: Arc<AtomicUsize>,
}

impl StaticSubjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subjects(subjects: impl IntoIterator<Item = EnrichmentSubject>) -> Self {
        let directory = Self::new();
        for subject in subjects {
            directory.insert(subject);
        }
        directory
    }

    pub fn insert(&self, subject: EnrichmentSubject) {
        if let Ok(mut subjects) = self.subjects.write() {
            subjects.insert(subject.id, subject);
        }
    }

    pub fn fail_on(&self, id: SubjectId) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(id);
        }
    }

    pub fn delay_on(&self, id: SubjectId, delay: Duration) {
        if let Ok(mut delays) = self.delays.write() {
            delays.insert(id, delay);
        }
    }

    pub fn lookup_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_delay(&self, ids: &[SubjectId]) -> Option<Duration> {
        let delays = self.delays.read().ok()?;
        let longest = ids.iter().filter_map(|id| delays.get(id)).max().copied();
        longest
    }
}

#[async_trait]
impl SubjectDirectory for StaticSubjectDirectory {
    async fn lookup_by_ids(&self, ids: &[SubjectId]) -> StoreResult<Vec<EnrichmentSubject>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.max_delay(ids) {
            tokio::time::sleep(delay).await;
        }

        let is_failing = {
            let failing = self.failing.read().map_err(|_| StoreError::LockPoisoned)?;
            ids.iter().any(|id| failing.contains(id))
        };
        if is_failing {
            return Err(StoreError::Unavailable {
                reason: "subject directory unavailable".to_string(),
            });
        }

        let found: Vec<EnrichmentSubject> = {
            let subjects = self.subjects.read().map_err(|_| StoreError::LockPoisoned)?;
            ids.iter().filter_map(|id| subjects.get(id).cloned()).collect()
        };
        if found.is_empty() {
            return Err(StoreError::EmptyResult);
        }
        Ok(found)
    }

    async fn lookup_by_name(&self, query: &str) -> StoreResult<Vec<EnrichmentSubject>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let needle = query.to_lowercase();
        let mut found: Vec<EnrichmentSubject> = {
            let subjects = self.subjects.read().map_err(|_| StoreError::LockPoisoned)?;
            subjects
                .values()
                .filter(|s| s.display_name.to_lowercase().contains(&needle))
                .cloned()
                .collect()
        };
        if found.is_empty() {
            return Err(StoreError::EmptyResult);
        }
        found.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        found.truncate(NAME_LOOKUP_LIMIT);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn subject(name: &str) -> EnrichmentSubject {
        EnrichmentSubject {
            id: Uuid::now_v7(),
            display_name: name.to_string(),
            label: None,
            avatar_ref: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_ids_keeps_request_order() {
        let a = subject("Alpha");
        let b = subject("Beta");
        let dir = StaticSubjectDirectory::with_subjects([a.clone(), b.clone()]);
        let found = dir
            .lookup_by_ids(&[b.id, Uuid::now_v7(), a.id])
            .await
            .unwrap();
        assert_eq!(found, vec![b, a]);
    }

    #[tokio::test]
    async fn test_lookup_empty_and_failing() {
        let a = subject("Alpha");
        let dir = StaticSubjectDirectory::with_subjects([a.clone()]);
        assert_eq!(
            dir.lookup_by_ids(&[Uuid::now_v7()]).await,
            Err(StoreError::EmptyResult)
        );
        dir.fail_on(a.id);
        assert!(matches!(
            dir.lookup_by_ids(&[a.id]).await,
            Err(StoreError::Unavailable { .. })
        ));
        assert_eq!(dir.lookup_calls(), 2);
    }

    #[tokio::test]
    async fn test_lookup_by_name() {
        let dir = StaticSubjectDirectory::with_subjects([
            subject("The Weeknd"),
            subject("Weezer"),
            subject("Adele"),
        ]);
        let found = dir.lookup_by_name("wee").await.unwrap();
        let names: Vec<_> = found.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["The Weeknd", "Weezer"]);
        assert_eq!(dir.lookup_by_name("zzz").await, Err(StoreError::EmptyResult));
    }
}
