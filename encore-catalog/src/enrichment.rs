//! Concurrent subject enrichment.
//!
//! Every row is resolved by its own task: the row's secondary subject ids
//! followed by its primary subject id are looked up in one directory call,
//! and the result is matched back onto the row. Tasks report completions on
//! a shared queue; a single collector re-emits them in input order, so the
//! output is always an order-preserving subsequence of the input. A row
//! whose lookup fails, whose primary subject is unknown, or whose task
//! panics is dropped and logged. Nothing here returns an error.

use std::collections::HashMap;
use std::sync::Arc;

use encore_core::{
    is_nil_sentinel, CatalogRow, RequestContext, StoreError, SubjectId, SubjectSet,
};
use encore_storage::SubjectDirectory;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::constants::DEFAULT_ENRICHMENT_MAX_IN_FLIGHT;

/// Concurrency settings for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentConfig {
    /// Maximum directory lookups in flight per `enrich` call. 0 means unbounded.
    pub max_in_flight: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_ENRICHMENT_MAX_IN_FLIGHT,
        }
    }
}

impl EnrichmentConfig {
    /// Create EnrichmentConfig from environment variables.
    ///
    /// - `ENCORE_ENRICHMENT_MAX_IN_FLIGHT`: lookup cap per call (default: 32, 0 = unbounded)
    pub fn from_env() -> Self {
        Self {
            max_in_flight: std::env::var("ENCORE_ENRICHMENT_MAX_IN_FLIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ENRICHMENT_MAX_IN_FLIGHT),
        }
    }

    pub fn unbounded() -> Self {
        Self { max_in_flight: 0 }
    }
}

#[derive(Debug, Error)]
enum RowFailure {
    #[error("subject lookup failed: {0}")]
    Lookup(StoreError),

    #[error("primary subject {id} not found")]
    MissingPrimary { id: SubjectId },
}

/// One finished row. `None` means the row was dropped.
struct Completion<T> {
    index: usize,
    value: Option<T>,
}

/// Re-emits out-of-order completions in input order.
///
/// Holds completions that arrive ahead of the cursor until the gap closes.
#[derive(Debug)]
pub(crate) struct ReorderBuffer<T> {
    expecting: usize,
    pending: HashMap<usize, Option<T>>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self {
            expecting: 0,
            pending: HashMap::new(),
        }
    }
}

impl<T> ReorderBuffer<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record completion `index` and append every value now in order to `out`.
    pub(crate) fn push(&mut self, index: usize, value: Option<T>, out: &mut Vec<T>) {
        if index < self.expecting {
            return;
        }
        self.pending.insert(index, value);
        while let Some(value) = self.pending.remove(&self.expecting) {
            out.extend(value);
            self.expecting += 1;
        }
    }

    /// Flush held completions in index order, skipping indices that never arrived.
    pub(crate) fn drain(&mut self, out: &mut Vec<T>) {
        let mut rest: Vec<(usize, Option<T>)> = self.pending.drain().collect();
        rest.sort_by_key(|(index, _)| *index);
        out.extend(rest.into_iter().filter_map(|(_, value)| value));
    }

    pub(crate) fn held(&self) -> usize {
        self.pending.len()
    }
}

/// Fans rows out to the subject directory and gathers them back in order.
#[derive(Clone)]
pub struct EnrichmentCoordinator {
    directory: Arc<dyn SubjectDirectory>,
    limiter: Option<Arc<Semaphore>>,
}

impl EnrichmentCoordinator {
    pub fn new(directory: Arc<dyn SubjectDirectory>, config: &EnrichmentConfig) -> Self {
        let limiter = (config.max_in_flight > 0).then(|| Arc::new(Semaphore::new(config.max_in_flight)));
        Self { directory, limiter }
    }

    pub fn directory(&self) -> &Arc<dyn SubjectDirectory> {
        &self.directory
    }

    /// Enrich `rows` with their subjects and shape each one with `build`.
    ///
    /// Returns the successfully enriched rows in input order. Cancellation
    /// stops collection and returns what was already emitted.
    pub async fn enrich<R, T, B>(&self, ctx: &RequestContext, rows: Vec<R>, build: B) -> Vec<T>
    where
        R: CatalogRow + Send + Sync + 'static,
        T: Send + 'static,
        B: Fn(R, SubjectSet) -> T + Send + Sync + 'static,
    {
        if rows.is_empty() {
            return Vec::new();
        }

        let total = rows.len();
        let build = Arc::new(build);
        let (tx, mut rx) = mpsc::channel::<Completion<T>>(total);

        let tasks: Vec<JoinHandle<()>> = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let tx = tx.clone();
                let directory = Arc::clone(&self.directory);
                let limiter = self.limiter.clone();
                let build = Arc::clone(&build);
                let span = tracing::debug_span!("enrich_row", index);
                tokio::spawn(
                    async move {
                        let _permit = match limiter {
                            Some(limiter) => limiter.acquire_owned().await.ok(),
                            None => None,
                        };
                        let value = match resolve_row(directory.as_ref(), &row).await {
                            Ok(subjects) => Some((*build)(row, subjects)),
                            Err(e) => {
                                tracing::warn!(
                                    index,
                                    primary_subject_id = %row.primary_subject_id(),
                                    secondary_subject_ids = ?row.secondary_subject_ids(),
                                    error = %e,
                                    "Row enrichment failed, dropping row"
                                );
                                None
                            }
                        };
                        let _ = tx.send(Completion { index, value }).await;
                    }
                    .instrument(span),
                )
            })
            .collect();
        drop(tx);

        let mut out = Vec::with_capacity(total);
        let mut buffer = ReorderBuffer::new();
        let cancelled = loop {
            tokio::select! {
                biased;
                _ = ctx.cancellation_token().cancelled() => break true,
                completion = rx.recv() => match completion {
                    Some(Completion { index, value }) => buffer.push(index, value, &mut out),
                    None => break false,
                },
            }
        };

        if cancelled {
            for task in &tasks {
                task.abort();
            }
            tracing::debug!(emitted = out.len(), total, "enrichment cancelled");
            return out;
        }

        if buffer.held() > 0 {
            // A task ended without reporting; everything behind it is still in order.
            tracing::warn!(held = buffer.held(), "enrichment task ended without a result");
            buffer.drain(&mut out);
        }

        tracing::debug!(enriched = out.len(), total, "enrichment complete");
        out
    }
}

async fn resolve_row<R: CatalogRow>(
    directory: &dyn SubjectDirectory,
    row: &R,
) -> Result<SubjectSet, RowFailure> {
    let primary = row.primary_subject_id();
    let secondary: &[SubjectId] = if is_nil_sentinel(row.secondary_subject_ids()) {
        &[]
    } else {
        row.secondary_subject_ids()
    };

    let mut ids = Vec::with_capacity(secondary.len() + 1);
    ids.extend_from_slice(secondary);
    ids.push(primary);

    let found = match directory.lookup_by_ids(&ids).await {
        Ok(found) => found,
        Err(StoreError::EmptyResult) => Vec::new(),
        Err(e) => return Err(RowFailure::Lookup(e)),
    };
    SubjectSet::resolve(primary, secondary, found).ok_or(RowFailure::MissingPrimary { id: primary })
}
