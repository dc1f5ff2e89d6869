//! Request-scoped context passed explicitly through every call boundary.

use crate::{CatalogError, CatalogResult, SubjectId};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Trace id, optional actor and cancellation for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: Uuid,
    pub actor_id: Option<SubjectId>,
    cancel: CancellationToken,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::now_v7(),
            actor_id: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn for_actor(actor_id: SubjectId) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..Self::new()
        }
    }

    /// Tie this request to an externally owned token (e.g. connection close).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast with `Cancelled` if the request is already cancelled.
    pub fn ensure_active(&self) -> CatalogResult<()> {
        if self.cancel.is_cancelled() {
            Err(CatalogError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race `fut` against cancellation of this request.
    pub async fn run<T, F>(&self, fut: F) -> CatalogResult<T>
    where
        F: Future<Output = CatalogResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CatalogError::Cancelled),
            res = fut => res,
        }
    }

    pub fn span(&self, operation: &'static str) -> tracing::Span {
        tracing::info_span!(
            "request",
            operation,
            trace_id = %self.trace_id,
            actor_id = ?self.actor_id,
        )
    }
}
