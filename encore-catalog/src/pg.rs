//! PostgreSQL-backed catalog repository.
//!
//! A [`PgTransaction`] owns its pooled connection for its whole lifetime.
//! If it is dropped while still open, the connection is detached from the
//! pool and closed, which makes the server abort the transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use encore_core::{BlobKind, CatalogItem, ItemId, ItemPatch, StoreError, StoreResult, SubjectId};
use encore_storage::{CatalogRepository, CatalogTransaction, ItemQuery};
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;

/// Schema for the catalog tables.
pub const MIGRATION_V1: &str = include_str!("../migrations/V1__catalog_items.sql");

const ITEM_COLUMNS: &str = "id, owner_id, name, blob_ref, image_ref, weight_bytes, \
     duration_micros, uploaded_at, published_at, featured_subject_ids";

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// Map a SQLSTATE onto the store error taxonomy.
pub fn classify_sqlstate(
    code: &SqlState,
    constraint: Option<&str>,
    column: Option<&str>,
    message: &str,
) -> StoreError {
    let constraint = constraint.unwrap_or_default().to_string();
    if *code == SqlState::UNIQUE_VIOLATION {
        StoreError::UniqueViolation { constraint }
    } else if *code == SqlState::FOREIGN_KEY_VIOLATION {
        StoreError::ForeignKeyViolation { constraint }
    } else if *code == SqlState::NOT_NULL_VIOLATION {
        StoreError::NotNullViolation {
            column: column.unwrap_or_default().to_string(),
        }
    } else if *code == SqlState::CHECK_VIOLATION {
        StoreError::CheckViolation { constraint }
    } else {
        StoreError::Internal {
            reason: format!("{}: {}", code.code(), message),
        }
    }
}

fn classify(err: tokio_postgres::Error) -> StoreError {
    match err.as_db_error() {
        Some(db) => classify_sqlstate(db.code(), db.constraint(), db.column(), db.message()),
        None => StoreError::Unavailable {
            reason: err.to_string(),
        },
    }
}

fn pool_error(err: deadpool_postgres::PoolError) -> StoreError {
    StoreError::Unavailable {
        reason: format!("connection pool: {}", err),
    }
}

fn item_from_row(row: &Row) -> StoreResult<CatalogItem> {
    let corrupt = |e: tokio_postgres::Error| StoreError::Corrupt {
        reason: e.to_string(),
    };
    Ok(CatalogItem {
        id: row.try_get("id").map_err(corrupt)?,
        owner_id: row.try_get("owner_id").map_err(corrupt)?,
        name: row.try_get("name").map_err(corrupt)?,
        blob_ref: row.try_get("blob_ref").map_err(corrupt)?,
        image_ref: row.try_get("image_ref").map_err(corrupt)?,
        weight_bytes: row.try_get("weight_bytes").map_err(corrupt)?,
        duration_micros: row.try_get("duration_micros").map_err(corrupt)?,
        uploaded_at: row.try_get("uploaded_at").map_err(corrupt)?,
        published_at: row.try_get("published_at").map_err(corrupt)?,
        featured_subject_ids: row.try_get("featured_subject_ids").map_err(corrupt)?,
    })
}

/// Rows in the order of `ids`, skipping ids with no row.
fn in_request_order(ids: &[ItemId], rows: Vec<CatalogItem>) -> Vec<CatalogItem> {
    let mut by_id: HashMap<ItemId, CatalogItem> = rows.into_iter().map(|r| (r.id, r)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

/// Escape LIKE wildcards in a user-supplied fragment.
fn like_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

// ============================================================================
// REPOSITORY
// ============================================================================

#[derive(Clone)]
pub struct PgCatalogRepository {
    pool: Pool,
}

impl PgCatalogRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Apply the catalog schema. Idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.batch_execute(MIGRATION_V1).await.map_err(classify)?;
        tracing::info!("catalog schema applied");
        Ok(())
    }

    async fn query_items(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> StoreResult<Vec<CatalogItem>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let stmt = client.prepare_cached(sql).await.map_err(classify)?;
        let rows = client.query(&stmt, params).await.map_err(classify)?;
        rows.iter().map(item_from_row).collect()
    }

    async fn query_item(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> StoreResult<CatalogItem> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let stmt = client.prepare_cached(sql).await.map_err(classify)?;
        match client.query_opt(&stmt, params).await.map_err(classify)? {
            Some(row) => item_from_row(&row),
            None => Err(StoreError::EmptyResult),
        }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn item(&self, id: ItemId) -> StoreResult<CatalogItem> {
        let sql = format!("SELECT {} FROM catalog_items WHERE id = $1", ITEM_COLUMNS);
        self.query_item(&sql, &[&id]).await
    }

    async fn owned_item(&self, owner: SubjectId, id: ItemId) -> StoreResult<CatalogItem> {
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE id = $1 AND owner_id = $2",
            ITEM_COLUMNS
        );
        self.query_item(&sql, &[&id, &owner]).await
    }

    async fn published_by_ids(&self, ids: &[ItemId]) -> StoreResult<Vec<CatalogItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE id = ANY($1) AND published_at IS NOT NULL",
            ITEM_COLUMNS
        );
        let ids_vec = ids.to_vec();
        let rows = self.query_items(&sql, &[&ids_vec]).await?;
        Ok(in_request_order(ids, rows))
    }

    async fn owned_by_ids(
        &self,
        owner: SubjectId,
        ids: &[ItemId],
    ) -> StoreResult<Vec<CatalogItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE id = ANY($1) AND owner_id = $2",
            ITEM_COLUMNS
        );
        let ids_vec = ids.to_vec();
        let rows = self.query_items(&sql, &[&ids_vec, &owner]).await?;
        Ok(in_request_order(ids, rows))
    }

    async fn search(&self, query: &ItemQuery) -> StoreResult<Vec<CatalogItem>> {
        let sql = format!(
            "SELECT {} FROM catalog_items \
             WHERE ($1::text IS NULL OR name ILIKE $1) \
               AND ($2::uuid IS NULL OR owner_id = $2) \
               AND (NOT $3 OR published_at IS NOT NULL) \
             ORDER BY uploaded_at DESC, id \
             LIMIT $4 OFFSET $5",
            ITEM_COLUMNS
        );
        let pattern = query.name_contains.as_deref().map(like_pattern);
        let limit = query.limit as i64;
        let offset = query.offset as i64;
        self.query_items(
            &sql,
            &[&pattern, &query.owner_id, &query.published_only, &limit, &offset],
        )
        .await
    }

    async fn blob_in_use(&self, kind: BlobKind, key: &str) -> StoreResult<bool> {
        let sql = match kind {
            BlobKind::Media => "SELECT EXISTS (SELECT 1 FROM catalog_items WHERE blob_ref = $1)",
            BlobKind::Cover => {
                "SELECT EXISTS (SELECT 1 FROM catalog_items \
                 WHERE image_ref = $1 OR right(image_ref, length($1) + 1) = '/' || $1)"
            }
        };
        let client = self.pool.get().await.map_err(pool_error)?;
        let stmt = client.prepare_cached(sql).await.map_err(classify)?;
        let row = client.query_one(&stmt, &[&key]).await.map_err(classify)?;
        row.try_get::<_, bool>(0).map_err(|e| StoreError::Corrupt {
            reason: e.to_string(),
        })
    }

    async fn begin(&self) -> StoreResult<Box<dyn CatalogTransaction>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.batch_execute("BEGIN").await.map_err(classify)?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
        }))
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

pub struct PgTransaction {
    client: Option<Object>,
}

impl PgTransaction {
    fn client(&self) -> StoreResult<&Object> {
        self.client.as_ref().ok_or_else(|| StoreError::Internal {
            reason: "transaction already finished".to_string(),
        })
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> StoreResult<()> {
        let client = self.client.take().ok_or_else(|| StoreError::Internal {
            reason: "transaction already finished".to_string(),
        })?;
        match client.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Session state is unknown after a failed COMMIT/ROLLBACK.
                drop(Object::take(client));
                Err(classify(e))
            }
        }
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::warn!("transaction dropped while open, discarding connection");
            drop(Object::take(client));
        }
    }
}

#[async_trait]
impl CatalogTransaction for PgTransaction {
    async fn patch_item(
        &mut self,
        owner: SubjectId,
        id: ItemId,
        patch: &ItemPatch,
    ) -> StoreResult<CatalogItem> {
        let sql = format!(
            "UPDATE catalog_items SET \
               name = COALESCE($3, name), \
               featured_subject_ids = COALESCE($4, featured_subject_ids), \
               blob_ref = COALESCE($5, blob_ref), \
               image_ref = COALESCE($6, image_ref), \
               weight_bytes = COALESCE($7, weight_bytes), \
               duration_micros = COALESCE($8, duration_micros), \
               published_at = COALESCE($9, published_at) \
             WHERE id = $1 AND owner_id = $2 \
             RETURNING {}",
            ITEM_COLUMNS
        );
        let client = self.client()?;
        let stmt = client.prepare_cached(&sql).await.map_err(classify)?;
        let row = client
            .query_opt(
                &stmt,
                &[
                    &id,
                    &owner,
                    &patch.name,
                    &patch.featured_subject_ids,
                    &patch.blob_ref,
                    &patch.image_ref,
                    &patch.weight_bytes,
                    &patch.duration_micros,
                    &patch.published_at,
                ],
            )
            .await
            .map_err(classify)?;
        match row {
            Some(row) => item_from_row(&row),
            None => Err(StoreError::EmptyResult),
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.finish("ROLLBACK").await
    }
}
