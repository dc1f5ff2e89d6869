//! PostgreSQL repository tests. Need a reachable database configured via
//! `ENCORE_DB_*`; run with `--features db-tests`.

#![cfg(feature = "db-tests")]

use encore_catalog::{DbConfig, PgCatalogRepository};
use encore_core::{CatalogItem, ItemPatch, StoreError};
use encore_storage::{CatalogRepository, ItemQuery};
use encore_test_utils::fixtures::{draft_item, published_item};
use uuid::Uuid;

async fn test_repo() -> PgCatalogRepository {
    let pool = DbConfig::from_env().create_pool().unwrap();
    let repo = PgCatalogRepository::new(pool);
    repo.migrate().await.unwrap();
    repo
}

async fn insert(repo: &PgCatalogRepository, item: &CatalogItem) {
    let client = repo.pool().get().await.unwrap();
    client
        .execute(
            "INSERT INTO catalog_items (id, owner_id, name, blob_ref, image_ref, weight_bytes, \
             duration_micros, uploaded_at, published_at, featured_subject_ids) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &item.id,
                &item.owner_id,
                &item.name,
                &item.blob_ref,
                &item.image_ref,
                &item.weight_bytes,
                &item.duration_micros,
                &item.uploaded_at,
                &item.published_at,
                &item.featured_subject_ids,
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_batch_reads_keep_request_order() {
    let repo = test_repo().await;
    let owner = Uuid::now_v7();
    let a = published_item(owner, "pg-order-a");
    let b = draft_item(owner, "pg-order-b");
    let c = published_item(owner, "pg-order-c");
    for item in [&a, &b, &c] {
        insert(&repo, item).await;
    }

    let published = repo.published_by_ids(&[c.id, b.id, a.id]).await.unwrap();
    let ids: Vec<Uuid> = published.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![c.id, a.id]);

    let owned = repo.owned_by_ids(owner, &[b.id, a.id]).await.unwrap();
    assert_eq!(owned.len(), 2);
    assert_eq!(owned[0].id, b.id);

    let other = repo.owned_by_ids(Uuid::now_v7(), &[a.id]).await.unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn test_owned_item_hides_foreign_rows() {
    let repo = test_repo().await;
    let owner = Uuid::now_v7();
    let item = draft_item(owner, "pg-private");
    insert(&repo, &item).await;

    assert_eq!(repo.owned_item(owner, item.id).await.unwrap().name, "pg-private");
    assert!(matches!(
        repo.owned_item(Uuid::now_v7(), item.id).await,
        Err(StoreError::EmptyResult)
    ));
}

#[tokio::test]
async fn test_search_escapes_wildcards() {
    let repo = test_repo().await;
    let owner = Uuid::now_v7();
    insert(&repo, &published_item(owner, "100% Pure")).await;
    insert(&repo, &published_item(owner, "1000 Pure")).await;

    let found = repo
        .search(&ItemQuery::by_name("100%").with_owner(owner))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "100% Pure");
}

#[tokio::test]
async fn test_patch_commit_and_rollback() {
    let repo = test_repo().await;
    let owner = Uuid::now_v7();
    let item = draft_item(owner, "pg-patch");
    insert(&repo, &item).await;

    let patch = ItemPatch {
        blob_ref: Some("abc.mp3".to_string()),
        weight_bytes: Some(417),
        ..Default::default()
    };

    let mut tx = repo.begin().await.unwrap();
    let staged = tx.patch_item(owner, item.id, &patch).await.unwrap();
    assert_eq!(staged.blob_ref.as_deref(), Some("abc.mp3"));
    tx.rollback().await.unwrap();
    assert_eq!(repo.item(item.id).await.unwrap().blob_ref, None);

    let mut tx = repo.begin().await.unwrap();
    tx.patch_item(owner, item.id, &patch).await.unwrap();
    tx.commit().await.unwrap();
    let committed = repo.item(item.id).await.unwrap();
    assert_eq!(committed.blob_ref.as_deref(), Some("abc.mp3"));
    assert_eq!(committed.weight_bytes, Some(417));
    assert_eq!(committed.name, "pg-patch");
}

#[tokio::test]
async fn test_patch_by_non_owner_matches_nothing() {
    let repo = test_repo().await;
    let owner = Uuid::now_v7();
    let item = draft_item(owner, "pg-foreign");
    insert(&repo, &item).await;

    let mut tx = repo.begin().await.unwrap();
    let result = tx
        .patch_item(
            Uuid::now_v7(),
            item.id,
            &ItemPatch {
                name: Some("stolen".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(StoreError::EmptyResult)));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_name_is_unique_violation() {
    let repo = test_repo().await;
    let owner = Uuid::now_v7();
    let first = draft_item(owner, "pg-dup-a");
    let second = draft_item(owner, "pg-dup-b");
    insert(&repo, &first).await;
    insert(&repo, &second).await;

    let mut tx = repo.begin().await.unwrap();
    let result = tx
        .patch_item(
            owner,
            second.id,
            &ItemPatch {
                name: Some("pg-dup-a".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
    tx.rollback().await.unwrap();
}
