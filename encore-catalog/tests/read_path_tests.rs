//! Cache-aside reads, visibility rules and enrichment through the reader.

mod common;

use std::time::Duration;

use common::Harness;
use encore_catalog::{CacheSettings, CatalogConfig};
use encore_storage::ItemQuery;
use encore_test_utils::assertions::assert_not_found;
use encore_test_utils::fixtures::*;
use encore_test_utils::{ItemId, RequestContext};

fn ids(items: &[encore_core::EnrichedItem]) -> Vec<ItemId> {
    items.iter().map(|e| e.item.id).collect()
}

#[tokio::test]
async fn test_get_published_cold_keeps_request_order_and_skips_drafts() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let a = published_item(owner.id, "A");
    let b = draft_item(owner.id, "B");
    let c = published_item(owner.id, "C");
    for item in [&a, &b, &c] {
        h.repo.insert(item.clone());
    }

    let got = h
        .state
        .reader
        .get_published(&RequestContext::new(), &[c.id, b.id, a.id])
        .await
        .unwrap();

    assert_eq!(ids(&got), vec![c.id, a.id]);
    assert_eq!(got[0].owner.id, owner.id);
}

#[tokio::test]
async fn test_get_published_warm_returns_hits_then_misses() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let a = published_item(owner.id, "A");
    let c = published_item(owner.id, "C");
    h.repo.insert(a.clone());
    h.repo.insert(c.clone());
    let ctx = RequestContext::new();

    h.state.reader.get_published(&ctx, &[a.id]).await.unwrap();
    h.settle().await;

    let got = h.state.reader.get_published(&ctx, &[c.id, a.id]).await.unwrap();
    assert_eq!(ids(&got), vec![a.id, c.id]);
    assert_eq!(h.repo.batch_reads().last(), Some(&vec![c.id]));
}

#[tokio::test]
async fn test_repeated_id_returns_one_row_cold_and_warm() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let a = published_item(owner.id, "A");
    let b = published_item(owner.id, "B");
    h.repo.insert(a.clone());
    h.repo.insert(b.clone());
    let ctx = RequestContext::new();
    let request = [a.id, b.id, a.id];

    let cold = h.state.reader.get_published(&ctx, &request).await.unwrap();
    assert_eq!(h.repo.batch_reads(), vec![vec![a.id, b.id]]);
    h.settle().await;

    let warm = h.state.reader.get_published(&ctx, &request).await.unwrap();
    assert_eq!(ids(&cold), vec![a.id, b.id]);
    assert_eq!(ids(&warm), ids(&cold));
}

#[tokio::test]
async fn test_cached_and_uncached_reads_agree() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let guest = h.subject("Guest");
    let items: Vec<_> = (0..5)
        .map(|i| with_featured(published_item(owner.id, &format!("Song {}", i)), &[guest.id]))
        .collect();
    for item in &items {
        h.repo.insert(item.clone());
    }
    let request: Vec<ItemId> = items.iter().map(|i| i.id).collect();
    let ctx = RequestContext::new();

    let cold = h.state.reader.get_published(&ctx, &request).await.unwrap();
    h.settle().await;
    let reads_before = h.repo.batch_reads().len();
    let warm = h.state.reader.get_published(&ctx, &request).await.unwrap();

    let mut cold_ids = ids(&cold);
    let mut warm_ids = ids(&warm);
    cold_ids.sort();
    warm_ids.sort();
    assert_eq!(cold_ids, warm_ids);
    assert_eq!(h.repo.batch_reads().len(), reads_before);
    assert!(warm.iter().all(|e| e.featured == vec![guest.clone()]));
}

#[tokio::test]
async fn test_enrichment_failure_drops_only_affected_rows() {
    let h = Harness::new();
    let healthy = h.subject("Healthy");
    let broken = h.subject("Broken");
    h.directory.fail_on(broken.id);
    let good = published_item(healthy.id, "Good");
    let bad = published_item(broken.id, "Bad");
    h.repo.insert(good.clone());
    h.repo.insert(bad.clone());

    let got = h
        .state
        .reader
        .get_published(&RequestContext::new(), &[bad.id, good.id])
        .await
        .unwrap();
    assert_eq!(ids(&got), vec![good.id]);
}

#[tokio::test]
async fn test_get_published_one_hides_drafts() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let draft = draft_item(owner.id, "Draft");
    h.repo.insert(draft.clone());
    let ctx = RequestContext::new();

    assert_not_found(&h.state.reader.get_published_one(&ctx, draft.id).await, draft.id);

    let owned = h
        .state
        .reader
        .get_owned_one(&RequestContext::for_actor(owner.id), owner.id, draft.id)
        .await
        .unwrap();
    assert_eq!(owned.item.id, draft.id);
}

#[tokio::test]
async fn test_owner_cache_never_leaks_across_owners() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let other = h.subject("Other");
    let item = draft_item(owner.id, "Private");
    h.repo.insert(item.clone());

    let mine = h
        .state
        .reader
        .get_owned(&RequestContext::for_actor(owner.id), owner.id, &[item.id])
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    h.settle().await;

    let theirs = h
        .state
        .reader
        .get_owned(&RequestContext::for_actor(other.id), other.id, &[item.id])
        .await
        .unwrap();
    assert!(theirs.is_empty());
    assert_not_found(
        &h.state
            .reader
            .get_owned_one(&RequestContext::for_actor(other.id), other.id, item.id)
            .await,
        item.id,
    );
}

#[tokio::test(start_paused = true)]
async fn test_out_of_band_change_is_visible_after_ttl() {
    let config = CatalogConfig {
        cache: CacheSettings {
            published_ttl: Duration::from_secs(60),
            ..Default::default()
        },
        ..Default::default()
    };
    let h = Harness::with_config(config);
    let owner = h.subject("Owner");
    let item = published_item(owner.id, "Before");
    h.repo.insert(item.clone());
    let ctx = RequestContext::new();

    h.state.reader.get_published_one(&ctx, item.id).await.unwrap();
    h.settle().await;

    let mut renamed = item.clone();
    renamed.name = "After".to_string();
    h.repo.insert(renamed);

    let stale = h.state.reader.get_published_one(&ctx, item.id).await.unwrap();
    assert_eq!(stale.item.name, "Before");

    tokio::time::advance(Duration::from_secs(61)).await;
    let fresh = h.state.reader.get_published_one(&ctx, item.id).await.unwrap();
    assert_eq!(fresh.item.name, "After");
}

#[tokio::test]
async fn test_search_bypasses_cache() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    h.repo.insert(published_item(owner.id, "Midnight City"));
    h.repo.insert(published_item(owner.id, "Noon"));
    h.repo.insert(draft_item(owner.id, "Midnight Draft"));

    let got = h
        .state
        .reader
        .search(&RequestContext::new(), &ItemQuery::by_name("midnight"))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(got.len(), 1);
    assert_eq!(got[0].item.name, "Midnight City");
    assert!(h.repo.batch_reads().is_empty());
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_source() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let item = published_item(owner.id, "Song");
    h.repo.insert(item.clone());
    h.cache.set_unavailable(true);

    let got = h
        .state
        .reader
        .get_published(&RequestContext::new(), &[item.id])
        .await
        .unwrap();
    assert_eq!(ids(&got), vec![item.id]);
    assert!(h.state.cache.metrics().cache_errors >= 1);
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_refetched() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let item = published_item(owner.id, "Song");
    h.repo.insert(item.clone());
    h.cache.insert_raw(
        &format!("published-items:{}", item.id),
        &b"not json"[..],
        Duration::from_secs(60),
    );

    let got = h
        .state
        .reader
        .get_published_one(&RequestContext::new(), item.id)
        .await
        .unwrap();
    assert_eq!(got.item.id, item.id);
    assert_eq!(h.state.cache.metrics().corrupt_entries, 1);
}

#[tokio::test]
async fn test_source_failure_surfaces() {
    let h = Harness::new();
    let owner = h.subject("Owner");
    let item = published_item(owner.id, "Song");
    h.repo.insert(item.clone());
    h.repo.set_fail_reads(true);

    let result = h
        .state
        .reader
        .get_published(&RequestContext::new(), &[item.id])
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_find_subjects_by_name() {
    let h = Harness::new();
    h.subject("Daft Punk");
    h.subject("Punk Rock Girl");
    h.subject("Beach House");
    let ctx = RequestContext::new();

    let found = h.state.reader.find_subjects(&ctx, "punk").await.unwrap();
    assert_eq!(found.len(), 2);
    assert!(h.state.reader.find_subjects(&ctx, "zzz").await.unwrap().is_empty());
    assert!(h.state.reader.find_subjects(&ctx, "   ").await.unwrap().is_empty());
}
