//! Property tests for order-preserving enrichment.

use std::sync::Arc;
use std::time::Duration;

use encore_catalog::{EnrichmentConfig, EnrichmentCoordinator};
use encore_core::EnrichedItem;
use encore_test_utils::fixtures::{published_item, subject};
use encore_test_utils::{ItemId, RequestContext, StaticSubjectDirectory};
use proptest::prelude::*;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever order lookups complete in, the output is the input minus
    /// failed rows, in input order.
    #[test]
    fn prop_enrichment_preserves_input_order(
        rows in proptest::collection::vec((0u64..50, any::<bool>()), 0..24),
        max_in_flight in 0usize..6,
    ) {
        let directory = StaticSubjectDirectory::new();
        let mut items = Vec::with_capacity(rows.len());
        let mut expected: Vec<ItemId> = Vec::new();
        for (i, (delay_ms, fails)) in rows.iter().enumerate() {
            let owner = subject(&format!("Owner {}", i));
            directory.insert(owner.clone());
            directory.delay_on(owner.id, Duration::from_millis(*delay_ms));
            if *fails {
                directory.fail_on(owner.id);
            }
            let item = published_item(owner.id, &format!("Song {}", i));
            if !*fails {
                expected.push(item.id);
            }
            items.push(item);
        }

        let coordinator = EnrichmentCoordinator::new(
            Arc::new(directory),
            &EnrichmentConfig { max_in_flight },
        );
        let got = paused_runtime().block_on(async {
            coordinator
                .enrich(&RequestContext::new(), items, EnrichedItem::build)
                .await
        });

        let got_ids: Vec<ItemId> = got.iter().map(|e| e.item.id).collect();
        prop_assert_eq!(got_ids, expected);
        prop_assert!(got.iter().all(|e| e.owner.id == e.item.owner_id));
    }
}
