//! Covers `filterUnique`'s cross-id1 collision rule and `filterExisting`'s
//! `preserveTransient` upsert path (spec §4.1 steps 2-3).

mod support;

use std::sync::Arc;

use graphkeep_core::ids::Id1;
use graphkeep_store::{DriverConfig, NodeDriver};
use support::{fresh_substrate, GenericNode, TestCodec};

#[tokio::test]
async fn a_unique_hash_collision_on_a_different_id1_is_dropped_silently() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let first = GenericNode::new(b"first", b"owner").unique(b"shared-unique-hash").image(b"first-image");
    codec.register(&first);
    let outcome = driver.store(vec![first.boxed()], 1, false).await.expect("store first");
    assert_eq!(outcome.inserted_id1s, vec![b"first".to_vec()]);

    let second = GenericNode::new(b"second", b"owner").unique(b"shared-unique-hash").image(b"second-image");
    codec.register(&second);
    let outcome = driver.store(vec![second.boxed()], 2, false).await.expect("store second");
    assert!(outcome.inserted_id1s.is_empty(), "colliding unique hash on a different id1 must be dropped");

    let found = driver.get_node_by_id1(&Id1(b"second".to_vec()), 2).await.expect("lookup");
    assert!(found.is_none());
}

#[tokio::test]
async fn restoring_the_same_id1_with_the_same_unique_hash_is_allowed_through() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let node = GenericNode::new(b"idempotent", b"owner").unique(b"idempotent-hash").image(b"v1-image");
    codec.register(&node);
    driver.store(vec![node.clone().boxed()], 1, false).await.expect("store v1");

    // Re-storing the very same id1/unique hash is a no-op re-store, not a
    // collision: filterUnique lets it through to filterExisting, which then
    // drops it (without preserveTransient) because the row already exists.
    let outcome = driver.store(vec![node.boxed()], 2, false).await.expect("restore");
    assert!(outcome.inserted_id1s.is_empty());
}

#[tokio::test]
async fn preserve_transient_upserts_when_the_transient_hash_changes() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let v1 = GenericNode::new(b"mutable", b"owner").public().image(b"v1-image");
    codec.register(&v1);
    driver.store(vec![v1.boxed()], 1, false).await.expect("store v1");

    let found = driver.get_node_by_id1(&Id1(b"mutable".to_vec()), 1).await.expect("lookup").expect("present");
    assert_eq!(found.image(), b"v1-image");

    // Without preserveTransient, a changed image on the same id1 is dropped.
    let v2_no_preserve = GenericNode::new(b"mutable", b"owner").public().image(b"v2-image");
    codec.register(&v2_no_preserve);
    let outcome = driver.store(vec![v2_no_preserve.boxed()], 2, false).await.expect("store v2 no preserve");
    assert!(outcome.inserted_id1s.is_empty());
    let still_v1 = driver.get_node_by_id1(&Id1(b"mutable".to_vec()), 2).await.expect("lookup").expect("present");
    assert_eq!(still_v1.image(), b"v1-image");

    // With preserveTransient and a changed transient hash (the image bytes
    // feed hash_transient), the row is upserted.
    let v3 = GenericNode::new(b"mutable", b"owner").public().image(b"v3-image");
    codec.register(&v3);
    let outcome = driver.store(vec![v3.boxed()], 3, true).await.expect("store v3 preserve");
    assert_eq!(outcome.inserted_id1s, vec![b"mutable".to_vec()]);
    let now_v3 = driver.get_node_by_id1(&Id1(b"mutable".to_vec()), 3).await.expect("lookup").expect("present");
    assert_eq!(now_v3.image(), b"v3-image");
}
