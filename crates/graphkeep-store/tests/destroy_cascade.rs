//! Covers achilles/destroy-hash cascade deletion on store (spec §3, §4.1
//! step 6): a self-destroying node at sufficient difficulty removes its
//! victim in the same `store` call's transaction.

mod support;

use std::sync::Arc;

use graphkeep_core::hash::combine;
use graphkeep_core::ids::Id1;
use graphkeep_store::{DriverConfig, NodeDriver};
use support::{fresh_substrate, GenericNode, TestCodec};

#[tokio::test]
async fn a_destroyer_node_removes_its_victim() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let achilles = combine(&[b"victim-weakness"]);
    let victim = GenericNode::new(b"victim", b"owner").public().achilles(achilles.as_bytes()).image(b"victim-image");
    codec.register(&victim);
    driver.store(vec![victim.boxed()], 50, false).await.expect("store victim");
    assert!(driver.get_node_by_id1(&Id1(b"victim".to_vec()), 50).await.unwrap().is_some());

    let owner = b"destroyer-owner".to_vec();
    let mut destroyer = GenericNode::new(b"destroyer", &owner).destroys(achilles.as_bytes()).image(b"destroyer-image");
    destroyer.ref_id = Some(owner.clone());
    destroyer.difficulty = 2;
    codec.register(&destroyer);
    driver.store(vec![destroyer.boxed()], 51, false).await.expect("store destroyer");

    let victim_after = driver.get_node_by_id1(&Id1(b"victim".to_vec()), 51).await.expect("lookup");
    assert!(victim_after.is_none(), "victim should have been cascade-deleted");
}

#[tokio::test]
async fn a_self_destroyer_below_min_difficulty_does_not_cascade() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let achilles = combine(&[b"weak-victim"]);
    let victim = GenericNode::new(b"victim2", b"owner").public().achilles(achilles.as_bytes()).image(b"v2-image");
    codec.register(&victim);
    driver.store(vec![victim.boxed()], 50, false).await.expect("store victim");

    let owner = b"destroyer-owner-2".to_vec();
    let mut destroyer = GenericNode::new(b"destroyer2", &owner).destroys(achilles.as_bytes()).image(b"d2-image");
    destroyer.ref_id = Some(owner.clone());
    destroyer.difficulty = 0; // below DriverConfig::default()'s min_difficulty_total_destruction
    codec.register(&destroyer);
    driver.store(vec![destroyer.boxed()], 51, false).await.expect("store destroyer");

    let victim_after = driver.get_node_by_id1(&Id1(b"victim2".to_vec()), 51).await.expect("lookup");
    assert!(victim_after.is_some(), "victim should survive a too-weak self-destroy");
}
