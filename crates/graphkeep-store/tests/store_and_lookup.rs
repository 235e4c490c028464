//! Covers `store`, `getNodeById1`, `getNodesById1`, and `deleteNodes`
//! against a public, non-licensed graph (spec §4.1-§4.2).

mod support;

use std::sync::Arc;

use graphkeep_core::ids::Id1;
use graphkeep_store::{DriverConfig, NodeDriver};
use support::{fresh_substrate, GenericNode, TestCodec};

#[tokio::test]
async fn stores_and_reads_back_a_public_graph() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let owner = b"owner-1".as_slice();
    let root = GenericNode::new(b"root", owner).public().image(b"root-image");
    let child = GenericNode::new(b"child", owner).parent(b"root").public().image(b"child-image");
    codec.register(&root);
    codec.register(&child);

    let outcome = driver.store(vec![root.boxed(), child.boxed()], 1_000, false).await.expect("store");
    assert_eq!(outcome.inserted_id1s.len(), 2);

    let found = driver.get_node_by_id1(&Id1(b"root".to_vec()), 1_000).await.expect("lookup");
    let found = found.expect("root present");
    assert!(found.is_public());
    assert_eq!(found.image(), b"root-image");

    let both = driver
        .get_nodes_by_id1(&[Id1(b"root".to_vec()), Id1(b"child".to_vec()), Id1(b"missing".to_vec())], 1_000)
        .await
        .expect("batch lookup");
    assert!(both[0].is_some());
    assert!(both[1].is_some());
    assert!(both[2].is_none());
}

#[tokio::test]
async fn delete_nodes_removes_the_row() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let node = GenericNode::new(b"victim", b"owner").public().image(b"victim-image");
    codec.register(&node);
    driver.store(vec![node.boxed()], 10, false).await.expect("store");

    let removed = driver.delete_nodes(&[b"victim".to_vec()]).await.expect("delete");
    assert_eq!(removed, 1);

    let gone = driver.get_node_by_id1(&Id1(b"victim".to_vec()), 10).await.expect("lookup");
    assert!(gone.is_none());
}

#[tokio::test]
async fn a_non_public_non_licensed_node_is_invisible_to_strangers() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let sender = b"sender-pk".as_slice();
    let receiver = b"receiver-pk".as_slice();
    let stranger = b"stranger-pk".as_slice();

    let private = GenericNode::new(b"private1", b"owner").private_between(sender, receiver).image(b"private-image");
    codec.register(&private);
    driver.store(vec![private.boxed()], 5, false).await.expect("store");

    let as_stranger = driver
        .fetch_single_node(
            &Id1(b"private1".to_vec()),
            5,
            &graphkeep_core::ids::PublicKey(stranger.to_vec()),
            &graphkeep_core::ids::PublicKey(stranger.to_vec()),
        )
        .await
        .expect("fetch");
    assert!(as_stranger.is_none());

    let as_parties = driver
        .fetch_single_node(
            &Id1(b"private1".to_vec()),
            5,
            &graphkeep_core::ids::PublicKey(sender.to_vec()),
            &graphkeep_core::ids::PublicKey(receiver.to_vec()),
        )
        .await
        .expect("fetch")
        .expect("visible to sender/receiver");
    assert_eq!(as_parties.image(), b"private-image");
}
