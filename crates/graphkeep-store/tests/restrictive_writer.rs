//! Covers spec §8 seed scenario 5: a begin-restrictive-write-mode node `W`
//! gates its whole subtree. A child stored under `W` is invisible to fetches
//! through the public root until a `restrictiveModeWriter` license covering
//! the child's owner is stored for `W`.

mod support;

use std::ops::ControlFlow;
use std::sync::Arc;

use graphkeep_core::ids::PublicKey;
use graphkeep_store::query::select::{OrderDirection, OrderField};
use graphkeep_store::{DriverConfig, FetchQuery, NodeDriver};
use support::{fresh_substrate, GenericNode, TestCodec};

async fn fetch_ids(driver: &NodeDriver, root_id: &[u8]) -> Vec<Vec<u8>> {
    let query = FetchQuery {
        parent_id: Some(root_id.to_vec()),
        root_node: None,
        depth: Some(2),
        matches: Vec::new(),
        cutoff_time: 0,
        order_field: OrderField::CreationTime,
        order_direction: OrderDirection::Ascending,
        include_licenses: false,
        allow_rights_by_association: false,
        allow_embed: false,
    };
    let source = PublicKey(b"anyone".to_vec());
    let target = PublicKey(b"anyone".to_vec());
    let mut seen = Vec::new();
    driver
        .fetch(query, 100, source, target, false, |reply| {
            for event in reply.events {
                seen.push(event.node.id1().as_bytes().to_vec());
            }
            ControlFlow::Continue(())
        })
        .await
        .expect("fetch");
    seen.sort();
    seen
}

#[tokio::test]
async fn a_child_under_a_begin_restrictive_writer_is_hidden_until_a_writer_license_is_stored() {
    let substrate = fresh_substrate().await;
    let codec = Arc::new(TestCodec::new());
    let driver = NodeDriver::new(Arc::clone(&substrate), codec.clone(), DriverConfig::default());

    let owner_w = b"writer-owner".as_slice();
    let owner_x = b"child-owner".as_slice();

    let root = GenericNode::new(b"r", owner_w).public().image(b"r-image");
    let writer = GenericNode::new(b"w", owner_w).parent(b"r").public().begin_restrictive().image(b"w-image");
    let child = GenericNode::new(b"x", owner_x).parent(b"w").public().image(b"x-image");
    for n in [&root, &writer, &child] {
        codec.register(n);
    }
    driver.store(vec![root.boxed(), writer.boxed(), child.boxed()], 100, false).await.expect("store graph");

    let before = fetch_ids(&driver, b"r").await;
    assert_eq!(before, vec![b"w".to_vec()], "child must stay hidden without a restrictive-writer license");

    let license = GenericNode::new(b"lic", owner_w)
        .as_restrictive_writer_license_for(b"w", owner_x)
        .image(b"lic-image");
    codec.register(&license);
    driver.store(vec![license.boxed()], 100, false).await.expect("store license");

    let after = fetch_ids(&driver, b"r").await;
    assert_eq!(after, vec![b"w".to_vec(), b"x".to_vec()], "child becomes visible once the writer license is active");
}
