//! Covers the full blob fragment lifecycle (spec §4.5): write across
//! fragment boundaries, hash-verified finalize, a mismatch-then-retry path,
//! read slicing, zero-copy `copyBlob`, and `deleteBlobs`/GC of orphaned
//! fragments. Uses a small `fragment_size` so a handful of bytes already
//! exercises multiple fragments.

mod support;

use graphkeep_core::hash::BlobHasher;
use graphkeep_core::ids::{Hash, Id1};
use graphkeep_store::blob::{BlobConfig, BlobDriver};
use support::fresh_substrate;

fn digest(bytes: &[u8]) -> Hash {
    let mut h = BlobHasher::new();
    h.update(bytes);
    h.finalize()
}

#[tokio::test]
async fn writes_finalizes_and_reads_back_across_fragment_boundaries() {
    let substrate = fresh_substrate().await;
    let driver = BlobDriver::new(substrate, BlobConfig { fragment_size: 4, gc_batch_size: 100 });

    let data_id = b"blob-1".to_vec();
    let payload = b"abcdefghij".as_slice(); // spans fragments 0,1,2 at fragment_size=4

    driver.write_blob(&data_id, 0, payload, 1).await.expect("write");
    assert_eq!(driver.read_blob_intermediary_length(&data_id).await.expect("len"), payload.len() as u64);

    let node = Id1(b"node-a".to_vec());
    driver.finalize_write_blob(&node, &data_id, payload.len() as u64, &digest(payload), 2).await.expect("finalize");

    let whole = driver.read_blob(&node, 0, payload.len() as u64).await.expect("read");
    assert_eq!(whole, payload);

    let middle = driver.read_blob(&node, 4, 4).await.expect("read middle");
    assert_eq!(middle, b"efgh");

    let tail = driver.read_blob(&node, 8, 100).await.expect("read past end clamps");
    assert_eq!(tail, b"ij");
}

#[tokio::test]
async fn a_hash_mismatch_on_finalize_deletes_fragments_and_allows_a_retry() {
    let substrate = fresh_substrate().await;
    let driver = BlobDriver::new(substrate, BlobConfig { fragment_size: 4, gc_batch_size: 100 });

    let data_id = b"blob-2".to_vec();
    let payload = b"xyz".as_slice();
    driver.write_blob(&data_id, 0, payload, 1).await.expect("write");

    let node = Id1(b"node-b".to_vec());
    let wrong_hash = digest(b"not-the-payload");
    let err = driver
        .finalize_write_blob(&node, &data_id, payload.len() as u64, &wrong_hash, 2)
        .await
        .expect_err("hash mismatch must fail");
    assert!(matches!(err, graphkeep_core::error::CoreError::Mismatch));

    // The failed finalize deletes the nonfinalized fragments entirely.
    assert_eq!(driver.read_blob_intermediary_length(&data_id).await.expect("len"), 0);

    // Retry: rewrite the same data and finalize with the correct hash.
    driver.write_blob(&data_id, 0, payload, 3).await.expect("rewrite");
    driver.finalize_write_blob(&node, &data_id, payload.len() as u64, &digest(payload), 4).await.expect("finalize retry");

    let read_back = driver.read_blob(&node, 0, payload.len() as u64).await.expect("read");
    assert_eq!(read_back, payload);
}

#[tokio::test]
async fn copy_blob_binds_a_second_node_without_duplicating_fragments() {
    let substrate = fresh_substrate().await;
    let driver = BlobDriver::new(substrate, BlobConfig { fragment_size: 4, gc_batch_size: 100 });

    let data_id = b"blob-3".to_vec();
    let payload = b"shared-data".as_slice();
    driver.write_blob(&data_id, 0, payload, 1).await.expect("write");

    let from_node = Id1(b"node-from".to_vec());
    driver.finalize_write_blob(&from_node, &data_id, payload.len() as u64, &digest(payload), 2).await.expect("finalize");

    let to_node = Id1(b"node-to".to_vec());
    driver.copy_blob(&from_node, &to_node, 3).await.expect("copy");

    let copied = driver.read_blob(&to_node, 0, payload.len() as u64).await.expect("read copy");
    assert_eq!(copied, payload);

    // Deleting only the original binding must leave the copy readable, and
    // the fragments alive since the copy still binds the same dataId.
    driver.delete_blobs(&[from_node]).await.expect("delete original binding");
    assert!(driver.read_blob_intermediary_length(&data_id).await.expect("len") > 0);
    let still_there = driver.read_blob(&to_node, 0, payload.len() as u64).await.expect("read after delete");
    assert_eq!(still_there, payload);

    // Deleting the last binding frees the fragments.
    driver.delete_blobs(&[to_node]).await.expect("delete last binding");
    assert_eq!(driver.read_blob_intermediary_length(&data_id).await.expect("len"), 0);
}

#[tokio::test]
async fn gc_removes_old_nonfinalized_fragments_but_spares_finalized_ones() {
    let substrate = fresh_substrate().await;
    let driver = BlobDriver::new(substrate, BlobConfig { fragment_size: 4, gc_batch_size: 100 });

    let abandoned = b"blob-abandoned".to_vec();
    driver.write_blob(&abandoned, 0, b"never-finalized", 10).await.expect("write");

    let kept_id = b"blob-kept".to_vec();
    let payload = b"keep-me".as_slice();
    driver.write_blob(&kept_id, 0, payload, 10).await.expect("write kept");
    let node = Id1(b"node-kept".to_vec());
    driver.finalize_write_blob(&node, &kept_id, payload.len() as u64, &digest(payload), 10).await.expect("finalize kept");

    let removed = driver.delete_nonfinalized_blob_data(1_000, 100).await.expect("gc");
    assert!(removed > 0, "gc should have removed the abandoned write's fragments");

    assert_eq!(driver.read_blob_intermediary_length(&abandoned).await.expect("len"), 0);
    let still_readable = driver.read_blob(&node, 0, payload.len() as u64).await.expect("read");
    assert_eq!(still_readable, payload);
}
