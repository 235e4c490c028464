//! `BlobDriver` — the fixed-size-fragment blob store (spec §4.5): append
//! writes, hash-verified finalize, read, copy-by-reference, and GC of
//! abandoned non-finalized data.
//!
//! Every public method expects a surrounding transaction per node/blob, the
//! same "one call, one transaction" convention as [`crate::driver::NodeDriver`].

use std::sync::Arc;

use graphkeep_core::error::CoreError;
use graphkeep_core::hash::BlobHasher;
use graphkeep_core::ids::{Hash, Id1};

use crate::schema::{self, blob_bindings as binding_col, blob_fragments as frag_col};
use crate::substrate::{Param, Substrate, Tx};

type Result<T> = std::result::Result<T, CoreError>;

/// Deployment-fixed fragment size (spec §4.5: "must never change on a
/// populated store"). Overridable only for tests exercising small payloads
/// without allocating real 32 KiB buffers.
#[derive(Debug, Clone, Copy)]
pub struct BlobConfig {
    pub fragment_size: usize,
    pub gc_batch_size: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            fragment_size: graphkeep_core::constants::BLOB_FRAGMENT_SIZE,
            gc_batch_size: graphkeep_core::constants::MAX_SQL_BATCH_SIZE,
        }
    }
}

pub struct BlobDriver {
    substrate: Arc<Substrate>,
    config: BlobConfig,
}

impl BlobDriver {
    #[must_use]
    pub fn new(substrate: Arc<Substrate>, config: BlobConfig) -> Self {
        Self { substrate, config }
    }

    /// `writeBlob(dataId, pos, data, now)` (spec §4.5).
    pub async fn write_blob(&self, data_id: &[u8], pos: u64, data: &[u8], now: i64) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        tracing::debug!(pos, len = data.len(), "write_blob: starting");
        let mut tx = self.substrate.begin().await?;
        let result = write_fragments(&mut tx, self.config.fragment_size, data_id, pos, data, now).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "write_blob: rolling back");
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// `readBlob(nodeId1, pos, length)` (spec §4.5): resolves `dataId` via
    /// the binding table (only finalized bindings), reads finalized
    /// fragments, and slices `[pos, pos+length)`. May return fewer bytes
    /// than requested if the blob is not yet fully finalized.
    pub async fn read_blob(&self, node_id1: &Id1, pos: u64, length: u64) -> Result<Vec<u8>> {
        let mut tx = self.substrate.begin().await?;
        let result = read_blob_inner(&mut tx, node_id1, pos, length, self.config.fragment_size).await;
        tx.commit().await?;
        result
    }

    /// `readBlobIntermediaryLength(dataId)` (spec §4.5): sum of all
    /// fragment lengths, finalized or not — used by callers to decide when
    /// to finalize.
    pub async fn read_blob_intermediary_length(&self, data_id: &[u8]) -> Result<u64> {
        let mut tx = self.substrate.begin().await?;
        let result = intermediary_length(&mut tx, data_id).await;
        tx.commit().await?;
        result
    }

    /// `finalizeWriteBlob(nodeId1, dataId, expectedLen, expectedHash, now)`
    /// (spec §4.5).
    pub async fn finalize_write_blob(&self, node_id1: &Id1, data_id: &[u8], expected_len: u64, expected_hash: &Hash, now: i64) -> Result<()> {
        tracing::debug!(expected_len, "finalize_write_blob: starting");
        let mut tx = self.substrate.begin().await?;
        let result = finalize_inner(&mut tx, node_id1, data_id, expected_len, expected_hash, now).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "finalize_write_blob: rolling back");
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// `copyBlob(fromNodeId1, toNodeId1, now)` (spec §4.5): zero-copy,
    /// binding-only.
    pub async fn copy_blob(&self, from_node_id1: &Id1, to_node_id1: &Id1, now: i64) -> Result<()> {
        let mut tx = self.substrate.begin().await?;
        let result = copy_blob_inner(&mut tx, from_node_id1, to_node_id1, now).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// `deleteBlobs(nodeId1s)` (spec §4.5): removes bindings, then removes
    /// fragments of any `dataId` left with no remaining binding.
    pub async fn delete_blobs(&self, node_id1s: &[Id1]) -> Result<()> {
        let mut tx = self.substrate.begin().await?;
        let result = delete_blobs_inner(&mut tx, node_id1s).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// `deleteNonfinalizedBlobData(olderThan, limit)` (spec §4.5): GC path
    /// for abandoned writes, batched with `LIMIT`. Returns the number of
    /// fragment rows removed.
    pub async fn delete_nonfinalized_blob_data(&self, older_than: i64, limit: u64) -> Result<u64> {
        let mut tx = self.substrate.begin().await?;
        let result = gc_nonfinalized(&mut tx, older_than, limit.min(self.config.gc_batch_size as u64)).await;
        match result {
            Ok(n) => {
                tx.commit().await?;
                Ok(n)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }
}

async fn fragment_row(tx: &mut Tx<'_>, data_id: &[u8], fragment_nr: i64) -> Result<Option<(Vec<u8>, bool)>> {
    let sql = format!(
        "SELECT {fragment}, {finalized} FROM {table} WHERE {data_id}=? AND {fragment_nr}=? LIMIT 1",
        fragment = frag_col::FRAGMENT,
        finalized = frag_col::FINALIZED,
        table = schema::BLOB_FRAGMENTS,
        data_id = frag_col::DATA_ID,
        fragment_nr = frag_col::FRAGMENT_NR,
    );
    let row = tx.get(&sql, &[Param::Bytes(data_id.to_vec()), Param::I64(fragment_nr)]).await?;
    use sqlx::Row;
    match row {
        Some(r) => {
            let fragment: Vec<u8> = r.try_get(0).map_err(|e| CoreError::Other(e.into()))?;
            let finalized: i64 = r.try_get(1).map_err(|e| CoreError::Other(e.into()))?;
            Ok(Some((fragment, finalized != 0)))
        }
        None => Ok(None),
    }
}

/// `DO UPDATE ... WHERE finalized=0` upsert of one fragment. Returns an
/// error if the fragment is already finalized (spec §4.5 immutability
/// rule).
async fn upsert_fragment(tx: &mut Tx<'_>, data_id: &[u8], fragment_nr: i64, fragment: &[u8], now: i64) -> Result<()> {
    if let Some((_, finalized)) = fragment_row(tx, data_id, fragment_nr).await? {
        if finalized {
            return Err(CoreError::Exists);
        }
        let sql = format!(
            "UPDATE {table} SET {fragment_col}=? WHERE {data_id}=? AND {fragment_nr}=? AND {finalized}=0",
            table = schema::BLOB_FRAGMENTS,
            fragment_col = frag_col::FRAGMENT,
            data_id = frag_col::DATA_ID,
            fragment_nr = frag_col::FRAGMENT_NR,
            finalized = frag_col::FINALIZED,
        );
        tx.run(
            &sql,
            &[Param::Bytes(fragment.to_vec()), Param::Bytes(data_id.to_vec()), Param::I64(fragment_nr)],
        )
        .await?;
    } else {
        let sql = format!(
            "INSERT INTO {table} ({data_id}, {fragment_nr}, {finalized}, {fragment_col}, {creation}) VALUES (?, ?, 0, ?, ?)",
            table = schema::BLOB_FRAGMENTS,
            data_id = frag_col::DATA_ID,
            fragment_nr = frag_col::FRAGMENT_NR,
            finalized = frag_col::FINALIZED,
            fragment_col = frag_col::FRAGMENT,
            creation = frag_col::CREATION_TIME,
        );
        tx.run(
            &sql,
            &[Param::Bytes(data_id.to_vec()), Param::I64(fragment_nr), Param::Bytes(fragment.to_vec()), Param::I64(now)],
        )
        .await?;
    }
    Ok(())
}

fn merge_into(existing: Option<Vec<u8>>, offset: usize, slice: &[u8], fragment_size: usize) -> Vec<u8> {
    let mut buf = existing.unwrap_or_default();
    let needed = offset + slice.len();
    if buf.len() < needed {
        buf.resize(needed.min(fragment_size), 0);
    }
    buf[offset..offset + slice.len()].copy_from_slice(slice);
    buf
}

async fn write_fragments(tx: &mut Tx<'_>, fragment_size: usize, data_id: &[u8], pos: u64, data: &[u8], now: i64) -> Result<()> {
    let fragment_size_u64 = fragment_size as u64;
    let start_idx = pos / fragment_size_u64;
    let boundary_diff = (pos - start_idx * fragment_size_u64) as usize;

    let mut cursor = 0usize;
    let mut fragment_nr = i64::try_from(start_idx).map_err(|_| CoreError::Malformed("fragment index overflow".into()))?;
    let mut first = true;

    while cursor < data.len() {
        let slot_capacity = if first { fragment_size - boundary_diff } else { fragment_size };
        let take = slot_capacity.min(data.len() - cursor);
        let slice = &data[cursor..cursor + take];

        let existing = fragment_row(tx, data_id, fragment_nr).await?;
        if let Some((_, true)) = existing {
            return Err(CoreError::Exists);
        }
        let existing_bytes = existing.map(|(bytes, _)| bytes);

        let fills_whole_fragment = (first && boundary_diff == 0 && take == fragment_size) || (!first && take == fragment_size);
        let merged = if fills_whole_fragment {
            slice.to_vec()
        } else {
            let offset = if first { boundary_diff } else { 0 };
            merge_into(existing_bytes, offset, slice, fragment_size)
        };

        upsert_fragment(tx, data_id, fragment_nr, &merged, now).await?;

        cursor += take;
        fragment_nr += 1;
        first = false;
    }
    Ok(())
}

async fn resolve_finalized_data_id(tx: &mut Tx<'_>, node_id1: &Id1) -> Result<Option<Vec<u8>>> {
    let sql = format!(
        "SELECT b.{data_id} AS data_id FROM {bindings} b \
           JOIN {fragments} f ON f.{fdata_id} = b.{data_id} \
           WHERE b.{node_id1} = ? AND f.{finalized} = 1 LIMIT 1",
        data_id = binding_col::DATA_ID,
        bindings = schema::BLOB_BINDINGS,
        fragments = schema::BLOB_FRAGMENTS,
        fdata_id = frag_col::DATA_ID,
        node_id1 = binding_col::NODE_ID1,
        finalized = frag_col::FINALIZED,
    );
    let row = tx.get(&sql, &[Param::Bytes(node_id1.as_bytes().to_vec())]).await?;
    use sqlx::Row;
    row.map(|r| r.try_get::<Vec<u8>, _>("data_id").map_err(|e| CoreError::Other(e.into()))).transpose()
}

async fn read_blob_inner(tx: &mut Tx<'_>, node_id1: &Id1, pos: u64, length: u64, fragment_size: usize) -> Result<Vec<u8>> {
    let Some(data_id) = resolve_finalized_data_id(tx, node_id1).await? else {
        return Ok(Vec::new());
    };
    let sql = format!(
        "SELECT {fragment_nr}, {fragment} FROM {table} WHERE {data_id}=? AND {finalized}=1 ORDER BY {fragment_nr}",
        fragment_nr = frag_col::FRAGMENT_NR,
        fragment = frag_col::FRAGMENT,
        table = schema::BLOB_FRAGMENTS,
        data_id = frag_col::DATA_ID,
        finalized = frag_col::FINALIZED,
    );
    let rows = tx.all(&sql, &[Param::Bytes(data_id)]).await?;
    use sqlx::Row;
    let mut whole = Vec::new();
    for row in &rows {
        let nr: i64 = row.try_get(0).map_err(|e| CoreError::Other(e.into()))?;
        let fragment: Vec<u8> = row.try_get(1).map_err(|e| CoreError::Other(e.into()))?;
        // Fragment nr is a fixed-size slot index; only the slot byte length
        // (not a fragment's own possibly-short actual length) gives the
        // right offset when earlier fragments are partially filled.
        let offset = usize::try_from(nr).unwrap_or(0) * fragment_size;
        if whole.len() < offset {
            whole.resize(offset, 0);
        }
        whole.extend_from_slice(&fragment);
    }
    let start = usize::try_from(pos).unwrap_or(usize::MAX).min(whole.len());
    let end = start.saturating_add(usize::try_from(length).unwrap_or(usize::MAX)).min(whole.len());
    Ok(whole[start..end].to_vec())
}

async fn intermediary_length(tx: &mut Tx<'_>, data_id: &[u8]) -> Result<u64> {
    let sql = format!(
        "SELECT SUM(LENGTH({fragment})) FROM {table} WHERE {data_id_col}=?",
        fragment = frag_col::FRAGMENT,
        table = schema::BLOB_FRAGMENTS,
        data_id_col = frag_col::DATA_ID,
    );
    let row = tx.get(&sql, &[Param::Bytes(data_id.to_vec())]).await?;
    use sqlx::Row;
    match row {
        Some(r) => {
            let sum: Option<i64> = r.try_get(0).map_err(|e| CoreError::Other(e.into()))?;
            Ok(u64::try_from(sum.unwrap_or(0)).unwrap_or(0))
        }
        None => Ok(0),
    }
}

async fn finalize_inner(tx: &mut Tx<'_>, node_id1: &Id1, data_id: &[u8], expected_len: u64, expected_hash: &Hash, now: i64) -> Result<()> {
    let current_len = intermediary_length(tx, data_id).await?;
    if current_len != expected_len {
        return Err(CoreError::Mismatch);
    }

    let already_finalized = has_finalized_fragments(tx, data_id).await?;
    if !already_finalized {
        let digest = hash_nonfinalized(tx, data_id).await?;
        if &digest != expected_hash {
            delete_fragments(tx, data_id).await?;
            return Err(CoreError::Mismatch);
        }
        let sql = format!(
            "UPDATE {table} SET {finalized}=1 WHERE {data_id_col}=?",
            table = schema::BLOB_FRAGMENTS,
            finalized = frag_col::FINALIZED,
            data_id_col = frag_col::DATA_ID,
        );
        tx.run(&sql, &[Param::Bytes(data_id.to_vec())]).await?;
    }

    let sql = format!(
        "INSERT INTO {table} ({node_id1}, {data_id_col}, {storage_time}) VALUES (?, ?, ?)",
        table = schema::BLOB_BINDINGS,
        node_id1 = binding_col::NODE_ID1,
        data_id_col = binding_col::DATA_ID,
        storage_time = binding_col::STORAGE_TIME,
    );
    tx.run(
        &sql,
        &[Param::Bytes(node_id1.as_bytes().to_vec()), Param::Bytes(data_id.to_vec()), Param::I64(now)],
    )
    .await?;
    Ok(())
}

async fn has_finalized_fragments(tx: &mut Tx<'_>, data_id: &[u8]) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {table} WHERE {data_id_col}=? AND {finalized}=1 LIMIT 1",
        table = schema::BLOB_FRAGMENTS,
        data_id_col = frag_col::DATA_ID,
        finalized = frag_col::FINALIZED,
    );
    Ok(tx.get(&sql, &[Param::Bytes(data_id.to_vec())]).await?.is_some())
}

async fn hash_nonfinalized(tx: &mut Tx<'_>, data_id: &[u8]) -> Result<Hash> {
    let sql = format!(
        "SELECT {fragment} FROM {table} WHERE {data_id_col}=? AND {finalized}=0 ORDER BY {fragment_nr}",
        fragment = frag_col::FRAGMENT,
        table = schema::BLOB_FRAGMENTS,
        data_id_col = frag_col::DATA_ID,
        fragment_nr = frag_col::FRAGMENT_NR,
    );
    let rows = tx.all(&sql, &[Param::Bytes(data_id.to_vec())]).await?;
    use sqlx::Row;
    let mut hasher = BlobHasher::new();
    for row in &rows {
        let fragment: Vec<u8> = row.try_get(0).map_err(|e| CoreError::Other(e.into()))?;
        hasher.update(&fragment);
    }
    Ok(hasher.finalize())
}

async fn delete_fragments(tx: &mut Tx<'_>, data_id: &[u8]) -> Result<()> {
    let sql = format!("DELETE FROM {table} WHERE {data_id_col}=?", table = schema::BLOB_FRAGMENTS, data_id_col = frag_col::DATA_ID);
    tx.run(&sql, &[Param::Bytes(data_id.to_vec())]).await?;
    Ok(())
}

async fn copy_blob_inner(tx: &mut Tx<'_>, from_node_id1: &Id1, to_node_id1: &Id1, now: i64) -> Result<()> {
    let Some(data_id) = resolve_finalized_data_id(tx, from_node_id1).await? else {
        return Err(CoreError::Malformed("copy_blob: source has no finalized binding".into()));
    };
    let sql = format!(
        "INSERT INTO {table} ({node_id1}, {data_id_col}, {storage_time}) VALUES (?, ?, ?)",
        table = schema::BLOB_BINDINGS,
        node_id1 = binding_col::NODE_ID1,
        data_id_col = binding_col::DATA_ID,
        storage_time = binding_col::STORAGE_TIME,
    );
    tx.run(&sql, &[Param::Bytes(to_node_id1.as_bytes().to_vec()), Param::Bytes(data_id), Param::I64(now)]).await?;
    Ok(())
}

async fn delete_blobs_inner(tx: &mut Tx<'_>, node_id1s: &[Id1]) -> Result<()> {
    if node_id1s.is_empty() {
        return Ok(());
    }
    let placeholders = crate::substrate::placeholders(node_id1s.len());
    let params: Vec<Param> = node_id1s.iter().map(|i| Param::Bytes(i.as_bytes().to_vec())).collect();

    let select_sql = format!(
        "SELECT DISTINCT {data_id} AS data_id FROM {table} WHERE {node_id1} IN ({placeholders})",
        data_id = binding_col::DATA_ID,
        table = schema::BLOB_BINDINGS,
        node_id1 = binding_col::NODE_ID1,
    );
    let rows = tx.all(&select_sql, &params).await?;
    use sqlx::Row;
    let touched_data_ids: Vec<Vec<u8>> = rows
        .iter()
        .map(|r| r.try_get::<Vec<u8>, _>("data_id").map_err(|e| CoreError::Other(e.into())))
        .collect::<Result<_>>()?;

    let delete_bindings_sql = format!(
        "DELETE FROM {table} WHERE {node_id1} IN ({placeholders})",
        table = schema::BLOB_BINDINGS,
        node_id1 = binding_col::NODE_ID1,
    );
    tx.run(&delete_bindings_sql, &params).await?;

    for data_id in touched_data_ids {
        let remaining_sql = format!(
            "SELECT 1 FROM {table} WHERE {data_id_col}=? LIMIT 1",
            table = schema::BLOB_BINDINGS,
            data_id_col = binding_col::DATA_ID,
        );
        let still_bound = tx.get(&remaining_sql, &[Param::Bytes(data_id.clone())]).await?.is_some();
        if !still_bound {
            delete_fragments(tx, &data_id).await?;
        }
    }
    Ok(())
}

async fn gc_nonfinalized(tx: &mut Tx<'_>, older_than: i64, limit: u64) -> Result<u64> {
    let select_sql = format!(
        "SELECT DISTINCT {data_id} AS data_id FROM {table} WHERE {finalized}=0 AND {creation} < ? LIMIT {limit}",
        data_id = frag_col::DATA_ID,
        table = schema::BLOB_FRAGMENTS,
        finalized = frag_col::FINALIZED,
        creation = frag_col::CREATION_TIME,
    );
    let rows = tx.all(&select_sql, &[Param::I64(older_than)]).await?;
    use sqlx::Row;
    let data_ids: Vec<Vec<u8>> = rows
        .iter()
        .map(|r| r.try_get::<Vec<u8>, _>("data_id").map_err(|e| CoreError::Other(e.into())))
        .collect::<Result<_>>()?;
    if data_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = crate::substrate::placeholders(data_ids.len());
    let params: Vec<Param> = data_ids.into_iter().map(Param::Bytes).collect();
    let delete_sql = format!(
        "DELETE FROM {table} WHERE {finalized}=0 AND {data_id_col} IN ({placeholders})",
        table = schema::BLOB_FRAGMENTS,
        finalized = frag_col::FINALIZED,
        data_id_col = frag_col::DATA_ID,
    );
    tx.run(&delete_sql, &params).await
}
