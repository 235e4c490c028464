//! `filterDestroyed` / `filterUnique` / `filterExisting` (spec §4.1 steps
//! 1-3): the batch-narrowing passes that run before any row is written.

use std::collections::{HashMap, HashSet};

use graphkeep_core::error::CoreError;
use graphkeep_core::ids::Hash;
use graphkeep_core::node::Node;

use crate::schema::{self, destroy_hashes as destroy_col, nodes as node_col};
use crate::substrate::{Param, Tx};

type Result<T> = std::result::Result<T, CoreError>;

/// Step 1: drops any candidate whose achilles hash already has a matching
/// destroy hash in storage — a node whose destroyer already exists must
/// never enter storage.
pub async fn filter_destroyed(tx: &mut Tx<'_>, nodes: Vec<Box<dyn Node>>) -> Result<Vec<Box<dyn Node>>> {
    let mut all_hashes: Vec<Vec<u8>> = Vec::new();
    for node in &nodes {
        all_hashes.extend(node.get_achilles_hashes().into_iter().map(Hash::into_bytes));
    }
    if all_hashes.is_empty() {
        return Ok(nodes);
    }
    let matched = matching_destroy_hashes(tx, &all_hashes).await?;
    if matched.is_empty() {
        return Ok(nodes);
    }
    Ok(nodes
        .into_iter()
        .filter(|node| !node.get_achilles_hashes().into_iter().any(|h| matched.contains(h.as_bytes())))
        .collect())
}

async fn matching_destroy_hashes(tx: &mut Tx<'_>, hashes: &[Vec<u8>]) -> Result<HashSet<Vec<u8>>> {
    let placeholders = crate::substrate::placeholders(hashes.len());
    let sql = format!(
        "SELECT DISTINCT {hash} AS hash FROM {table} WHERE {hash} IN ({placeholders})",
        hash = destroy_col::HASH,
        table = schema::DESTROY_HASHES,
    );
    let params: Vec<Param> = hashes.iter().map(|h| Param::Bytes(h.clone())).collect();
    let rows = tx.all(&sql, &params).await?;
    use sqlx::Row;
    rows.iter()
        .map(|r| r.try_get::<Vec<u8>, _>("hash").map_err(|e| CoreError::Other(e.into())))
        .collect()
}

/// Step 2: for unique-flagged candidates, rejects any whose `uniqueHash`
/// collides with a row of a *different* `id1` (a collision against the
/// same `id1` is an idempotent re-store, allowed through to `filterExisting`).
pub async fn filter_unique(tx: &mut Tx<'_>, nodes: Vec<Box<dyn Node>>) -> Result<Vec<Box<dyn Node>>> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        if !node.is_unique() {
            out.push(node);
            continue;
        }
        let Some(unique_hash) = node.hash_unique() else {
            out.push(node);
            continue;
        };
        if let Some(existing_id1) = existing_unique_owner(tx, &unique_hash).await? {
            if existing_id1 != node.id1().as_bytes() {
                continue;
            }
        }
        out.push(node);
    }
    Ok(out)
}

async fn existing_unique_owner(tx: &mut Tx<'_>, hash: &Hash) -> Result<Option<Vec<u8>>> {
    let sql = format!(
        "SELECT {id1} AS id1 FROM {nodes} WHERE {col} = ? LIMIT 1",
        id1 = node_col::ID1,
        nodes = schema::NODES,
        col = node_col::UNIQUE_HASH,
    );
    let row = tx.get(&sql, &[Param::Bytes(hash.as_bytes().to_vec())]).await?;
    use sqlx::Row;
    match row {
        Some(r) => Ok(Some(r.try_get::<Vec<u8>, _>("id1").map_err(|e| CoreError::Other(e.into()))?)),
        None => Ok(None),
    }
}

/// Step 3: without `preserveTransient`, any candidate whose `id1` already
/// has a row is dropped. With `preserveTransient`, a candidate is dropped
/// only if the existing row's `transientHash` is unchanged; a changed
/// `transientHash` keeps the candidate so `storeNodes` can upsert it.
pub async fn filter_existing(tx: &mut Tx<'_>, nodes: Vec<Box<dyn Node>>, preserve_transient: bool) -> Result<Vec<Box<dyn Node>>> {
    if nodes.is_empty() {
        return Ok(nodes);
    }
    let id1s: Vec<Vec<u8>> = nodes.iter().map(|n| n.id1().as_bytes().to_vec()).collect();
    let existing = existing_transient_hashes(tx, &id1s).await?;
    Ok(nodes
        .into_iter()
        .filter(|node| match existing.get(node.id1().as_bytes()) {
            None => true,
            Some(existing_hash) => preserve_transient && *existing_hash != node.hash_transient(),
        })
        .collect())
}

async fn existing_transient_hashes(tx: &mut Tx<'_>, id1s: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, Hash>> {
    let placeholders = crate::substrate::placeholders(id1s.len());
    let sql = format!(
        "SELECT {id1} AS id1, {transient} AS transient FROM {nodes} WHERE {id1} IN ({placeholders})",
        id1 = node_col::ID1,
        transient = node_col::TRANSIENT_HASH,
        nodes = schema::NODES,
    );
    let params: Vec<Param> = id1s.iter().map(|i| Param::Bytes(i.clone())).collect();
    let rows = tx.all(&sql, &params).await?;
    use sqlx::Row;
    let mut out = HashMap::new();
    for r in &rows {
        let id1: Vec<u8> = r.try_get("id1").map_err(|e| CoreError::Other(e.into()))?;
        let transient: Vec<u8> = r.try_get("transient").map_err(|e| CoreError::Other(e.into()))?;
        out.insert(id1, Hash(transient));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_unique_struct_smoke() {
        // Real coverage lives in graphkeep-store/tests/ against a live
        // substrate; this module has no pure-function logic worth a unit
        // test in isolation.
        let _ = HashSet::<Vec<u8>>::new();
    }
}
