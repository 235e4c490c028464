//! Single-node read paths (spec §4.2, §4.3): `getNodeById1`, `getNodesById1`,
//! `fetchSingleNode`, `getRootNode`. Each opens no traversal of its own —
//! permission checks here walk a node's own ancestor chain directly rather
//! than through the level-by-level [`crate::query::QueryProcessor`], which
//! is built for multi-node graph fetches.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use graphkeep_core::error::CoreError;
use graphkeep_core::ids::{Hash, Id1, PublicKey};
use graphkeep_core::node::Node;
use graphkeep_core::NodeCodec;

use crate::query::permissions::{active_licenses_for_hashes, MAX_LICENSE_DISTANCE};
use crate::rows::{NodeRow, SELECT_COLUMNS};
use crate::schema::{self, nodes as node_col};
use crate::substrate::{Param, Tx};

use super::DriverConfig;

type Result<T> = std::result::Result<T, CoreError>;

fn decode_row(codec: &dyn NodeCodec, row: &NodeRow) -> Result<Box<dyn Node>> {
    codec.decode(&row.image).map_err(CoreError::Other)
}

async fn visibility_params(tx: &mut Tx<'_>, sql: &str, mut params: Vec<Param>, now: i64, now_tolerance_millis: i64) -> Result<Vec<NodeRow>> {
    params.push(Param::I64(now));
    params.push(Param::I64(now + now_tolerance_millis));
    let rows = tx.all(sql, &params).await?;
    rows.iter().map(NodeRow::from_row).collect()
}

/// `getNodeById1(id1, now)` (spec §4.2).
pub async fn get_node_by_id1(tx: &mut Tx<'_>, codec: &dyn NodeCodec, id1: &Id1, now: i64, now_tolerance_millis: i64) -> Result<Option<Box<dyn Node>>> {
    let sql = format!(
        "SELECT {select} FROM {nodes} WHERE {id1} = ? \
           AND ({expire} IS NULL OR {expire} > ?) AND {creation} <= ? AND {inactive} = 0 LIMIT 1",
        select = SELECT_COLUMNS,
        nodes = schema::NODES,
        id1 = node_col::ID1,
        expire = node_col::EXPIRE_TIME,
        creation = node_col::CREATION_TIME,
        inactive = node_col::IS_INACTIVE,
    );
    let rows = visibility_params(tx, &sql, vec![Param::Bytes(id1.as_bytes().to_vec())], now, now_tolerance_millis).await?;
    rows.into_iter().next().map(|row| decode_row(codec, &row)).transpose()
}

/// `getNodesById1(ids, now)` (spec §4.2): preserves the caller's order,
/// `None` where a row is missing or not currently visible.
pub async fn get_nodes_by_id1(
    tx: &mut Tx<'_>,
    codec: &dyn NodeCodec,
    id1s: &[Id1],
    now: i64,
    now_tolerance_millis: i64,
) -> Result<Vec<Option<Box<dyn Node>>>> {
    if id1s.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = crate::substrate::placeholders(id1s.len());
    let sql = format!(
        "SELECT {select} FROM {nodes} WHERE {id1} IN ({placeholders}) \
           AND ({expire} IS NULL OR {expire} > ?) AND {creation} <= ? AND {inactive} = 0",
        select = SELECT_COLUMNS,
        nodes = schema::NODES,
        id1 = node_col::ID1,
        expire = node_col::EXPIRE_TIME,
        creation = node_col::CREATION_TIME,
        inactive = node_col::IS_INACTIVE,
    );
    let params: Vec<Param> = id1s.iter().map(|i| Param::Bytes(i.as_bytes().to_vec())).collect();
    let rows = visibility_params(tx, &sql, params, now, now_tolerance_millis).await?;
    let mut by_id1: HashMap<Vec<u8>, NodeRow> = rows.into_iter().map(|r| (r.id1.as_bytes().to_vec(), r)).collect();
    id1s.iter()
        .map(|id1| match by_id1.remove(id1.as_bytes()) {
            Some(row) => decode_row(codec, &row).map(Some),
            None => Ok(None),
        })
        .collect()
}

async fn get_node_by_full_id(tx: &mut Tx<'_>, codec: &dyn NodeCodec, id: &[u8], now: i64, now_tolerance_millis: i64) -> Result<Option<Box<dyn Node>>> {
    let sql = format!(
        "SELECT {select} FROM {nodes} WHERE {idcol} = ? \
           AND ({expire} IS NULL OR {expire} > ?) AND {creation} <= ? AND {inactive} = 0 LIMIT 1",
        select = SELECT_COLUMNS,
        nodes = schema::NODES,
        idcol = node_col::ID,
        expire = node_col::EXPIRE_TIME,
        creation = node_col::CREATION_TIME,
        inactive = node_col::IS_INACTIVE,
    );
    let rows = visibility_params(tx, &sql, vec![Param::Bytes(id.to_vec())], now, now_tolerance_millis).await?;
    rows.into_iter().next().map(|row| decode_row(codec, &row)).transpose()
}

async fn fetch_row_by_id(tx: &mut Tx<'_>, id: &[u8]) -> Result<Option<NodeRow>> {
    let sql = format!("SELECT {select} FROM {nodes} WHERE {idcol} = ? LIMIT 1", select = SELECT_COLUMNS, nodes = schema::NODES, idcol = node_col::ID);
    let row = tx.get(&sql, &[Param::Bytes(id.to_vec())]).await?;
    row.as_ref().map(NodeRow::from_row).transpose()
}

struct AncestorStep {
    id: Vec<u8>,
    distance: u32,
    path_hash: Hash,
}

/// Walks the `parentId` chain from `start_id` directly against the
/// substrate (no cache — a single-node lookup has no sibling traversal to
/// amortize one against), mirroring [`crate::query::permissions`]'s
/// cache-backed license-tree walk.
async fn ancestor_chain(tx: &mut Tx<'_>, start_id: &[u8], max_distance: u32) -> Result<Vec<AncestorStep>> {
    let mut out = Vec::new();
    let mut cursor_id = start_id.to_vec();
    let mut prev_hash: Option<Hash> = None;
    for distance in 1..=max_distance {
        let Some(row) = fetch_row_by_id(tx, &cursor_id).await? else { break };
        if row.is_leaf {
            break;
        }
        let Some(parent_id) = row.parent_id.clone() else { break };
        let path_hash = graphkeep_core::hash::parent_path_hash(row.id1.as_bytes(), prev_hash.as_ref());
        out.push(AncestorStep { id: parent_id.clone(), distance, path_hash: path_hash.clone() });
        prev_hash = Some(path_hash);
        cursor_id = parent_id;
    }
    Ok(out)
}

async fn has_active_license(tx: &mut Tx<'_>, node: &dyn Node, owner_pk: &PublicKey, target_pk: &PublicKey, now: i64) -> Result<bool> {
    let max_distance = node.get_license_max_distance().min(MAX_LICENSE_DISTANCE);
    let chain = ancestor_chain(tx, &node.id(), max_distance).await?;
    let mut candidates: HashMap<Vec<u8>, Vec<(u32, Hash)>> = HashMap::new();
    for step in &chain {
        for hash in node.get_licensing_hashes(owner_pk, target_pk, Some(&step.id)) {
            candidates.entry(hash.as_bytes().to_vec()).or_default().push((step.distance, step.path_hash.clone()));
        }
    }
    if candidates.is_empty() {
        return Ok(false);
    }
    let hash_keys: HashSet<Vec<u8>> = candidates.keys().cloned().collect();
    let active = active_licenses_for_hashes(tx, &hash_keys, now).await?;
    let min_distance = node.get_license_min_distance();
    let disallow_retro = node.disallow_retro_licensing();
    for (hash, licenses) in &active {
        let Some(cands) = candidates.get(hash) else { continue };
        for (distance, path_hash) in cands {
            let ok = licenses.iter().any(|lic| {
                *distance >= min_distance
                    && !lic.restrictive_writer
                    && !lic.restrictive_manager
                    && (!disallow_retro || lic.license_creation_time <= node.creation_time())
                    && lic.parent_path_hash.as_ref().is_none_or(|want| want == path_hash)
            });
            if ok {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Whether `node` is visible to `(source_pk, target_pk)`: public passes
/// outright, licensed checks the ancestor license tree, otherwise private
/// send admission or a one-hop rights-by-association reference.
async fn is_visible(
    tx: &mut Tx<'_>,
    codec: &dyn NodeCodec,
    node: &dyn Node,
    source_pk: &PublicKey,
    target_pk: &PublicKey,
    now: i64,
    now_tolerance_millis: i64,
) -> Result<bool> {
    if node.is_public() {
        return Ok(true);
    }
    if node.is_licensed() {
        return has_active_license(tx, node, source_pk, target_pk, now).await;
    }
    if node.admits_private_send(source_pk, target_pk) {
        return Ok(true);
    }
    if node.has_rights_by_association() {
        if let Some(ref_id) = node.ref_id() {
            if let Some(ref_node) = get_node_by_full_id(tx, codec, ref_id, now, now_tolerance_millis).await? {
                return Ok(ref_node.is_public() || ref_node.admits_private_send(source_pk, target_pk));
            }
        }
    }
    Ok(false)
}

/// `fetchSingleNode(id1, now, sourcePK, targetPK)` (spec §4.2).
pub async fn fetch_single_node(
    tx: &mut Tx<'_>,
    codec: Arc<dyn NodeCodec>,
    config: &DriverConfig,
    id1: &Id1,
    now: i64,
    source_pk: &PublicKey,
    target_pk: &PublicKey,
) -> Result<Option<Box<dyn Node>>> {
    let Some(node) = get_node_by_id1(tx, codec.as_ref(), id1, now, config.now_tolerance_millis).await? else {
        return Ok(None);
    };
    if is_visible(tx, codec.as_ref(), node.as_ref(), source_pk, target_pk, now, config.now_tolerance_millis).await? {
        Ok(Some(node))
    } else {
        Ok(None)
    }
}

/// `getRootNode` (spec §4.3): rejects missing, licensed, rights-by-
/// association, or begin-restrictive-writer roots.
pub async fn get_root_node(
    tx: &mut Tx<'_>,
    codec: &dyn NodeCodec,
    config: &DriverConfig,
    root_id1: &Id1,
    now: i64,
    source_pk: &PublicKey,
    target_pk: &PublicKey,
) -> Result<Box<dyn Node>> {
    let Some(node) = get_node_by_id1(tx, codec, root_id1, now, config.now_tolerance_millis).await? else {
        return Err(CoreError::MissingRootNode);
    };
    if node.is_licensed() {
        return Err(CoreError::RootNodeLicensed);
    }
    if node.has_rights_by_association() || node.is_begin_restrictive_write_mode() {
        return Err(CoreError::NotAllowed);
    }
    if node.is_public() || node.admits_private_send(source_pk, target_pk) {
        return Ok(node);
    }
    Err(CoreError::NotAllowed)
}
