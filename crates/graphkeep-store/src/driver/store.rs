//! `storeNodes` orchestration (spec §4.1 steps 1-7): filter passes,
//! bottom-set computation, license-bump detection, side-index + node
//! upsert, cascade-destroy, and `freshenParentTrail`.

use std::collections::HashSet;

use graphkeep_core::error::CoreError;
use graphkeep_core::ids::{Hash, PublicKey};
use graphkeep_core::node::{LicensingHashEntry, Node, NodeKind};

use crate::rows::{NodeRow, INSERT_COLUMNS};
use crate::schema::{
    self, achilles_hashes as achilles_col, destroy_hashes as destroy_col, friend_certs as friend_col,
    licensing_hashes as lic_col, nodes as node_col,
};
use crate::substrate::{Param, Tx};

use super::filters;
use super::{delete, DriverConfig, StoreOutcome};

type Result<T> = std::result::Result<T, CoreError>;

pub async fn run(
    tx: &mut Tx<'_>,
    config: &DriverConfig,
    nodes: Vec<Box<dyn Node>>,
    now: i64,
    preserve_transient: bool,
) -> Result<StoreOutcome> {
    // Steps 1-3: narrow the batch.
    let nodes = filters::filter_destroyed(tx, nodes).await?;
    let nodes = filters::filter_unique(tx, nodes).await?;
    let nodes = filters::filter_existing(tx, nodes, preserve_transient).await?;
    if nodes.is_empty() {
        tracing::debug!("store: nothing survived filtering");
        return Ok(StoreOutcome::default());
    }

    // Step 4: bottom-set. A node's `id` referenced by another batch member's
    // `parentId` is interior; a node nobody in this batch points at is a
    // leaf of the batch, and its own parent needs a trail refresh.
    let referenced: HashSet<Vec<u8>> = nodes.iter().filter_map(|n| n.parent_id().map(<[u8]>::to_vec)).collect();
    let mut freshen_parents: HashSet<Vec<u8>> = HashSet::new();
    for node in &nodes {
        if !referenced.contains(&node.id()) {
            if let Some(parent_id) = node.parent_id() {
                freshen_parents.insert(parent_id.to_vec());
            }
        }
    }

    // Step 5: license-bump detection. A license node whose licensee hashes
    // are not all already backed by some other active license may be
    // granting coverage to rows that precomputed a matching `bumpHash` while
    // dormant; bump those rows so they propagate.
    for node in &nodes {
        if node.kind() != NodeKind::License {
            continue;
        }
        let licensee_hashes = node.get_licensee_hashes();
        if licensee_hashes.is_empty() || !has_any_unmatched(tx, &licensee_hashes, now).await? {
            continue;
        }
        let ref_id = node.ref_id().unwrap_or(&[]);
        let parent_id = node.parent_id().unwrap_or(&[]);
        let bump = graphkeep_core::hash::bump_hash(ref_id, parent_id);
        let bumped_parents = bump_nodes(tx, &bump, now).await?;
        freshen_parents.extend(bumped_parents);
    }

    // Step 6: side-index rows + node upsert, plus cascade-destroy for any
    // destroy hash this batch newly introduces.
    let mut inserted_id1s = Vec::with_capacity(nodes.len());
    let mut blob_candidate_id1s = Vec::new();
    for node in &nodes {
        let destroyed_parents = store_one(tx, node.as_ref(), now, preserve_transient, config.min_difficulty_total_destruction).await?;
        freshen_parents.extend(destroyed_parents);
        inserted_id1s.push(node.id1().as_bytes().to_vec());
        if node.has_online_id() {
            blob_candidate_id1s.push(node.id1().as_bytes().to_vec());
        }
    }

    // Step 7: freshenParentTrail.
    let freshened = freshen_parent_trail(tx, config.max_freshen_depth, &freshen_parents, now).await?;

    Ok(StoreOutcome { inserted_id1s, freshened_parent_ids: freshened, blob_candidate_id1s })
}

/// Stores one node's side-index rows and its own row, then cascades a
/// destroy for any hash it produces. Returns the parent ids of any rows
/// just deleted by that cascade, for the caller's freshen set.
async fn store_one(
    tx: &mut Tx<'_>,
    node: &dyn Node,
    now: i64,
    preserve_transient: bool,
    min_difficulty_total_destruction: u32,
) -> Result<Vec<Vec<u8>>> {
    let id1_bytes = node.id1().as_bytes().to_vec();

    for hash in node.get_achilles_hashes() {
        insert_side_hash(tx, schema::ACHILLES_HASHES, achilles_col::ID1, achilles_col::HASH, &id1_bytes, &hash).await?;
    }
    for entry in node.licensing_hash_entries() {
        insert_licensing_hash(tx, &id1_bytes, &entry).await?;
    }
    let destroy_hashes = node.get_destroy_hashes();
    for hash in &destroy_hashes {
        insert_side_hash(tx, schema::DESTROY_HASHES, destroy_col::ID1, destroy_col::HASH, &id1_bytes, hash).await?;
    }
    if node.kind() == NodeKind::CarrierWithFriendCert {
        if let (Some(issuer), Some(constraints)) = (node.get_issuer_public_key(), node.get_constraints()) {
            insert_friend_cert(tx, &id1_bytes, issuer, constraints, node.image()).await?;
        }
    }

    upsert_node_row(tx, node, now, preserve_transient).await?;

    if destroy_hashes.is_empty() {
        return Ok(Vec::new());
    }
    let total_destruction = node.ref_id() == Some(node.owner().as_bytes());
    if total_destruction && node.difficulty() < min_difficulty_total_destruction {
        tracing::debug!(difficulty = node.difficulty(), "store: self-destroy below min difficulty, skipping cascade");
        return Ok(Vec::new());
    }
    cascade_destroy(tx, &destroy_hashes).await
}

async fn insert_side_hash(tx: &mut Tx<'_>, table: &str, id1_col: &str, hash_col: &str, id1: &[u8], hash: &Hash) -> Result<()> {
    let sql = format!("INSERT INTO {table} ({id1_col}, {hash_col}) VALUES (?, ?)");
    tx.run(&sql, &[Param::Bytes(id1.to_vec()), Param::Bytes(hash.as_bytes().to_vec())]).await?;
    Ok(())
}

async fn insert_licensing_hash(tx: &mut Tx<'_>, id1: &[u8], entry: &LicensingHashEntry) -> Result<()> {
    let sql = format!(
        "INSERT INTO {table} ({id1c}, {hashc}, {retro}, {path}, {writer}, {manager}) VALUES (?, ?, ?, ?, ?, ?)",
        table = schema::LICENSING_HASHES,
        id1c = lic_col::ID1,
        hashc = lic_col::HASH,
        retro = lic_col::DISALLOW_RETRO,
        path = lic_col::PARENT_PATH_HASH,
        writer = lic_col::RESTRICTIVE_WRITER,
        manager = lic_col::RESTRICTIVE_MANAGER,
    );
    let params = vec![
        Param::Bytes(id1.to_vec()),
        Param::Bytes(entry.hash.as_bytes().to_vec()),
        Param::Bool(entry.disallow_retro),
        entry.parent_path_hash.as_ref().map(|h| h.as_bytes().to_vec()).into(),
        Param::Bool(entry.restrictive_writer),
        Param::Bool(entry.restrictive_manager),
    ];
    tx.run(&sql, &params).await?;
    Ok(())
}

async fn insert_friend_cert(tx: &mut Tx<'_>, id1: &[u8], issuer: &PublicKey, constraints: &[u8], image: &[u8]) -> Result<()> {
    let sql = format!(
        "INSERT INTO {table} ({id1c}, {issuerc}, {constraintsc}, {imagec}) VALUES (?, ?, ?, ?)",
        table = schema::FRIEND_CERTS,
        id1c = friend_col::ID1,
        issuerc = friend_col::ISSUER,
        constraintsc = friend_col::CONSTRAINTS,
        imagec = friend_col::IMAGE,
    );
    let params = vec![
        Param::Bytes(id1.to_vec()),
        Param::Bytes(issuer.as_bytes().to_vec()),
        Param::Bytes(constraints.to_vec()),
        Param::Bytes(image.to_vec()),
    ];
    tx.run(&sql, &params).await?;
    Ok(())
}

async fn upsert_node_row(tx: &mut Tx<'_>, node: &dyn Node, now: i64, preserve_transient: bool) -> Result<()> {
    let params = NodeRow::insert_params(node, now);
    let value_placeholders = crate::substrate::placeholders(params.len());
    let conflict_clause = if preserve_transient {
        format!(
            "ON CONFLICT ({id1}) DO UPDATE SET {transient}=excluded.{transient}, {update}=excluded.{update}, \
             {trail}=excluded.{trail}, {inactive}=excluded.{inactive}, {image}=excluded.{image}",
            id1 = node_col::ID1,
            transient = node_col::TRANSIENT_HASH,
            update = node_col::UPDATE_TIME,
            trail = node_col::TRAIL_UPDATE_TIME,
            inactive = node_col::IS_INACTIVE,
            image = node_col::IMAGE,
        )
    } else {
        format!("ON CONFLICT ({id1}) DO NOTHING", id1 = node_col::ID1)
    };
    let sql = format!(
        "INSERT INTO {nodes} ({cols}) VALUES ({placeholders}) {conflict}",
        nodes = schema::NODES,
        cols = INSERT_COLUMNS,
        placeholders = value_placeholders,
        conflict = conflict_clause,
    );
    tx.run(&sql, &params).await?;
    Ok(())
}

/// Whether any of `hashes` currently lacks an active backing row in
/// `licensing_hashes` — i.e. a licensee hash this store's license node
/// covers that no other active license has already granted.
async fn has_any_unmatched(tx: &mut Tx<'_>, hashes: &[Hash], now: i64) -> Result<bool> {
    if hashes.is_empty() {
        return Ok(false);
    }
    let hash_bytes: Vec<Vec<u8>> = hashes.iter().map(|h| h.as_bytes().to_vec()).collect();
    let placeholders = crate::substrate::placeholders(hash_bytes.len());
    let sql = format!(
        "SELECT DISTINCT lh.{hash} AS hash FROM {lic} lh JOIN {nodes} n ON n.{id1_n} = lh.{id1_l} \
         WHERE lh.{hash} IN ({placeholders}) AND (n.{expire} IS NULL OR n.{expire} > ?) AND n.{creation} <= ?",
        hash = lic_col::HASH,
        lic = schema::LICENSING_HASHES,
        nodes = schema::NODES,
        id1_n = node_col::ID1,
        id1_l = lic_col::ID1,
        expire = node_col::EXPIRE_TIME,
        creation = node_col::CREATION_TIME,
        placeholders = placeholders,
    );
    let mut params: Vec<Param> = hash_bytes.iter().map(|h| Param::Bytes(h.clone())).collect();
    params.push(Param::I64(now));
    params.push(Param::I64(now));
    let rows = tx.all(&sql, &params).await?;
    use sqlx::Row;
    let matched: HashSet<Vec<u8>> = rows
        .iter()
        .map(|r| r.try_get::<Vec<u8>, _>("hash").map_err(|e| CoreError::Other(e.into())))
        .collect::<Result<_>>()?;
    Ok(hash_bytes.iter().any(|h| !matched.contains(h)))
}

/// Finds rows whose precomputed `bumpHash` matches `bump`, stamps their
/// `updateTime`/`trailUpdateTime`, and returns their parent ids.
async fn bump_nodes(tx: &mut Tx<'_>, bump: &Hash, now: i64) -> Result<Vec<Vec<u8>>> {
    let sql = format!(
        "SELECT {id1}, {parent_id} FROM {nodes} WHERE {bump_col} = ?",
        id1 = node_col::ID1,
        parent_id = node_col::PARENT_ID,
        nodes = schema::NODES,
        bump_col = node_col::BUMP_HASH,
    );
    let rows = tx.all(&sql, &[Param::Bytes(bump.as_bytes().to_vec())]).await?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    use sqlx::Row;
    let parsed: Vec<(Vec<u8>, Option<Vec<u8>>)> = rows
        .iter()
        .map(|r| {
            let id1: Vec<u8> = r.try_get(node_col::ID1).map_err(|e| CoreError::Other(e.into()))?;
            let parent_id: Option<Vec<u8>> = r.try_get(node_col::PARENT_ID).map_err(|e| CoreError::Other(e.into()))?;
            Ok::<_, CoreError>((id1, parent_id))
        })
        .collect::<Result<_>>()?;
    let (id1s, parents): (Vec<Vec<u8>>, Vec<Option<Vec<u8>>>) = parsed.into_iter().unzip();
    let placeholders = crate::substrate::placeholders(id1s.len());
    let update_sql = format!(
        "UPDATE {nodes} SET {update}=?, {trail}=? WHERE {id1} IN ({placeholders})",
        nodes = schema::NODES,
        update = node_col::UPDATE_TIME,
        trail = node_col::TRAIL_UPDATE_TIME,
        id1 = node_col::ID1,
    );
    let mut params = vec![Param::I64(now), Param::I64(now)];
    params.extend(id1s.into_iter().map(Param::Bytes));
    tx.run(&update_sql, &params).await?;
    Ok(parents.into_iter().flatten().collect())
}

async fn cascade_destroy(tx: &mut Tx<'_>, destroy_hashes: &[Hash]) -> Result<Vec<Vec<u8>>> {
    let hash_bytes: Vec<Vec<u8>> = destroy_hashes.iter().map(|h| h.as_bytes().to_vec()).collect();
    let placeholders = crate::substrate::placeholders(hash_bytes.len());
    let sql = format!(
        "SELECT DISTINCT {id1} AS id1 FROM {table} WHERE {hash} IN ({placeholders})",
        id1 = achilles_col::ID1,
        table = schema::ACHILLES_HASHES,
        hash = achilles_col::HASH,
        placeholders = placeholders,
    );
    let params: Vec<Param> = hash_bytes.iter().map(|h| Param::Bytes(h.clone())).collect();
    let rows = tx.all(&sql, &params).await?;
    use sqlx::Row;
    let victim_id1s: Vec<Vec<u8>> = rows
        .iter()
        .map(|r| r.try_get::<Vec<u8>, _>("id1").map_err(|e| CoreError::Other(e.into())))
        .collect::<Result<_>>()?;
    if victim_id1s.is_empty() {
        return Ok(Vec::new());
    }
    let parents = victim_parent_ids(tx, &victim_id1s).await?;
    delete::run(tx, graphkeep_core::constants::MAX_SQL_BATCH_SIZE, &victim_id1s).await?;
    Ok(parents)
}

async fn victim_parent_ids(tx: &mut Tx<'_>, id1s: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
    let placeholders = crate::substrate::placeholders(id1s.len());
    let sql = format!(
        "SELECT {parent_id} AS parent_id FROM {nodes} WHERE {id1} IN ({placeholders}) AND {parent_id} IS NOT NULL",
        parent_id = node_col::PARENT_ID,
        nodes = schema::NODES,
        id1 = node_col::ID1,
        placeholders = placeholders,
    );
    let params: Vec<Param> = id1s.iter().map(|i| Param::Bytes(i.clone())).collect();
    let rows = tx.all(&sql, &params).await?;
    use sqlx::Row;
    rows.iter()
        .map(|r| r.try_get::<Vec<u8>, _>("parent_id").map_err(|e| CoreError::Other(e.into())))
        .collect()
}

/// Walks each freshen id's ancestor chain via its own `parentId` field up
/// to `max_depth`, stamping `trailUpdateTime` along the way so downstream
/// consumers see the batch's effect propagate upward. Returns the id1s
/// touched.
pub(super) async fn freshen_parent_trail(tx: &mut Tx<'_>, max_depth: u32, freshen_ids: &HashSet<Vec<u8>>, now: i64) -> Result<Vec<Vec<u8>>> {
    let mut touched: Vec<Vec<u8>> = Vec::new();
    for start_id in freshen_ids {
        let mut cursor = start_id.clone();
        for _ in 0..max_depth {
            let Some((id1, parent_id)) = lookup_id1_and_parent(tx, &cursor).await? else { break };
            touched.push(id1);
            match parent_id {
                Some(p) => cursor = p,
                None => break,
            }
        }
    }
    if touched.is_empty() {
        return Ok(Vec::new());
    }
    touched.sort();
    touched.dedup();
    let placeholders = crate::substrate::placeholders(touched.len());
    let sql = format!(
        "UPDATE {nodes} SET {trail} = ? WHERE {id1} IN ({placeholders})",
        nodes = schema::NODES,
        trail = node_col::TRAIL_UPDATE_TIME,
        id1 = node_col::ID1,
    );
    let mut params = vec![Param::I64(now)];
    params.extend(touched.iter().cloned().map(Param::Bytes));
    tx.run(&sql, &params).await?;
    Ok(touched)
}

async fn lookup_id1_and_parent(tx: &mut Tx<'_>, id: &[u8]) -> Result<Option<(Vec<u8>, Option<Vec<u8>>)>> {
    let sql = format!(
        "SELECT {id1} AS id1, {parent_id} AS parent_id FROM {nodes} WHERE {idcol} = ? LIMIT 1",
        id1 = node_col::ID1,
        parent_id = node_col::PARENT_ID,
        nodes = schema::NODES,
        idcol = node_col::ID,
    );
    let row = tx.get(&sql, &[Param::Bytes(id.to_vec())]).await?;
    use sqlx::Row;
    match row {
        Some(r) => {
            let id1: Vec<u8> = r.try_get("id1").map_err(|e| CoreError::Other(e.into()))?;
            let parent_id: Option<Vec<u8>> = r.try_get("parent_id").map_err(|e| CoreError::Other(e.into()))?;
            Ok(Some((id1, parent_id)))
        }
        None => Ok(None),
    }
}
