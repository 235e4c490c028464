//! The permission pipeline (spec §4.4): `filterRestrictiveMode`,
//! `filterLicensedNodes`, `filterPrivateNodes`, `embedNodes`. Runs after
//! `matchFirst` and before `matchSecond`, at level ≥ 1 and only when
//! `reverse_mode == Off`.

use std::collections::{HashMap, HashSet};

use graphkeep_core::error::CoreError;
use graphkeep_core::ids::{Hash, Id1, PublicKey};
use graphkeep_core::node::{Node, NodeKind};

use crate::query::cache::{Cache, EntryIdx};
use crate::schema::{self, friend_certs as friend_col, licensing_hashes as lic_col, nodes as node_col};
use crate::substrate::{Param, Tx};

type Result<T> = std::result::Result<T, CoreError>;

/// Maximum distance climbed while building a license-node tree, independent
/// of any individual node's own `licenseMaxDistance`.
pub const MAX_LICENSE_DISTANCE: u32 = 20;

/// One decoded row plus the cache slot it was recorded into, threaded
/// through the whole permission pipeline.
pub struct PermRow<'a> {
    pub idx: EntryIdx,
    pub node: &'a dyn Node,
}

/// Outcome of running the pipeline over a batch of rows.
#[derive(Default)]
pub struct PermOutcome {
    /// Indexes (into the input slice) of rows that passed.
    pub passed: Vec<usize>,
    /// Indexes of rows that failed a private/licensed check but qualify for
    /// embedding instead.
    pub embed_candidates: Vec<usize>,
}

/// Step 1: restrictive-writer enforcement.
///
/// For each row whose inherited `restrictive_writer_nodes` is non-empty,
/// every inherited writer must hold at least one active
/// `restrictiveModeWriter` license over the row's owner. A
/// `restrictiveModeManager` license additionally clears the writer from
/// `restrictive_managers`, so a later end-restrictive node may drop it.
///
/// Takes `cache` by shared reference and returns the manager sets the
/// caller should write back via [`Cache::get_by_idx_mut`] once `rows`'
/// borrowed node references are no longer needed — `PermRow` borrows out
/// of the same cache, so this function cannot also hold it mutably.
pub async fn filter_restrictive_mode(
    tx: &mut Tx<'_>,
    cache: &Cache,
    rows: &[PermRow<'_>],
    now: i64,
) -> Result<(Vec<bool>, Vec<(EntryIdx, HashSet<Id1>)>)> {
    let mut keep = vec![true; rows.len()];
    let mut writes = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let entry = cache.get_by_idx(row.idx);
        if entry.restrictive_writer_nodes.is_empty() {
            continue;
        }
        let owner = entry.owner.clone();
        let writers = entry.restrictive_writer_nodes.clone();
        let mut managers = HashSet::new();
        let mut all_satisfied = true;
        for writer_id1 in &writers {
            let hashes = licensing_hashes_for_writer(writer_id1, &owner);
            let active = active_restrictive_licenses(tx, &hashes, now).await?;
            if active.is_empty() {
                all_satisfied = false;
                break;
            }
            if active.iter().any(|r| r.restrictive_manager) {
                managers.insert(writer_id1.clone());
            }
        }
        if !all_satisfied {
            keep[i] = false;
            continue;
        }
        writes.push((row.idx, managers));
    }
    Ok((keep, writes))
}

/// Placeholder hash computation bridging a writer id1 and a row's owner
/// into the licensing-hash space; a real deployment's `Node` impl computes
/// this the same way `get_licensing_hashes` does, scoped to restrictive
/// write/manager flavors.
fn licensing_hashes_for_writer(writer_id1: &Id1, owner: &PublicKey) -> Vec<Hash> {
    vec![graphkeep_core::hash::combine(&[writer_id1.as_bytes(), owner.as_bytes(), b"restrictive"])]
}

struct ActiveLicense {
    restrictive_manager: bool,
}

async fn active_restrictive_licenses(
    tx: &mut Tx<'_>,
    hashes: &[Hash],
    now: i64,
) -> Result<Vec<ActiveLicense>> {
    if hashes.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT lh.{manager} AS manager FROM {lic} lh \
         JOIN {nodes} n ON n.{id1_n} = lh.{id1_l} \
         WHERE lh.{hash} IN ({placeholders}) \
           AND (lh.{restrictive_writer} = 1 OR lh.{restrictive_manager} = 1) \
           AND (n.{expire} IS NULL OR n.{expire} > ?) AND n.{creation} <= ?",
        manager = lic_col::RESTRICTIVE_MANAGER,
        lic = schema::LICENSING_HASHES,
        nodes = schema::NODES,
        id1_n = node_col::ID1,
        id1_l = lic_col::ID1,
        hash = lic_col::HASH,
        restrictive_writer = lic_col::RESTRICTIVE_WRITER,
        restrictive_manager = lic_col::RESTRICTIVE_MANAGER,
        expire = node_col::EXPIRE_TIME,
        creation = node_col::CREATION_TIME,
        placeholders = crate::substrate::placeholders(hashes.len()),
    );
    let mut params: Vec<Param> = hashes.iter().map(|h| Param::Bytes(h.as_bytes().to_vec())).collect();
    params.push(Param::I64(now));
    params.push(Param::I64(now));
    let rows = tx.all(&sql, &params).await?;
    use sqlx::Row;
    rows.iter()
        .map(|r| {
            r.try_get::<i64, _>("manager")
                .map(|m| ActiveLicense { restrictive_manager: m != 0 })
                .map_err(|e| CoreError::Other(e.into()))
        })
        .collect()
}

/// One step of a row's ascending license-node tree (§4.4 step 2).
struct LicenseTreeEntry {
    id: Vec<u8>,
    distance: u32,
    path_hash: Hash,
}

/// Walks `cache`'s parent chain from `(start_id, start_id1)`, collecting
/// one tree step per ancestor up to `max_distance`. `id` is the ancestor's
/// full id, used as the `parentId` argument to `get_licensing_hashes` so
/// each step's candidate hashes are scoped to that specific parent.
fn build_license_tree(cache: &Cache, start_id: &[u8], start_id1: &Id1, max_distance: u32) -> Vec<LicenseTreeEntry> {
    let mut out = Vec::new();
    let mut cursor_id = start_id.to_vec();
    let mut cursor_id1 = start_id1.clone();
    let mut prev_hash: Option<Hash> = None;
    for distance in 1..=max_distance {
        let Some(entry) = cache.get(&cursor_id, &cursor_id1) else { break };
        if entry.is_leaf {
            break;
        }
        let Some(parent_id) = entry.parent_id.clone() else { break };
        let path_hash = graphkeep_core::hash::parent_path_hash(cursor_id1.as_bytes(), prev_hash.as_ref());
        out.push(LicenseTreeEntry { id: parent_id.clone(), distance, path_hash: path_hash.clone() });
        prev_hash = Some(path_hash);
        cursor_id = parent_id;
        let Some(next_id1) = cache.single_variant(&cursor_id) else { break };
        cursor_id1 = next_id1;
    }
    out
}

/// Step 2: licensed-node filtering. Builds each row's license tree, batch
/// queries active licenses for the collected hashes, and accepts rows with
/// a matching read (non-restrictive) license at a qualifying distance.
pub async fn filter_licensed_nodes(
    tx: &mut Tx<'_>,
    cache: &Cache,
    rows: &[PermRow<'_>],
    owner_pk: &PublicKey,
    target_pk: &PublicKey,
    now: i64,
) -> Result<Vec<bool>> {
    let mut keep = vec![false; rows.len()];
    // hash bytes -> list of (row index, distance, path hash) candidates it
    // could satisfy, since the same hash may arise at different distances
    // for different rows.
    let mut candidates: HashMap<Vec<u8>, Vec<(usize, u32, Hash)>> = HashMap::new();

    for (i, row) in rows.iter().enumerate() {
        if !row.node.is_licensed() {
            continue;
        }
        let max_distance = row.node.get_license_max_distance().min(MAX_LICENSE_DISTANCE);
        let tree = build_license_tree(cache, &row.node.id(), row.node.id1(), max_distance);
        for step in &tree {
            for hash in row.node.get_licensing_hashes(owner_pk, target_pk, Some(&step.id)) {
                candidates
                    .entry(hash.as_bytes().to_vec())
                    .or_default()
                    .push((i, step.distance, step.path_hash.clone()));
            }
        }
    }

    if candidates.is_empty() {
        for (i, row) in rows.iter().enumerate() {
            keep[i] = !row.node.is_licensed();
        }
        return Ok(keep);
    }

    let hash_keys: HashSet<Vec<u8>> = candidates.keys().cloned().collect();
    let active = active_licenses_for_hashes(tx, &hash_keys, now).await?;

    for (hash, licenses) in &active {
        let Some(rowcands) = candidates.get(hash) else { continue };
        for (row_idx, distance, path_hash) in rowcands {
            let row = &rows[*row_idx];
            let min_distance = row.node.get_license_min_distance();
            let disallow_retro = row.node.disallow_retro_licensing();
            let ok = licenses.iter().any(|lic| {
                *distance >= min_distance
                    && !lic.restrictive_writer
                    && !lic.restrictive_manager
                    && (!disallow_retro || lic.license_creation_time <= row.node.creation_time())
                    && lic.parent_path_hash.as_ref().is_none_or(|want| want == path_hash)
            });
            if ok {
                keep[*row_idx] = true;
            }
        }
    }
    for (i, row) in rows.iter().enumerate() {
        if !row.node.is_licensed() {
            keep[i] = true;
        }
    }
    Ok(keep)
}

pub(crate) struct ActiveLicenseRecord {
    pub(crate) license_creation_time: i64,
    pub(crate) restrictive_writer: bool,
    pub(crate) restrictive_manager: bool,
    pub(crate) parent_path_hash: Option<Hash>,
}

pub(crate) async fn active_licenses_for_hashes(
    tx: &mut Tx<'_>,
    hashes: &HashSet<Vec<u8>>,
    now: i64,
) -> Result<HashMap<Vec<u8>, Vec<ActiveLicenseRecord>>> {
    let hash_list: Vec<&Vec<u8>> = hashes.iter().collect();
    let sql = format!(
        "SELECT lh.{hash} AS hash, n.{creation} AS creation, \
                lh.{restrictive_writer} AS rw, lh.{restrictive_manager} AS rm, \
                lh.{path_hash} AS path_hash \
         FROM {lic} lh JOIN {nodes} n ON n.{id1_n} = lh.{id1_l} \
         WHERE lh.{hash} IN ({placeholders}) \
           AND (n.{expire} IS NULL OR n.{expire} > ?) AND n.{creation} <= ?",
        hash = lic_col::HASH,
        creation = node_col::CREATION_TIME,
        restrictive_writer = lic_col::RESTRICTIVE_WRITER,
        restrictive_manager = lic_col::RESTRICTIVE_MANAGER,
        path_hash = lic_col::PARENT_PATH_HASH,
        lic = schema::LICENSING_HASHES,
        nodes = schema::NODES,
        id1_n = node_col::ID1,
        id1_l = lic_col::ID1,
        expire = node_col::EXPIRE_TIME,
        placeholders = crate::substrate::placeholders(hash_list.len()),
    );
    let mut params: Vec<Param> = hash_list.iter().map(|h| Param::Bytes((*h).clone())).collect();
    params.push(Param::I64(now));
    params.push(Param::I64(now));
    let sql_rows = tx.all(&sql, &params).await?;
    use sqlx::Row;
    let mut out: HashMap<Vec<u8>, Vec<ActiveLicenseRecord>> = HashMap::new();
    for r in &sql_rows {
        let hash: Vec<u8> = r.try_get("hash").map_err(|e| CoreError::Other(e.into()))?;
        let creation: i64 = r.try_get("creation").map_err(|e| CoreError::Other(e.into()))?;
        let rw: i64 = r.try_get("rw").map_err(|e| CoreError::Other(e.into()))?;
        let rm: i64 = r.try_get("rm").map_err(|e| CoreError::Other(e.into()))?;
        let path_hash: Option<Vec<u8>> = r.try_get("path_hash").map_err(|e| CoreError::Other(e.into()))?;
        out.entry(hash.clone()).or_default().push(ActiveLicenseRecord {
            license_creation_time: creation,
            restrictive_writer: rw != 0,
            restrictive_manager: rm != 0,
            parent_path_hash: path_hash.map(Hash),
        });
    }
    Ok(out)
}

/// Step 3: non-licensed rows. Public or admitting private-send pass;
/// rights-by-association recurses on the referenced node (via `ref_lookup`);
/// otherwise, eligible rows become embed candidates instead of failing
/// outright.
pub fn filter_private_nodes(
    rows: &[PermRow<'_>],
    source_pk: &PublicKey,
    target_pk: &PublicKey,
    allow_rights_by_association: bool,
    mut ref_lookup: impl FnMut(&[u8]) -> Option<bool>,
) -> PermOutcome {
    let mut outcome = PermOutcome::default();
    for (i, row) in rows.iter().enumerate() {
        let node = row.node;
        if node.is_licensed() {
            continue;
        }
        if node.is_public() || node.admits_private_send(source_pk, target_pk) {
            outcome.passed.push(i);
            continue;
        }
        if allow_rights_by_association && node.has_rights_by_association() {
            if let Some(ref_id) = node.ref_id() {
                if ref_lookup(ref_id).unwrap_or(false) {
                    outcome.passed.push(i);
                    continue;
                }
            }
        }
        let embeddable = matches!(
            node.kind(),
            NodeKind::DataWithSpecialContent | NodeKind::CarrierWithFriendCert
        ) && node.is_unique()
            && node.can_send_embedded();
        if embeddable {
            outcome.embed_candidates.push(i);
        }
    }
    outcome
}

/// Step 4: produces sendable embedded copies for rows that failed private
/// visibility but are embed-eligible. Friend-level license carriers bridge
/// two complementary friend certs before validating; anything whose unique
/// hash already exists in storage is dropped.
pub async fn embed_nodes(
    tx: &mut Tx<'_>,
    candidates: Vec<&dyn Node>,
    target_pk: &PublicKey,
    now: i64,
) -> Result<Vec<Box<dyn Node>>> {
    let mut out = Vec::new();
    for node in candidates {
        let mut proposal = match node.embed(target_pk) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if node.get_friend_level().is_some() {
            if let (Some(cert_a), Some(cert_b)) = complementary_friend_certs(tx, node).await? {
                proposal.set_friend_a_cert_object(cert_a);
                proposal.set_friend_b_cert_object(cert_b);
            }
        }
        if proposal.validate(now).is_err() {
            continue;
        }
        if let Some(unique_hash) = proposal.hash_unique() {
            if unique_hash_exists(tx, &unique_hash).await? {
                continue;
            }
        }
        out.push(proposal);
    }
    Ok(out)
}

/// Finds the two complementary friend certs that bridge a friend-level
/// license: `node`'s own embedded cert (issued to it by `node.owner()`'s
/// counterpart), and the matching cert that counterpart embedded in turn —
/// issued by `node.owner()` under the same `constraints`, recorded in
/// `friend_certs` when that other carrier was stored. A minimal,
/// single-carrier node with no match in storage has nothing to bridge.
async fn complementary_friend_certs(
    tx: &mut Tx<'_>,
    node: &dyn Node,
) -> Result<(Option<graphkeep_core::node::FriendCert>, Option<graphkeep_core::node::FriendCert>)> {
    let Some(issuer) = node.get_issuer_public_key().cloned() else { return Ok((None, None)) };
    let Some(constraints) = node.get_constraints().map(<[u8]>::to_vec) else { return Ok((None, None)) };

    let cert_a = graphkeep_core::node::FriendCert {
        issuer,
        constraints: constraints.clone(),
        image: node.image().to_vec(),
        target_max_expire_time: node.get_target_max_expire_time(),
    };

    let Some((counter_issuer, counter_image)) = other_half_of_bridge(tx, &constraints, node.owner()).await? else {
        return Ok((Some(cert_a), None));
    };
    let cert_b = graphkeep_core::node::FriendCert {
        issuer: counter_issuer,
        constraints,
        image: counter_image,
        target_max_expire_time: None,
    };
    Ok((Some(cert_a), Some(cert_b)))
}

/// Looks up a `friend_certs` row issued by `owner` under `constraints` — the
/// other carrier's half of the bridge, stored when that carrier embedded its
/// own cert.
async fn other_half_of_bridge(tx: &mut Tx<'_>, constraints: &[u8], owner: &PublicKey) -> Result<Option<(PublicKey, Vec<u8>)>> {
    let sql = format!(
        "SELECT {issuer}, {image} FROM {table} WHERE {constraints_col} = ? AND {issuer} = ? LIMIT 1",
        issuer = friend_col::ISSUER,
        image = friend_col::IMAGE,
        table = schema::FRIEND_CERTS,
        constraints_col = friend_col::CONSTRAINTS,
    );
    let params = vec![Param::Bytes(constraints.to_vec()), Param::Bytes(owner.as_bytes().to_vec())];
    let row = tx.get(&sql, &params).await?;
    use sqlx::Row;
    match row {
        Some(r) => {
            let issuer: Vec<u8> = r.try_get(friend_col::ISSUER).map_err(|e| CoreError::Other(e.into()))?;
            let image: Vec<u8> = r.try_get(friend_col::IMAGE).map_err(|e| CoreError::Other(e.into()))?;
            Ok(Some((PublicKey(issuer), image)))
        }
        None => Ok(None),
    }
}

async fn unique_hash_exists(tx: &mut Tx<'_>, hash: &Hash) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {nodes} WHERE {col} = ? LIMIT 1",
        nodes = schema::NODES,
        col = node_col::UNIQUE_HASH,
    );
    let row = tx.get(&sql, &[Param::Bytes(hash.as_bytes().to_vec())]).await?;
    Ok(row.is_some())
}
