//! Maps between `nodes` table rows and [`NodeRow`], the column-level view
//! both the driver and the query processor operate on without having to
//! decode the full `image` through a [`NodeCodec`] on every hot path.

use graphkeep_core::error::CoreError;
use graphkeep_core::ids::{Hash, Id1, Id2, PublicKey};
use graphkeep_core::node::Node;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::schema::nodes as col;
use crate::substrate::Param;

type Result<T> = std::result::Result<T, CoreError>;

/// Column-level projection of one `nodes` row.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id1: Id1,
    pub id2: Option<Id2>,
    pub id: Vec<u8>,
    pub parent_id: Option<Vec<u8>>,
    pub creation_time: i64,
    pub expire_time: Option<i64>,
    pub owner: PublicKey,
    pub is_public: bool,
    pub is_licensed: bool,
    pub disallow_parent_licensing: bool,
    pub is_leaf: bool,
    pub is_inactive: bool,
    pub difficulty: u32,
    pub unique_hash: Option<Hash>,
    pub transient_hash: Hash,
    pub storage_time: i64,
    pub update_time: i64,
    pub trail_update_time: i64,
    pub bump_hash: Option<Hash>,
    pub image: Vec<u8>,
}

fn get_bool(row: &AnyRow, name: &str) -> std::result::Result<bool, sqlx::Error> {
    Ok(row.try_get::<i64, _>(name)? != 0)
}

impl NodeRow {
    /// Reads one row of the `nodes` table. Expects all columns in
    /// `schema::nodes` to be present in the query's projection.
    pub fn from_row(row: &AnyRow) -> Result<Self> {
        (|| -> std::result::Result<Self, sqlx::Error> {
            Ok(Self {
                id1: Id1(row.try_get::<Vec<u8>, _>(col::ID1)?),
                id2: row.try_get::<Option<Vec<u8>>, _>(col::ID2)?.map(Id2),
                id: row.try_get::<Vec<u8>, _>(col::ID)?,
                parent_id: row.try_get::<Option<Vec<u8>>, _>(col::PARENT_ID)?,
                creation_time: row.try_get::<i64, _>(col::CREATION_TIME)?,
                expire_time: row.try_get::<Option<i64>, _>(col::EXPIRE_TIME)?,
                owner: PublicKey(row.try_get::<Vec<u8>, _>(col::OWNER)?),
                is_public: get_bool(row, col::IS_PUBLIC)?,
                is_licensed: get_bool(row, col::IS_LICENSED)?,
                disallow_parent_licensing: get_bool(row, col::DISALLOW_PARENT_LICENSING)?,
                is_leaf: get_bool(row, col::IS_LEAF)?,
                is_inactive: get_bool(row, col::IS_INACTIVE)?,
                difficulty: u32::try_from(row.try_get::<i64, _>(col::DIFFICULTY)?).unwrap_or(0),
                unique_hash: row.try_get::<Option<Vec<u8>>, _>(col::UNIQUE_HASH)?.map(Hash),
                transient_hash: Hash(row.try_get::<Vec<u8>, _>(col::TRANSIENT_HASH)?),
                storage_time: row.try_get::<i64, _>(col::STORAGE_TIME)?,
                update_time: row.try_get::<i64, _>(col::UPDATE_TIME)?,
                trail_update_time: row.try_get::<i64, _>(col::TRAIL_UPDATE_TIME)?,
                bump_hash: row.try_get::<Option<Vec<u8>>, _>(col::BUMP_HASH)?.map(Hash),
                image: row.try_get::<Vec<u8>, _>(col::IMAGE)?,
            })
        })()
        .map_err(|e| CoreError::Other(e.into()))
    }

    /// Builds the column list and bound parameters for inserting `node` at
    /// `now`. Shared by `storeNodes`'s fresh-insert and upsert paths.
    pub fn insert_params(node: &dyn Node, now: i64) -> Vec<Param> {
        let id1 = node.id1().as_bytes().to_vec();
        let id2 = node.id2().map(|v| v.as_bytes().to_vec());
        let id = node.id();
        let parent_id = node.parent_id().map(<[u8]>::to_vec);
        let unique_hash = node.hash_unique().map(|h| h.into_bytes());
        // A node that borrows its rights from `refId` precomputes the hash a
        // future covering license's own bump detection will look for, so a
        // license stored later re-surfaces this row without re-touching it.
        let bump_hash = node
            .ref_id()
            .map(|ref_id| graphkeep_core::hash::bump_hash(ref_id, node.parent_id().unwrap_or(&[])).into_bytes());
        vec![
            Param::Bytes(id1),
            id2.into(),
            Param::Bytes(id),
            parent_id.into(),
            Param::I64(node.creation_time()),
            node.expire_time().into(),
            node.region().map(str::to_string).into(),
            node.jurisdiction().map(str::to_string).into(),
            Param::Bytes(node.owner().as_bytes().to_vec()),
            Param::Bool(node.is_public()),
            Param::Bool(node.is_licensed()),
            Param::Bool(node.disallow_parent_licensing()),
            Param::Bool(node.is_leaf()),
            Param::Bool(false), // is_inactive
            Param::I64(i64::from(node.difficulty())),
            unique_hash.into(),
            Param::Bytes(node.hash_transient().into_bytes()),
            Param::I64(now), // storage_time
            Param::I64(now), // update_time
            Param::I64(now), // trail_update_time
            bump_hash.into(),
            Param::Bytes(node.image().to_vec()),
        ]
    }
}

/// Columns selected by every `SELECT … FROM nodes` in this crate, in the
/// order [`NodeRow::from_row`] expects.
pub const SELECT_COLUMNS: &str = "id1, id2, id, parent_id, creation_time, expire_time, owner, \
    is_public, is_licensed, disallow_parent_licensing, is_leaf, is_inactive, difficulty, \
    unique_hash, transient_hash, storage_time, update_time, trail_update_time, bump_hash, image";

/// Column list for the `nodes` table `INSERT`, in [`NodeRow::insert_params`] order.
pub const INSERT_COLUMNS: &str = "id1, id2, id, parent_id, creation_time, expire_time, region, \
    jurisdiction, owner, is_public, is_licensed, disallow_parent_licensing, is_leaf, is_inactive, \
    difficulty, unique_hash, transient_hash, storage_time, update_time, trail_update_time, \
    bump_hash, image";
