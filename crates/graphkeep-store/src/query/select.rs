//! Builds the per-level `SELECT` the level loop pages through (spec §4.4
//! "Ordering and pagination"). Order is stable by `(creationTime |
//! storageTime, id1)` ascending or descending; pages are synthesized via
//! `LIMIT`/`OFFSET` through [`crate::substrate::Tx::each_paged`].

use crate::rows::SELECT_COLUMNS;
use crate::schema::{self, nodes as col};
use crate::substrate::Param;

/// Which timestamp column orders a level's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    CreationTime,
    StorageTime,
}

impl OrderField {
    fn column(self) -> &'static str {
        match self {
            Self::CreationTime => col::CREATION_TIME,
            Self::StorageTime => col::STORAGE_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Parameters for one level's batch of `parentId` lookups.
pub struct LevelQuery<'a> {
    pub parent_ids: &'a [Vec<u8>],
    pub order_field: OrderField,
    pub order_direction: OrderDirection,
    pub now: i64,
}

/// Builds `SELECT ... WHERE parent_id IN (...) AND <visibility> ORDER BY ...`
/// and its bound parameters. Visibility excludes expired and not-yet-visible
/// rows per the data-model invariants (§3): `expireTime IS NULL OR
/// expireTime > now` and `creationTime <= now + epsilon`.
#[must_use]
pub fn build_level_sql(q: &LevelQuery<'_>, now_tolerance_millis: i64) -> (String, Vec<Param>) {
    let placeholders = crate::substrate::placeholders(q.parent_ids.len());
    let sql = format!(
        "SELECT {select} FROM {nodes} \
         WHERE {parent_id} IN ({placeholders}) \
           AND ({expire} IS NULL OR {expire} > ?) \
           AND {creation} <= ? \
           AND {inactive} = 0 \
         ORDER BY {order_col} {dir}, {id1} {dir}",
        select = SELECT_COLUMNS,
        nodes = schema::NODES,
        parent_id = col::PARENT_ID,
        expire = col::EXPIRE_TIME,
        creation = col::CREATION_TIME,
        inactive = col::IS_INACTIVE,
        order_col = q.order_field.column(),
        dir = q.order_direction.sql(),
        id1 = col::ID1,
    );
    let mut params: Vec<Param> = q.parent_ids.iter().map(|id| Param::Bytes(id.clone())).collect();
    params.push(Param::I64(now));
    params.push(Param::I64(now + now_tolerance_millis));
    (sql, params)
}
