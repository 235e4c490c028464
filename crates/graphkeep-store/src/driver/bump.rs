//! `bumpBlobNode` (spec §4.1): stamps `updateTime`/`trailUpdateTime` on a
//! node whose blob has just finalized, then freshens its ancestor trail.

use std::collections::HashSet;

use graphkeep_core::error::CoreError;
use graphkeep_core::ids::Id1;

use crate::schema::{self, nodes as node_col};
use crate::substrate::{Param, Tx};

use super::{store, DriverConfig};

type Result<T> = std::result::Result<T, CoreError>;

pub async fn run(tx: &mut Tx<'_>, config: &DriverConfig, node_id1: &Id1, now: i64) -> Result<()> {
    let sql = format!(
        "UPDATE {nodes} SET {update}=?, {trail}=? WHERE {id1}=?",
        nodes = schema::NODES,
        update = node_col::UPDATE_TIME,
        trail = node_col::TRAIL_UPDATE_TIME,
        id1 = node_col::ID1,
    );
    let affected = tx
        .run(&sql, &[Param::I64(now), Param::I64(now), Param::Bytes(node_id1.as_bytes().to_vec())])
        .await?;
    if affected == 0 {
        tracing::warn!("bump_blob_node: node_id1 not found");
        return Ok(());
    }

    let Some(parent_id) = parent_id_of(tx, node_id1).await? else {
        return Ok(());
    };
    let mut freshen = HashSet::new();
    freshen.insert(parent_id);
    store::freshen_parent_trail(tx, config.max_freshen_depth, &freshen, now).await?;
    Ok(())
}

async fn parent_id_of(tx: &mut Tx<'_>, node_id1: &Id1) -> Result<Option<Vec<u8>>> {
    let sql = format!(
        "SELECT {parent_id} AS parent_id FROM {nodes} WHERE {id1} = ? LIMIT 1",
        parent_id = node_col::PARENT_ID,
        nodes = schema::NODES,
        id1 = node_col::ID1,
    );
    let row = tx.get(&sql, &[Param::Bytes(node_id1.as_bytes().to_vec())]).await?;
    use sqlx::Row;
    match row {
        Some(r) => r.try_get::<Option<Vec<u8>>, _>("parent_id").map_err(|e| CoreError::Other(e.into())),
        None => Ok(None),
    }
}
