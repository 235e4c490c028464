//! `deleteNodes` (spec §4.1): batched DELETEs on the node row and every
//! side-index table in lockstep.

use graphkeep_core::error::CoreError;

use crate::schema::{
    self, achilles_hashes as achilles_col, blob_bindings as binding_col, destroy_hashes as destroy_col,
    friend_certs as friend_col, licensing_hashes as lic_col, nodes as node_col,
};
use crate::substrate::{Param, Tx};

type Result<T> = std::result::Result<T, CoreError>;

/// Deletes `id1s` from `nodes` and every side-index table, chunked at
/// `max_batch_size` rows per round trip. Returns the total number of
/// `nodes` rows removed.
pub async fn run(tx: &mut Tx<'_>, max_batch_size: usize, id1s: &[Vec<u8>]) -> Result<u64> {
    let mut total = 0;
    for chunk in id1s.chunks(max_batch_size.max(1)) {
        total += delete_chunk(tx, chunk).await?;
    }
    Ok(total)
}

async fn delete_chunk(tx: &mut Tx<'_>, id1s: &[Vec<u8>]) -> Result<u64> {
    if id1s.is_empty() {
        return Ok(0);
    }
    let placeholders = crate::substrate::placeholders(id1s.len());
    let params: Vec<Param> = id1s.iter().map(|i| Param::Bytes(i.clone())).collect();

    delete_side_table(tx, schema::ACHILLES_HASHES, achilles_col::ID1, &placeholders, &params).await?;
    delete_side_table(tx, schema::LICENSING_HASHES, lic_col::ID1, &placeholders, &params).await?;
    delete_side_table(tx, schema::DESTROY_HASHES, destroy_col::ID1, &placeholders, &params).await?;
    delete_side_table(tx, schema::FRIEND_CERTS, friend_col::ID1, &placeholders, &params).await?;
    delete_side_table(tx, schema::BLOB_BINDINGS, binding_col::NODE_ID1, &placeholders, &params).await?;

    let sql = format!(
        "DELETE FROM {nodes} WHERE {id1} IN ({placeholders})",
        nodes = schema::NODES,
        id1 = node_col::ID1,
    );
    tx.run(&sql, &params).await
}

async fn delete_side_table(tx: &mut Tx<'_>, table: &str, col: &str, placeholders: &str, params: &[Param]) -> Result<()> {
    let sql = format!("DELETE FROM {table} WHERE {col} IN ({placeholders})");
    tx.run(&sql, params).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn chunking_has_no_pure_logic_to_test_in_isolation() {
        // Real coverage lives in graphkeep-store/tests/ against a live substrate.
    }
}
