//! `NodeDriver` — the write path and single-node lookup surface (spec §4.1
//! - §4.3): `store`, `fetch`, `fetchSingleNode`, `getNodeById1`,
//! `getNodesById1`, `deleteNodes`, `bumpBlobNode`, and root-node resolution.

mod bump;
mod delete;
mod filters;
mod lookup;
mod store;

use std::ops::ControlFlow;
use std::sync::Arc;

use graphkeep_core::error::CoreError;
use graphkeep_core::ids::PublicKey;
use graphkeep_core::node::Node;
use graphkeep_core::NodeCodec;

use crate::query::{FetchQuery, FetchReply, QueryEvent, QueryProcessor, ReverseMode};
use crate::substrate::Substrate;

type Result<T> = std::result::Result<T, CoreError>;

/// Deployment-overridable tunables for one `NodeDriver` (spec §6
/// "Constants", with per-instance overrides rather than global statics —
/// a deployment wires these from whatever config layer it has; the core
/// itself parses no CLI flags and reads no environment).
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub max_batch_size: usize,
    pub max_freshen_depth: u32,
    pub max_query_level_limit: u64,
    pub max_query_rows_limit: u64,
    pub min_difficulty_total_destruction: u32,
    pub now_tolerance_millis: i64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_batch_size: graphkeep_core::constants::MAX_BATCH_SIZE,
            max_freshen_depth: graphkeep_core::constants::MAX_FRESHEN_DEPTH,
            max_query_level_limit: graphkeep_core::constants::MAX_QUERY_LEVEL_LIMIT,
            max_query_rows_limit: graphkeep_core::constants::MAX_QUERY_ROWS_LIMIT,
            min_difficulty_total_destruction: graphkeep_core::constants::MIN_DIFFICULTY_TOTAL_DESTRUCTION,
            now_tolerance_millis: graphkeep_core::constants::NOW_TOLERANCE_MILLIS,
        }
    }
}

/// Outcome of a `store` call: the id1s actually inserted/upserted, the
/// parent ids freshened, and the id1s of nodes that may now accept blob
/// writes (candidates a caller should bind blobs to after `store`
/// returns).
#[derive(Debug, Default)]
pub struct StoreOutcome {
    pub inserted_id1s: Vec<Vec<u8>>,
    pub freshened_parent_ids: Vec<Vec<u8>>,
    pub blob_candidate_id1s: Vec<Vec<u8>>,
}

/// The write-path and single-lookup driver. Holds the substrate pool and
/// the node codec needed to turn stored `image` bytes back into `Node`
/// objects; opens one transaction per call.
pub struct NodeDriver {
    substrate: Arc<Substrate>,
    codec: Arc<dyn NodeCodec>,
    config: DriverConfig,
}

impl NodeDriver {
    #[must_use]
    pub fn new(substrate: Arc<Substrate>, codec: Arc<dyn NodeCodec>, config: DriverConfig) -> Self {
        Self { substrate, codec, config }
    }

    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// `store(nodes, now, preserveTransient)` (spec §4.1). Validates `now`
    /// and batch size before opening a transaction — a fail-fast class that
    /// never touches the substrate.
    pub async fn store(&self, nodes: Vec<Box<dyn Node>>, now: i64, preserve_transient: bool) -> Result<StoreOutcome> {
        if now < 0 {
            return Err(CoreError::Malformed("now must be non-negative".into()));
        }
        if nodes.len() > self.config.max_batch_size {
            return Err(CoreError::Malformed(format!(
                "batch of {} exceeds max_batch_size {}",
                nodes.len(),
                self.config.max_batch_size
            )));
        }
        tracing::debug!(count = nodes.len(), now, preserve_transient, "store: starting");
        let mut tx = self.substrate.begin().await?;
        let outcome = store::run(&mut tx, &self.config, nodes, now, preserve_transient).await;
        match outcome {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, "store: rolling back");
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// `deleteNodes(id1s)` (spec §4.1): batched DELETEs on the node row and
    /// each side-index in lockstep.
    pub async fn delete_nodes(&self, id1s: &[Vec<u8>]) -> Result<u64> {
        tracing::debug!(count = id1s.len(), "delete_nodes: starting");
        let mut tx = self.substrate.begin().await?;
        match delete::run(&mut tx, self.config.max_batch_size, id1s).await {
            Ok(n) => {
                tx.commit().await?;
                Ok(n)
            }
            Err(e) => {
                tracing::warn!(error = %e, "delete_nodes: rolling back");
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// `bumpBlobNode(node, now)` (spec §4.1): stamp `updateTime`/
    /// `trailUpdateTime` on `node_id1` and freshen upward. Called when a
    /// blob has just finalized, so the node becomes ready to propagate.
    pub async fn bump_blob_node(&self, node_id1: &graphkeep_core::ids::Id1, now: i64) -> Result<()> {
        tracing::debug!(now, "bump_blob_node: starting");
        let mut tx = self.substrate.begin().await?;
        match bump::run(&mut tx, &self.config, node_id1, now).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "bump_blob_node: rolling back");
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// `getNodeById1(id1, now)` (spec §4.2).
    pub async fn get_node_by_id1(&self, id1: &graphkeep_core::ids::Id1, now: i64) -> Result<Option<Box<dyn Node>>> {
        let mut tx = self.substrate.begin().await?;
        let result = lookup::get_node_by_id1(&mut tx, self.codec.as_ref(), id1, now, self.config.now_tolerance_millis).await;
        tx.commit().await?;
        result
    }

    /// `getNodesById1(ids, now)` (spec §4.2): batched lookup, preserves the
    /// caller's order in the result (`None` where a row is missing or not
    /// currently visible).
    pub async fn get_nodes_by_id1(&self, id1s: &[graphkeep_core::ids::Id1], now: i64) -> Result<Vec<Option<Box<dyn Node>>>> {
        let mut tx = self.substrate.begin().await?;
        let result = lookup::get_nodes_by_id1(&mut tx, self.codec.as_ref(), id1s, now, self.config.now_tolerance_millis).await;
        tx.commit().await?;
        result
    }

    /// `fetchSingleNode(id1, now, sourcePK, targetPK)` (spec §4.2).
    pub async fn fetch_single_node(
        &self,
        id1: &graphkeep_core::ids::Id1,
        now: i64,
        source_pk: &PublicKey,
        target_pk: &PublicKey,
    ) -> Result<Option<Box<dyn Node>>> {
        let mut tx = self.substrate.begin().await?;
        let result = lookup::fetch_single_node(&mut tx, Arc::clone(&self.codec), &self.config, id1, now, source_pk, target_pk).await;
        tx.commit().await?;
        result
    }

    /// `getRootNode` (spec §4.3): rejects missing, licensed, rights-by-
    /// association, or begin-restrictive-writer roots with distinct typed
    /// errors; a root node never pays the full permission pipeline, only
    /// this pre-check.
    pub async fn get_root_node(&self, root_id1: &graphkeep_core::ids::Id1, now: i64, source_pk: &PublicKey, target_pk: &PublicKey) -> Result<Box<dyn Node>> {
        let mut tx = self.substrate.begin().await?;
        let result = lookup::get_root_node(&mut tx, self.codec.as_ref(), &self.config, root_id1, now, source_pk, target_pk).await;
        tx.commit().await?;
        result
    }

    /// `fetch` (spec §2, §4.4): resolves an optional root, opens a read
    /// transaction, constructs a [`QueryProcessor`], and runs it to
    /// completion, invoking `reply` once per flush batch.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch<F>(
        &self,
        query: FetchQuery,
        now: i64,
        source_pk: PublicKey,
        target_pk: PublicKey,
        allow_licensed: bool,
        reply: F,
    ) -> Result<()>
    where
        F: FnMut(FetchReply) -> ControlFlow<()>,
    {
        tracing::debug!(now, "fetch: starting");
        let mut tx = self.substrate.begin().await?;
        let processor = QueryProcessor::new(&mut tx, Arc::clone(&self.codec), query, now, source_pk, target_pk, ReverseMode::Off, allow_licensed);
        let result = processor.run(reply).await;
        tx.commit().await?;
        result
    }
}

/// Runs a one-shot `reverseMode=ALL_PARENTS` or `ONLY_LICENSED` query over
/// `tx` and collects the emitted node ids, without a caller-visible reply
/// callback. Used by `freshenParentTrail`, `fetchSingleNode`, and
/// `getRootNode`'s permission chase (spec §4.1, §4.2).
pub(crate) async fn collect_reverse_chase(
    tx: &mut crate::substrate::Tx<'_>,
    codec: Arc<dyn NodeCodec>,
    query: FetchQuery,
    now: i64,
    source_pk: PublicKey,
    target_pk: PublicKey,
    reverse_mode: ReverseMode,
) -> Result<Vec<QueryEvent>> {
    let processor = QueryProcessor::new(tx, codec, query, now, source_pk, target_pk, reverse_mode, true);
    let mut events = Vec::new();
    let mut first_error = None;
    processor
        .run(|batch| {
            if let Some(e) = batch.error {
                first_error = Some(e);
            }
            events.extend(batch.events);
            ControlFlow::Continue(())
        })
        .await?;
    if let Some(e) = first_error {
        return Err(CoreError::FetchFailed(e));
    }
    Ok(events)
}
