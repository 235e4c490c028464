//! The read path: a level-by-level graph traversal with batched SQL
//! streaming, loop detection, the permission pipeline, and a stateful
//! two-phase matcher (spec §4.4).

pub mod cache;
pub mod matcher;
pub mod permissions;
pub mod select;

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;

use graphkeep_core::constants::{MAX_BATCH_SIZE, MAX_QUERY_LEVEL_LIMIT, MAX_QUERY_ROWS_LIMIT, NOW_TOLERANCE_MILLIS};
use graphkeep_core::error::CoreError;
use graphkeep_core::ids::{Id1, PublicKey};
use graphkeep_core::node::Node;
use graphkeep_core::NodeCodec;

use crate::rows::NodeRow;
use crate::substrate::Tx;

use cache::{Cache, CacheEntry, EntryIdx};
use matcher::{MatchSpec, MatchState};
use permissions::PermRow;
use select::{LevelQuery, OrderDirection, OrderField};

type Result<T> = std::result::Result<T, CoreError>;

/// Which direction the level loop walks the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseMode {
    /// Downward traversal via `parentId`, full permission pipeline applied.
    Off,
    /// Upward traversal via each row's own `parentId`; used by
    /// `freshenParentTrail`. No permission pipeline.
    AllParents,
    /// Upward traversal, but only through rows that use parent licensing
    /// and carry no online id; used to chase a licensed single node.
    OnlyLicensed,
}

/// A decoded node plus the level it was emitted at.
pub struct QueryEvent {
    pub node: Box<dyn Node>,
    pub level: u32,
}

/// One reply batch. A final reply with `is_last = true` is always sent,
/// even on error (in which case `events` may be empty and `error` is set).
pub struct FetchReply {
    pub events: Vec<QueryEvent>,
    pub is_last: bool,
    pub error: Option<String>,
}

/// The query a caller wants answered.
pub struct FetchQuery {
    pub parent_id: Option<Vec<u8>>,
    pub root_node: Option<Box<dyn Node>>,
    pub depth: Option<u32>,
    pub matches: Vec<MatchSpec>,
    pub cutoff_time: i64,
    pub order_field: OrderField,
    pub order_direction: OrderDirection,
    pub include_licenses: bool,
    pub allow_rights_by_association: bool,
    pub allow_embed: bool,
}

/// One row surviving `matchFirst`, carried through cache insertion,
/// permissions, and `matchSecond`.
struct Candidate {
    entry_idx: EntryIdx,
    matched: Vec<usize>,
}

/// Gates a parent imposes on its children (§4.4 "Apply parent-imposed
/// gates"), inherited downward through [`QueryProcessor::inherit_from_parent`]
/// and enforced by [`InheritedGates::admits`] before a row ever enters the
/// cache.
#[derive(Default)]
struct InheritedGates {
    restrictive_writer_nodes: Vec<Id1>,
    child_min_difficulty: u32,
    disallow_public_children: bool,
    only_own_children: bool,
    parent_owner: Option<PublicKey>,
}

impl InheritedGates {
    /// Whether `row` may exist as a child under these gates:
    /// `disallowPublicChildren` rejects a public child, `childMinDifficulty`
    /// is a floor on `row.difficulty`, and `onlyOwnChildren` requires the
    /// same owner as the parent.
    fn admits(&self, row: &NodeRow) -> bool {
        if self.disallow_public_children && row.is_public {
            return false;
        }
        if row.difficulty < self.child_min_difficulty {
            return false;
        }
        if self.only_own_children {
            if let Some(parent_owner) = &self.parent_owner {
                if &row.owner != parent_owner {
                    return false;
                }
            }
        }
        true
    }
}

/// Constructed per query per spec §4.4's "Constructed per query with (...)"
/// preamble: substrate transaction, node codec, the query itself, and the
/// permission/traversal parameters.
pub struct QueryProcessor<'tx, 'c> {
    tx: &'tx mut Tx<'c>,
    codec: Arc<dyn NodeCodec>,
    query: FetchQuery,
    now: i64,
    source_pk: PublicKey,
    target_pk: PublicKey,
    reverse_mode: ReverseMode,
    allow_licensed: bool,
    cache: Cache,
    rows_examined: u64,
    emitted_ids: HashSet<Vec<u8>>,
}

impl<'tx, 'c> QueryProcessor<'tx, 'c> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: &'tx mut Tx<'c>,
        codec: Arc<dyn NodeCodec>,
        query: FetchQuery,
        now: i64,
        source_pk: PublicKey,
        target_pk: PublicKey,
        reverse_mode: ReverseMode,
        allow_licensed: bool,
    ) -> Self {
        Self {
            tx,
            codec,
            query,
            now,
            source_pk,
            target_pk,
            reverse_mode,
            allow_licensed,
            cache: Cache::new(),
            rows_examined: 0,
            emitted_ids: HashSet::new(),
        }
    }

    /// Runs the level loop to completion, invoking `reply` once per flush
    /// batch. `reply` returns `ControlFlow::Break(())` to cancel; the
    /// processor stops issuing further pages at the next batch boundary
    /// and still emits a final `is_last` reply.
    pub async fn run<F>(mut self, mut reply: F) -> Result<()>
    where
        F: FnMut(FetchReply) -> ControlFlow<()>,
    {
        let mut next_level_ids = self.seed_ids();
        let mut level: u32 = 0;
        let mut cancelled = false;
        let mut first_error: Option<CoreError> = None;

        'levels: while !next_level_ids.is_empty() {
            if let Some(depth) = self.query.depth {
                if level >= depth {
                    break;
                }
            }
            level += 1;
            let current_ids = std::mem::take(&mut next_level_ids);
            let mut match_states: Vec<MatchState> =
                (0..self.query.matches.len()).map(|_| MatchState::default()).collect();

            let mut level_rows_examined: u64 = 0;
            let mut flushable: Vec<EntryIdx> = Vec::new();

            for batch in current_ids.chunks(MAX_BATCH_SIZE) {
                let decoded = match self.stream_batch(batch, &mut level_rows_examined).await {
                    Ok(d) => d,
                    Err(e) => {
                        first_error = Some(e);
                        break 'levels;
                    }
                };
                if decoded.is_empty() {
                    continue;
                }

                let candidates = self.match_and_cache(decoded, level, &mut match_states);
                if candidates.is_empty() {
                    continue;
                }

                let (passed, embedded) = if self.reverse_mode == ReverseMode::Off && level >= 1 {
                    match self.run_permissions(&candidates).await {
                        Ok(r) => r,
                        Err(e) => {
                            first_error = Some(e);
                            break 'levels;
                        }
                    }
                } else {
                    (candidates, Vec::new())
                };

                for c in &passed {
                    let matched_ids_key = self.cache.get_by_idx(c.entry_idx).id.clone();
                    let row_id1 = self.cache.get_by_idx(c.entry_idx).id1.as_bytes().to_vec();
                    let (discard, bottom) = matcher::match_second(&row_id1, &c.matched, &self.query.matches, &mut match_states);
                    let parent_id = self.cache.get_by_idx(c.entry_idx).parent_id.clone();
                    if let Some(parent_id) = parent_id {
                        self.cache.record_matched_id(&parent_id, matched_ids_key);
                    }
                    let entry = self.cache.get_by_idx_mut(c.entry_idx);
                    entry.discard = discard;
                    entry.bottom = bottom;
                    entry.passed = true;
                    flushable.push(c.entry_idx);
                }
                for node in embedded {
                    let idx = self.insert_embedded(node);
                    flushable.push(idx);
                }

                if self.rows_examined >= MAX_QUERY_ROWS_LIMIT || level_rows_examined >= MAX_QUERY_LEVEL_LIMIT {
                    break;
                }
                if matcher::all_matches_done(&self.query.matches, &match_states) {
                    break;
                }
            }

            if self.flush(level, &flushable, &mut next_level_ids, &mut reply).is_break() {
                cancelled = true;
                break;
            }
            if first_error.is_some() {
                break;
            }
            if self.rows_examined >= MAX_QUERY_ROWS_LIMIT {
                break;
            }
        }

        let _ = reply(FetchReply {
            events: Vec::new(),
            is_last: true,
            error: first_error.as_ref().map(ToString::to_string),
        });
        let _ = cancelled;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn seed_ids(&self) -> Vec<Vec<u8>> {
        match self.reverse_mode {
            ReverseMode::Off => {
                if let Some(root) = &self.query.root_node {
                    vec![root.id()]
                } else if let Some(parent_id) = &self.query.parent_id {
                    vec![parent_id.clone()]
                } else {
                    Vec::new()
                }
            }
            ReverseMode::AllParents | ReverseMode::OnlyLicensed => self
                .query
                .root_node
                .as_ref()
                .and_then(|r| r.parent_id().map(<[u8]>::to_vec))
                .into_iter()
                .collect(),
        }
    }

    async fn stream_batch(
        &mut self,
        parent_ids: &[Vec<u8>],
        level_rows_examined: &mut u64,
    ) -> Result<Vec<(NodeRow, Box<dyn Node>)>> {
        let q = LevelQuery {
            parent_ids,
            order_field: self.query.order_field,
            order_direction: self.query.order_direction,
            now: self.now,
        };
        let (sql, params) = select::build_level_sql(&q, NOW_TOLERANCE_MILLIS);
        let mut out = Vec::new();
        let codec = Arc::clone(&self.codec);
        let rows_examined = &mut self.rows_examined;
        let level_examined = &mut *level_rows_examined;
        self.tx
            .each(&sql, &params, |raw| {
                *rows_examined += 1;
                *level_examined += 1;
                if let Ok(row) = NodeRow::from_row(raw) {
                    if let Ok(node) = codec.decode(&row.image) {
                        out.push((row, node));
                    }
                }
                if *rows_examined >= MAX_QUERY_ROWS_LIMIT || *level_examined >= MAX_QUERY_LEVEL_LIMIT {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await?;
        Ok(out)
    }

    /// Runs `matchFirst`, loop detection, and cache insertion with
    /// inheritance for a decoded batch, returning the rows worth carrying
    /// into the permission pipeline.
    fn match_and_cache(
        &mut self,
        decoded: Vec<(NodeRow, Box<dyn Node>)>,
        level: u32,
        match_states: &mut [MatchState],
    ) -> Vec<Candidate> {
        let level_has_matches = self.query.matches.iter().any(|m| m.level.is_none_or(|l| l == level));
        let mut out = Vec::new();
        for (row, node) in decoded {
            if self.cache.contains(&row.id, &row.id1) {
                if self.cache.is_loop(&row.id, &row.id1) {
                    continue;
                }
            }
            let parent_matches = row.parent_id.as_ref().and_then(|p| self.cache.matched_ids(p));
            let matched = matcher::match_first(&row, node.as_ref(), level, parent_matches, &self.query.matches, match_states);
            if matched.is_empty() && level_has_matches {
                continue;
            }
            let gates = self.inherit_from_parent(&row);
            if !gates.admits(&row) {
                continue;
            }
            let entry_idx = self.insert_cache_entry(row, node, matched.clone(), gates);
            out.push(Candidate { entry_idx, matched });
        }
        out
    }

    fn insert_cache_entry(&mut self, row: NodeRow, node: Box<dyn Node>, matched: Vec<usize>, gates: InheritedGates) -> EntryIdx {
        // The gates this node itself imposes on *its* children are the
        // parent-inherited floor, combined with whatever this node adds on
        // top of it — an intermediate node can tighten but never loosen.
        let child_min_difficulty = gates.child_min_difficulty.max(node.get_child_min_difficulty());
        let disallow_public_children = gates.disallow_public_children || node.disallow_public_children();
        let only_own_children = gates.only_own_children || node.only_own_children();
        self.cache.insert(CacheEntry {
            id1: row.id1,
            id: row.id,
            parent_id: row.parent_id,
            owner: row.owner,
            child_min_difficulty,
            disallow_public_children,
            only_own_children,
            restrictive_writer_nodes: gates.restrictive_writer_nodes,
            restrictive_managers: HashSet::new(),
            begin_restrictive: node.is_begin_restrictive_write_mode(),
            end_restrictive: node.is_end_restrictive_write_mode(),
            passed: false,
            flushed: false,
            discard: false,
            bottom: false,
            is_leaf: row.is_leaf,
            matched_indexes: matched,
            update_time: row.update_time,
            trail_update_time: row.trail_update_time,
            storage_time: row.storage_time,
            node: Some(node),
        })
    }

    /// A permission-pipeline `embedNodes` proposal is a freshly synthesized
    /// node with no row of its own; it gets a minimal cache entry so it can
    /// flow through flush like any other passed candidate.
    fn insert_embedded(&mut self, node: Box<dyn Node>) -> EntryIdx {
        let id = node.id();
        let id1 = node.id1().clone();
        let parent_id = node.parent_id().map(<[u8]>::to_vec);
        let owner = node.owner().clone();
        let is_leaf = node.is_leaf();
        let update_time = self.now;
        self.cache.insert(CacheEntry {
            id1,
            id,
            parent_id,
            owner,
            child_min_difficulty: 0,
            disallow_public_children: false,
            only_own_children: false,
            restrictive_writer_nodes: Vec::new(),
            restrictive_managers: HashSet::new(),
            begin_restrictive: false,
            end_restrictive: false,
            passed: true,
            flushed: false,
            discard: false,
            bottom: false,
            is_leaf,
            matched_indexes: Vec::new(),
            update_time,
            trail_update_time: update_time,
            storage_time: update_time,
            node: Some(node),
        })
    }

    /// Inheritance from parent (§4.4): take the parent's
    /// `restrictiveWriterNodes` (minus those cleared by an end-restrictive
    /// parent via `restrictiveManagers`), add the parent itself if
    /// begin-restrictive, and carry forward `childMinDifficulty` /
    /// `disallowPublicChildren` / `onlyOwnChildren` gates for
    /// [`InheritedGates::admits`] to enforce against this row.
    fn inherit_from_parent(&self, row: &NodeRow) -> InheritedGates {
        let Some(parent_id) = &row.parent_id else {
            return InheritedGates::default();
        };
        let Some(parent_id1) = self.cache.single_variant(parent_id) else {
            return InheritedGates::default();
        };
        let Some(parent) = self.cache.get(parent_id, &parent_id1) else {
            return InheritedGates::default();
        };
        let mut writers = parent.restrictive_writer_nodes.clone();
        if parent.end_restrictive {
            writers.retain(|w| !parent.restrictive_managers.contains(w));
        }
        if parent.begin_restrictive {
            writers.push(parent_id1);
        }
        InheritedGates {
            restrictive_writer_nodes: writers,
            child_min_difficulty: parent.child_min_difficulty,
            disallow_public_children: parent.disallow_public_children,
            only_own_children: parent.only_own_children,
            parent_owner: Some(parent.owner.clone()),
        }
    }

    async fn run_permissions(&mut self, candidates: &[Candidate]) -> Result<(Vec<Candidate>, Vec<Box<dyn Node>>)> {
        // `PermRow` borrows node references out of the cache; `Cache` is
        // only ever mutated here once none of those borrows are still in
        // use (enforced by the borrow checker, not by convention) —
        // `restrictive_writes` is applied once `perm_rows` is done with.
        let (restrictive_keep, restrictive_writes) = {
            let perm_rows: Vec<PermRow<'_>> = candidates
                .iter()
                .map(|c| PermRow { idx: c.entry_idx, node: self.cache.get_by_idx(c.entry_idx).node.as_deref().expect("node present until flush") })
                .collect();
            permissions::filter_restrictive_mode(self.tx, &self.cache, &perm_rows, self.now).await?
        };
        for (idx, managers) in restrictive_writes {
            self.cache.get_by_idx_mut(idx).restrictive_managers = managers;
        }
        let survivors: Vec<usize> = restrictive_keep.iter().enumerate().filter_map(|(i, k)| k.then_some(i)).collect();
        if survivors.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let survivor_rows: Vec<PermRow<'_>> = survivors
            .iter()
            .map(|&i| PermRow { idx: candidates[i].entry_idx, node: self.cache.get_by_idx(candidates[i].entry_idx).node.as_deref().expect("node present until flush") })
            .collect();

        let owner_pk = self.source_pk.clone();
        let licensed_keep = if self.allow_licensed {
            permissions::filter_licensed_nodes(self.tx, &self.cache, &survivor_rows, &owner_pk, &self.target_pk, self.now).await?
        } else {
            survivor_rows.iter().map(|r| !r.node.is_licensed()).collect()
        };

        let mut passed: Vec<Candidate> = Vec::new();
        let mut private_rows: Vec<PermRow<'_>> = Vec::new();
        let mut private_back_idx: Vec<usize> = Vec::new();
        for (i, keep) in licensed_keep.iter().enumerate() {
            if *keep {
                passed.push(Candidate { entry_idx: survivor_rows[i].idx, matched: candidates[survivors[i]].matched.clone() });
            } else {
                private_rows.push(PermRow { idx: survivor_rows[i].idx, node: survivor_rows[i].node });
                private_back_idx.push(survivors[i]);
            }
        }

        let cache = &self.cache;
        let outcome = permissions::filter_private_nodes(&private_rows, &self.source_pk, &self.target_pk, self.query.allow_rights_by_association, |ref_id| {
            let variant = cache.single_variant(ref_id)?;
            cache.get(ref_id, &variant).map(|e| e.passed)
        });

        for &i in &outcome.passed {
            let orig = private_back_idx[i];
            passed.push(Candidate { entry_idx: private_rows[i].idx, matched: candidates[orig].matched.clone() });
        }

        let embedded = if self.query.allow_embed && !outcome.embed_candidates.is_empty() {
            let candidate_nodes: Vec<&dyn Node> = outcome.embed_candidates.iter().map(|&i| private_rows[i].node).collect();
            permissions::embed_nodes(self.tx, candidate_nodes, &self.target_pk, self.now).await?
        } else {
            Vec::new()
        };

        Ok((passed, embedded))
    }

    /// Flush (§4.4): chunk surviving rows into `MAX_BATCH_SIZE` reply
    /// batches, decide per-row emission, and enqueue next-level ids.
    fn flush<F>(&mut self, level: u32, flushable: &[EntryIdx], next_level_ids: &mut Vec<Vec<u8>>, reply: &mut F) -> ControlFlow<()>
    where
        F: FnMut(FetchReply) -> ControlFlow<()>,
    {
        let mut batch = Vec::new();
        for &idx in flushable {
            if self.cache.get_by_idx(idx).flushed {
                continue;
            }
            let emit = {
                let entry = self.cache.get_by_idx(idx);
                !entry.discard && entry.update_time >= self.query.cutoff_time && !self.emitted_ids.contains(&entry.id)
            };
            {
                let entry = self.cache.get_by_idx(idx);
                self.enqueue_next_level(entry, next_level_ids);
            }
            let entry_id = self.cache.get_by_idx(idx).id.clone();
            let entry_mut = self.cache.get_by_idx_mut(idx);
            entry_mut.flushed = true;
            if emit {
                self.emitted_ids.insert(entry_id);
                if let Some(node) = self.cache.take_node(idx) {
                    batch.push(QueryEvent { node, level });
                }
            }
            if batch.len() >= MAX_BATCH_SIZE {
                if reply(FetchReply { events: std::mem::take(&mut batch), is_last: false, error: None }).is_break() {
                    return ControlFlow::Break(());
                }
            }
        }
        if !batch.is_empty() {
            return reply(FetchReply { events: batch, is_last: false, error: None });
        }
        ControlFlow::Continue(())
    }

    fn enqueue_next_level(&self, entry: &CacheEntry, next_level_ids: &mut Vec<Vec<u8>>) {
        match self.reverse_mode {
            ReverseMode::Off => {
                if !entry.is_leaf && self.query.cutoff_time <= entry.trail_update_time.max(entry.update_time) {
                    next_level_ids.push(entry.id.clone());
                }
            }
            ReverseMode::AllParents | ReverseMode::OnlyLicensed => {
                if let Some(parent_id) = &entry.parent_id {
                    next_level_ids.push(parent_id.clone());
                }
            }
        }
    }
}
