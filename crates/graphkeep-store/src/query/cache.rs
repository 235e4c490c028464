//! The per-query `alreadyProcessedNodes` cache (design note §9): a
//! two-level map `id -> { matched_ids, id1 -> record }` backed by an arena
//! of small-index records rather than reference-counted nodes. Discarded
//! with the [`super::QueryProcessor`] that owns it.

use std::collections::{HashMap, HashSet};

use graphkeep_core::ids::{Id1, PublicKey};
use graphkeep_core::node::Node;

/// Arena index into [`Cache::arena`].
pub type EntryIdx = usize;

/// Everything the downward traversal and the permission pipeline need to
/// remember about one previously-seen node variant. Carries the decoded
/// `nodeHandle` itself (spec §4.4's cache record), taken out via
/// [`Cache::take_node`] once flushed so it is decoded and held exactly once
/// per query.
pub struct CacheEntry {
    pub id1: Id1,
    pub id: Vec<u8>,
    pub parent_id: Option<Vec<u8>>,
    pub owner: PublicKey,
    pub child_min_difficulty: u32,
    pub disallow_public_children: bool,
    pub only_own_children: bool,
    pub restrictive_writer_nodes: Vec<Id1>,
    pub restrictive_managers: HashSet<Id1>,
    pub begin_restrictive: bool,
    pub end_restrictive: bool,
    pub passed: bool,
    pub flushed: bool,
    pub discard: bool,
    pub bottom: bool,
    pub is_leaf: bool,
    pub matched_indexes: Vec<usize>,
    pub update_time: i64,
    pub trail_update_time: i64,
    pub storage_time: i64,
    pub node: Option<Box<dyn Node>>,
}

#[derive(Default)]
struct IdBucket {
    by_id1: HashMap<Id1, EntryIdx>,
    matched_ids: HashSet<Vec<u8>>,
}

/// The per-query cache. Dedups the graph (an `id1` is decoded and scored at
/// most once per query) and carries inherited ancestor context downward.
#[derive(Default)]
pub struct Cache {
    arena: Vec<CacheEntry>,
    by_id: HashMap<Vec<u8>, IdBucket>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a previously-cached record for `(id, id1)`.
    #[must_use]
    pub fn get(&self, id: &[u8], id1: &Id1) -> Option<&CacheEntry> {
        let idx = *self.by_id.get(id)?.by_id1.get(id1)?;
        self.arena.get(idx)
    }

    pub fn get_by_idx(&self, idx: EntryIdx) -> &CacheEntry {
        &self.arena[idx]
    }

    pub fn get_by_idx_mut(&mut self, idx: EntryIdx) -> &mut CacheEntry {
        &mut self.arena[idx]
    }

    /// The arena index of a previously-cached `(id, id1)`, if any.
    #[must_use]
    pub fn index_of(&self, id: &[u8], id1: &Id1) -> Option<EntryIdx> {
        self.by_id.get(id)?.by_id1.get(id1).copied()
    }

    /// Takes ownership of the decoded node handle at `idx`, leaving `None`
    /// behind. Used once, at flush time, so a node is never decoded or
    /// handed out twice within the same query.
    pub fn take_node(&mut self, idx: EntryIdx) -> Option<Box<dyn Node>> {
        self.arena[idx].node.take()
    }

    /// Whether any variant of `id1` has already been recorded under `id`.
    #[must_use]
    pub fn contains(&self, id: &[u8], id1: &Id1) -> bool {
        self.by_id
            .get(id)
            .is_some_and(|b| b.by_id1.contains_key(id1))
    }

    /// Inserts a fresh entry, returning its arena index.
    pub fn insert(&mut self, entry: CacheEntry) -> EntryIdx {
        let id = entry.id.clone();
        let id1 = entry.id1.clone();
        let idx = self.arena.len();
        self.arena.push(entry);
        self.by_id.entry(id).or_default().by_id1.insert(id1, idx);
        idx
    }

    /// Records that `child_id` matched under the parent keyed by `parent_id`
    /// — used by the license-tree walk to recognize already-visited `id`s.
    pub fn record_matched_id(&mut self, parent_id: &[u8], child_id: Vec<u8>) {
        self.by_id.entry(parent_id.to_vec()).or_default().matched_ids.insert(child_id);
    }

    #[must_use]
    pub fn matched_ids(&self, id: &[u8]) -> Option<&HashSet<Vec<u8>>> {
        self.by_id.get(id).map(|b| &b.matched_ids)
    }

    /// The sole cached `id1` variant recorded under `id`, if exactly one
    /// exists. License-tree and loop-detection walks only need to pick a
    /// continuation variant when the id is unambiguous; an id with more
    /// than one live variant stops the walk rather than guessing.
    #[must_use]
    pub fn single_variant(&self, id: &[u8]) -> Option<Id1> {
        let bucket = self.by_id.get(id)?;
        if bucket.by_id1.len() == 1 {
            bucket.by_id1.keys().next().cloned()
        } else {
            None
        }
    }

    /// Walks `parent_id_str` chains starting at `(id, id1)` to detect a
    /// loop: the row is a loop if any ancestor on the walk revisits an
    /// `id1` already seen earlier on the same walk path.
    #[must_use]
    pub fn is_loop(&self, id: &[u8], id1: &Id1) -> bool {
        let mut seen = HashSet::new();
        seen.insert(id1.clone());
        let mut cursor_id = id.to_vec();
        let mut cursor_id1 = id1.clone();
        loop {
            let Some(entry) = self.get(&cursor_id, &cursor_id1) else { return false };
            let Some(parent_id) = entry.parent_id.clone() else { return false };
            // Any cache entry for the parent id, under any id1 variant,
            // establishes the ancestor link we walk through.
            let Some(bucket) = self.by_id.get(&parent_id) else { return false };
            if bucket.by_id1.keys().any(|pid1| seen.contains(pid1)) {
                return true;
            }
            // Continue the walk from an arbitrary parent variant; in
            // practice a given `id` has exactly one live variant by the
            // time loop detection runs.
            let Some(next_id1) = bucket.by_id1.keys().next().cloned() else { return false };
            seen.insert(next_id1.clone());
            cursor_id = parent_id;
            cursor_id1 = next_id1;
            if seen.len() > 10_000 {
                // Defensive bound: a real loop would have been caught long
                // before this; something is wrong upstream.
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &[u8], id1: &[u8], parent_id: Option<&[u8]>) -> CacheEntry {
        CacheEntry {
            id1: Id1(id1.to_vec()),
            id: id.to_vec(),
            parent_id: parent_id.map(<[u8]>::to_vec),
            owner: PublicKey(vec![]),
            child_min_difficulty: 0,
            disallow_public_children: false,
            only_own_children: false,
            restrictive_writer_nodes: Vec::new(),
            restrictive_managers: HashSet::new(),
            begin_restrictive: false,
            end_restrictive: false,
            passed: false,
            flushed: false,
            discard: false,
            bottom: false,
            is_leaf: false,
            matched_indexes: Vec::new(),
            update_time: 0,
            trail_update_time: 0,
            storage_time: 0,
            node: None,
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut cache = Cache::new();
        let idx = cache.insert(entry(b"id-a", b"id1-a", None));
        assert!(cache.contains(b"id-a", &Id1(b"id1-a".to_vec())));
        assert_eq!(cache.index_of(b"id-a", &Id1(b"id1-a".to_vec())), Some(idx));
    }

    #[test]
    fn is_loop_false_on_fresh_chain() {
        let mut cache = Cache::new();
        cache.insert(entry(b"root", b"root1", None));
        cache.insert(entry(b"child", b"child1", Some(b"root")));
        assert!(!cache.is_loop(b"child", &Id1(b"child1".to_vec())));
    }

    #[test]
    fn is_loop_true_when_ancestor_id1_revisited() {
        let mut cache = Cache::new();
        // "root" and "grandchild" coincide on the same id1, forming a cycle
        // through "child".
        cache.insert(entry(b"root", b"shared1", None));
        cache.insert(entry(b"child", b"child1", Some(b"root")));
        cache.insert(entry(b"grandchild", b"shared1", Some(b"child")));
        assert!(cache.is_loop(b"grandchild", &Id1(b"shared1".to_vec())));
    }

    #[test]
    fn take_node_leaves_none_behind() {
        let mut cache = Cache::new();
        let idx = cache.insert(entry(b"id-a", b"id1-a", None));
        assert!(cache.take_node(idx).is_none());
        assert!(cache.get_by_idx(idx).node.is_none());
    }

    proptest::proptest! {
        /// A chain of `len` distinct ids, each parented to the previous and
        /// each carrying its own distinct `id1`, never reports a loop no
        /// matter how long it runs.
        #[test]
        fn an_acyclic_chain_of_any_length_is_never_a_loop(len in 1usize..200) {
            let mut cache = Cache::new();
            let mut parent: Option<Vec<u8>> = None;
            for i in 0..len {
                let id = format!("id-{i}").into_bytes();
                let id1 = format!("id1-{i}").into_bytes();
                cache.insert(entry(&id, &id1, parent.as_deref()));
                parent = Some(id);
            }
            let last_id = format!("id-{}", len - 1).into_bytes();
            let last_id1 = Id1(format!("id1-{}", len - 1).into_bytes());
            prop_assert!(!cache.is_loop(&last_id, &last_id1));
        }

        /// Forcing the final node's `id1` to coincide with an earlier
        /// ancestor's `id1` always closes a loop, regardless of where in
        /// the chain the coincidence happens.
        #[test]
        fn reusing_an_ancestors_id1_always_closes_a_loop(len in 2usize..200, cycle_at in 0usize..1000usize) {
            let mut cache = Cache::new();
            let mut parent: Option<Vec<u8>> = None;
            // Keep the coincidence strictly before the last node, so it is
            // a genuine ancestor revisit rather than the last node alone.
            let cycle_idx = cycle_at % (len - 1);
            let shared_id1 = format!("shared-id1-{cycle_idx}").into_bytes();
            for i in 0..len {
                let id = format!("id-{i}").into_bytes();
                let id1 = if i == cycle_idx || i == len - 1 { shared_id1.clone() } else { format!("id1-{i}").into_bytes() };
                cache.insert(entry(&id, &id1, parent.as_deref()));
                parent = Some(id);
            }
            let last_id = format!("id-{}", len - 1).into_bytes();
            prop_assert!(cache.is_loop(&last_id, &Id1(shared_id1)));
        }
    }
}
