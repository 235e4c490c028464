//! The stateful "match" predicate language (spec §4.4) and its two-phase
//! evaluation: `matchFirst` runs while streaming rows (cheap, idempotent,
//! may later be discarded by permissions); `matchSecond` runs only for rows
//! that survive the permission pipeline and commits counter state.

use graphkeep_core::node::{Filter, Node};

use crate::rows::NodeRow;

/// One entry of a fetch query's match array.
#[derive(Debug, Clone)]
pub struct MatchSpec {
    /// Which level this match applies to; `None` matches every level.
    pub level: Option<u32>,
    /// Required prefix of the node's type tag, if the wire format encodes one.
    pub node_type_prefix: Option<Vec<u8>>,
    /// The parent's id-matches set must contain this value for the row to
    /// be a candidate (`requireId`).
    pub require_id: Option<Vec<u8>>,
    /// Per-row field filters.
    pub filters: Vec<Filter>,
    /// Maximum number of rows this match may accept.
    pub limit: Option<u64>,
    /// Field name used to group `limit` per distinct value, instead of a
    /// flat counter.
    pub limit_field: Option<String>,
    /// A match is inert until a row with this `id1` passes structural
    /// predicates; only rows ordered after it count against `limit`.
    pub cursor_id1: Option<Vec<u8>>,
    /// AND'd into the row's cache entry `discard` flag when this match
    /// fires.
    pub discard: bool,
    /// AND'd into the row's cache entry `bottom` flag when this match
    /// fires.
    pub bottom: bool,
}

/// Mutable state threaded through a single match for the lifetime of one
/// query.
#[derive(Debug, Default, Clone)]
pub struct MatchState {
    pub counter: u64,
    pub cursor_passed: bool,
    pub limit_field_counts: std::collections::HashMap<Vec<u8>, u64>,
}

impl MatchState {
    #[must_use]
    pub fn is_done(&self, spec: &MatchSpec) -> bool {
        match (spec.limit, &spec.limit_field) {
            (Some(limit), None) => self.counter >= limit,
            _ => false,
        }
    }
}

fn node_type_matches(node: &dyn Node, prefix: &[u8]) -> bool {
    node.image().starts_with(prefix)
}

fn provisional_under_limit(spec: &MatchSpec, state: &MatchState, field_value: Option<&[u8]>) -> bool {
    match (spec.limit, &spec.limit_field) {
        (Some(limit), Some(_)) => field_value.is_none_or(|v| {
            state.limit_field_counts.get(v).copied().unwrap_or(0) < limit
        }),
        (Some(limit), None) => state.counter < limit,
        (None, _) => true,
    }
}

/// Phase 1: checks whether `row` is a candidate for at least one live
/// match at `level`. Mutates only `cursor_passed`. Returns the indexes of
/// every match spec the row is a structural candidate for.
pub fn match_first(
    row: &NodeRow,
    node: &dyn Node,
    level: u32,
    parent_id_matches: Option<&std::collections::HashSet<Vec<u8>>>,
    specs: &[MatchSpec],
    states: &mut [MatchState],
) -> Vec<usize> {
    let mut matched = Vec::new();
    for (idx, spec) in specs.iter().enumerate() {
        if let Some(want_level) = spec.level {
            if want_level != level {
                continue;
            }
        }
        if let Some(prefix) = &spec.node_type_prefix {
            if !node_type_matches(node, prefix) {
                continue;
            }
        }
        if let Some(require_id) = &spec.require_id {
            let satisfied = parent_id_matches.is_some_and(|m| m.contains(require_id));
            if !satisfied {
                continue;
            }
        }
        if !node.check_filters(&spec.filters) {
            continue;
        }

        let state = &mut states[idx];
        let was_cursor_pending = spec.cursor_id1.is_some() && !state.cursor_passed;
        if let Some(cursor_id1) = &spec.cursor_id1 {
            if !state.cursor_passed {
                if row.id1.as_bytes() == cursor_id1.as_slice() {
                    state.cursor_passed = true;
                }
                // The cursor row itself is inert: it never counts, whether
                // or not it otherwise matches.
                continue;
            }
        }
        if state.is_done(spec) {
            continue;
        }
        if !provisional_under_limit(spec, state, spec.limit_field.as_ref().map(|_| row.id1.as_bytes())) {
            continue;
        }
        let _ = was_cursor_pending;
        matched.push(idx);
    }
    matched
}

/// Phase 2: commits counter state for a row that survived permissions.
/// Returns the AND-combined `(discard, bottom)` over every match that
/// fired for this row.
pub fn match_second(
    row_id1: &[u8],
    matched: &[usize],
    specs: &[MatchSpec],
    states: &mut [MatchState],
) -> (bool, bool) {
    let mut discard = !matched.is_empty();
    let mut bottom = !matched.is_empty();
    for &idx in matched {
        let spec = &specs[idx];
        let state = &mut states[idx];
        state.counter += 1;
        if let Some(field) = &spec.limit_field {
            let _ = field;
            *state.limit_field_counts.entry(row_id1.to_vec()).or_insert(0) += 1;
        }
        discard &= spec.discard;
        bottom &= spec.bottom;
    }
    (discard, bottom)
}

/// Whether every match with a declared limit has reached it (terminates
/// the level loop early, per §4.4 "Termination").
#[must_use]
pub fn all_matches_done(specs: &[MatchSpec], states: &[MatchState]) -> bool {
    if specs.is_empty() {
        return false;
    }
    specs.iter().zip(states).all(|(spec, state)| spec.limit.is_some() && state.is_done(spec))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(level: Option<u32>, limit: Option<u64>) -> MatchSpec {
        MatchSpec {
            level,
            node_type_prefix: None,
            require_id: None,
            filters: Vec::new(),
            limit,
            limit_field: None,
            cursor_id1: None,
            discard: false,
            bottom: false,
        }
    }

    #[test]
    fn all_matches_done_false_without_limits() {
        let specs = vec![spec(Some(1), None)];
        let states = vec![MatchState::default()];
        assert!(!all_matches_done(&specs, &states));
    }

    #[test]
    fn all_matches_done_true_once_every_limited_match_is_full() {
        let specs = vec![spec(Some(1), Some(2))];
        let states = vec![MatchState { counter: 2, ..Default::default() }];
        assert!(all_matches_done(&specs, &states));
    }
}
