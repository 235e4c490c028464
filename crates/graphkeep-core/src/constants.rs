//! Deployment-overridable tunables (see spec §6 "Constants").

/// Maximum number of nodes accepted by a single `store` call.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Depth ceiling for `freshenParentTrail`'s reverse `ALL_PARENTS` walk.
pub const MAX_FRESHEN_DEPTH: u32 = 10;

/// Per-level row budget for a single fetch, regardless of declared limits.
pub const MAX_QUERY_LEVEL_LIMIT: u64 = 100_000;

/// Total row budget for a single fetch, regardless of declared limits.
pub const MAX_QUERY_ROWS_LIMIT: u64 = 1_000_000;

/// Size of one blob fragment. Deployment-fixed; must never change on a
/// populated store.
pub const BLOB_FRAGMENT_SIZE: usize = 32 * 1024;

/// Minimum `difficulty` a restricted self-destroy (`refId == owner`)
/// destroyer node must carry.
pub const MIN_DIFFICULTY_TOTAL_DESTRUCTION: u32 = 2;

/// Default tolerance applied to the `creationTime <= now + epsilon`
/// visibility gate. Deployment-specific; this is the documented default
/// (see `DESIGN.md` Open Question resolution), not a guess.
pub const NOW_TOLERANCE_MILLIS: i64 = 5_000;

/// Batch size for substrate round-trips within a single driver/query step
/// (distinct from `MAX_BATCH_SIZE`, which bounds the caller's input).
pub const MAX_SQL_BATCH_SIZE: usize = 500;
