//! Typed error codes surfaced by the driver, query processor, and blob store.
//!
//! Follows the teacher workspace's convention of a `thiserror` enum with an
//! `Other(#[from] anyhow::Error)` escape hatch for substrate faults that
//! don't need a typed variant at the call site (see `OperationError` in the
//! service layer this crate descends from).

/// Errors surfaced by `graphkeep-store` to its callers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input failed validation before any substrate call was made
    /// (non-monotonic timestamp, oversized batch, malformed id/hash).
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A fetch or root-node resolution was denied by the permission model.
    #[error("not allowed")]
    NotAllowed,

    /// `getRootNode` could not find the requested root.
    #[error("missing root node")]
    MissingRootNode,

    /// `getRootNode` found a root that is licensed and therefore cannot
    /// serve as a fetch root.
    #[error("root node is licensed")]
    RootNodeLicensed,

    /// `store` failed because the substrate reported lock contention.
    /// Retryable: callers may retry with bounded backoff.
    #[error("store failed: substrate busy")]
    StoreFailed,

    /// Blob finalize: the streamed hash did not match the expected hash.
    #[error("blob hash mismatch")]
    Mismatch,

    /// Blob finalize: the dataset is already finalized (idempotent re-finalize
    /// short-circuits instead of re-hashing).
    #[error("blob already finalized")]
    Exists,

    /// A fetch failed for a reason other than permission denial.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// A requested cursor id1 was never observed in the result stream
    /// (surfaced for CRDT/incremental-sync layers above the driver).
    #[error("cursor id1 not found in stream")]
    MissingCursor,

    /// The reply callback requested cancellation mid-stream.
    #[error("reply trigger dropped by callback")]
    DroppedTrigger,

    /// Any other substrate fault. Not retryable.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether a caller may retry this error with bounded backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StoreFailed)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;
