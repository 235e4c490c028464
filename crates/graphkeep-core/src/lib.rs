//! `graphkeep-core` — substrate-agnostic domain layer for the graph node
//! store: opaque id/hash newtypes, the [`Node`] capability trait, typed
//! errors, and the tunables both the driver and query processor share.
//!
//! - **Ids & hashes** ([`ids`]): `Id1`, `Id2`, `Hash`, `PublicKey` newtypes.
//! - **Node** ([`node`]): the capability-trait view the driver and query
//!   processor consume; `NodeKind`, `FriendCert`, `Filter`.
//! - **Errors** ([`error`]): `CoreError`, the crate-wide `Result` alias.
//! - **Constants** ([`constants`]): batch caps, freshen depth, fragment size.
//! - **Hash** ([`hash`]): BLAKE2b-256 combination helpers for bump/path
//!   hashes and blob finalize verification.

pub mod codec;
pub mod constants;
pub mod error;
pub mod hash;
pub mod ids;
pub mod node;

pub use codec::NodeCodec;
pub use error::{CoreError, Result};
pub use ids::{full_id, Hash as HashValue, Id1, Id2, PublicKey};
pub use node::{Filter, FilterOp, FriendCert, LicensingHashEntry, Node, NodeKind};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
