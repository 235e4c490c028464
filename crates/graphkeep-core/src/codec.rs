//! The node codec collaborator.
//!
//! Signed-node serialization and signature verification are out of scope
//! (§1): the core never checks a signature. It does, however, need to turn
//! the `image` bytes it persisted back into a [`Node`] for `getNodeById1`
//! and friends, so it consumes a `NodeCodec` the same way it consumes
//! `Substrate` and `Node` itself — as an opaque collaborator interface.
//! A deployment's already-verified decode pipeline implements this trait;
//! the core calls it once per row and trusts the result.

use crate::node::Node;

/// Turns previously-stored `image` bytes back into a [`Node`].
///
/// Implementations are expected to have already verified the node's
/// signature before `store` ever saw it; `decode` here is pure
/// deserialization, not re-verification.
pub trait NodeCodec: Send + Sync {
    /// Decodes a node's `image` bytes.
    ///
    /// # Errors
    /// Returns an error if `image` is not a well-formed encoding of this
    /// codec's node representation.
    fn decode(&self, image: &[u8]) -> anyhow::Result<Box<dyn Node>>;
}
