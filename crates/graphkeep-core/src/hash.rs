//! Hash-combination helpers used by licensing (`bumpHash`, parent-path hash)
//! and blob finalize verification.

use crate::ids::Hash;

/// Combines a sequence of byte slices into one BLAKE2b-256 digest.
///
/// Used for `bumpHash = H(refId, parentId)` and for the parent-path hash
/// `H(id1, 1, prevPathHash)` accumulated while walking a license-node tree.
/// Each input is length-prefixed so that `combine(&[a, bc])` never collides
/// with `combine(&[ab, c])`.
#[must_use]
pub fn combine(parts: &[&[u8]]) -> Hash {
    let mut state = blake2b_simd::Params::new().hash_length(32).to_state();
    for part in parts {
        state.update(&(part.len() as u64).to_le_bytes());
        state.update(part);
    }
    Hash(state.finalize().as_bytes().to_vec())
}

/// Computes `bumpHash = H(refId, parentId)`.
#[must_use]
pub fn bump_hash(ref_id: &[u8], parent_id: &[u8]) -> Hash {
    combine(&[ref_id, parent_id])
}

/// Computes the next parent-path hash in a license chain:
/// `H(id1, distance_marker, prev)`.
#[must_use]
pub fn parent_path_hash(id1: &[u8], prev: Option<&Hash>) -> Hash {
    match prev {
        Some(prev) => combine(&[id1, &[1u8], prev.as_bytes()]),
        None => combine(&[id1, &[1u8]]),
    }
}

/// Streaming BLAKE2b-256 digest, used to verify a blob's reassembled bytes
/// against the hash supplied at `finalizeWriteBlob`.
pub struct BlobHasher {
    state: blake2b_simd::State,
}

impl Default for BlobHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobHasher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: blake2b_simd::Params::new().hash_length(32).to_state(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.state.update(bytes);
    }

    #[must_use]
    pub fn finalize(self) -> Hash {
        Hash(self.state.finalize().as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_is_deterministic() {
        let a = combine(&[b"foo", b"bar"]);
        let b = combine(&[b"foo", b"bar"]);
        assert_eq!(a, b);
    }

    #[test]
    fn combine_is_not_confusable_across_boundaries() {
        let a = combine(&[b"fo", b"obar"]);
        let b = combine(&[b"foo", b"bar"]);
        assert_ne!(a, b);
    }

    #[test]
    fn blob_hasher_matches_one_shot_combine_semantics() {
        let mut h = BlobHasher::new();
        h.update(b"hello ");
        h.update(b"world");
        let streamed = h.finalize();

        let mut whole = blake2b_simd::Params::new().hash_length(32).to_state();
        whole.update(b"hello world");
        let expected = Hash(whole.finalize().as_bytes().to_vec());

        assert_eq!(streamed, expected);
    }
}
