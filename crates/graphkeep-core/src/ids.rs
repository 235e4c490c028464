//! Opaque identifier and hash newtypes.
//!
//! Ids and hashes are caller-chosen fixed-length byte strings (typically
//! 32-64 bytes). The core never interprets their contents beyond equality,
//! ordering, and concatenation for `id = id2 || id1`.

use std::fmt;

/// A primary node identifier (`id1`). Unique across storage.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id1(pub Vec<u8>);

/// An optional secondary identifier (`id2`) used to form the parent
/// reference target `id = id2 || id1`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id2(pub Vec<u8>);

/// An opaque hash value (achilles, destroy, licensing, unique, transient, ...).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub Vec<u8>);

/// A public key, used as source/target principal in permission checks.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PublicKey(pub Vec<u8>);

macro_rules! byte_newtype {
    ($t:ty) => {
        impl $t {
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            #[must_use]
            pub fn into_bytes(self) -> Vec<u8> {
                self.0
            }
        }

        impl From<Vec<u8>> for $t {
            fn from(v: Vec<u8>) -> Self {
                Self(v)
            }
        }

        impl From<&[u8]> for $t {
            fn from(v: &[u8]) -> Self {
                Self(v.to_vec())
            }
        }

        impl AsRef<[u8]> for $t {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($t))?;
                for b in &self.0 {
                    write!(f, "{b:02x}")?;
                }
                write!(f, ")")
            }
        }
    };
}

byte_newtype!(Id1);
byte_newtype!(Id2);
byte_newtype!(Hash);
byte_newtype!(PublicKey);

/// Computes the full `id = id2 || id1` used as the parent-reference target.
///
/// A node with no `id2` uses `id1` alone as its `id`.
#[must_use]
pub fn full_id(id2: Option<&Id2>, id1: &Id1) -> Vec<u8> {
    let mut out = Vec::with_capacity(id2.map_or(0, |i| i.0.len()) + id1.0.len());
    if let Some(id2) = id2 {
        out.extend_from_slice(&id2.0);
    }
    out.extend_from_slice(&id1.0);
    out
}
