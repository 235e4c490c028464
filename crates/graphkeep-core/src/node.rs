//! The `Node` capability trait — the core's only view onto a decoded,
//! signature-verified node object.
//!
//! Signed-node decode/verify is out of scope (§1): the core receives nodes
//! that already expose this capability set. Per the "interface polymorphism
//! without inheritance" design note (§9), a concrete node is represented as
//! a [`NodeKind`] tag plus this predicate/getter trait, not a class
//! hierarchy — so a reference implementation can be one struct matching on
//! its own `kind` field rather than four structs behind a vtable.

use crate::ids::{Hash, Id1, Id2, PublicKey};

/// Tag distinguishing the four node shapes the query processor treats
/// specially. Carried alongside the `Node` trait rather than encoded via
/// subtyping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Carries `LicensingHashEntry` rows; evaluated during permission chase.
    License,
    /// Carries an embedded friend cert; two complementary carriers bridge a
    /// friend-level license.
    CarrierWithFriendCert,
    /// A data node with content subject to field-filter / embed rules.
    DataWithSpecialContent,
    /// A plain data node.
    Data,
}

/// One row of the `licensing_hashes` side-table a license node populates at
/// insert time (spec §3's `LicensingHashEntry`) — distinct from
/// [`Node::get_licensing_hashes`], which computes candidate hashes at query
/// time to match against rows already stored this way.
#[derive(Debug, Clone)]
pub struct LicensingHashEntry {
    pub hash: Hash,
    pub disallow_retro: bool,
    pub parent_path_hash: Option<Hash>,
    pub restrictive_writer: bool,
    pub restrictive_manager: bool,
}

/// A friend certificate embedded in a `CarrierWithFriendCert` node.
///
/// Two certs from complementary issuers (A issues for B, B issues for A)
/// form a friend bridge that lets a friend-level license bind across them.
#[derive(Debug, Clone)]
pub struct FriendCert {
    pub issuer: PublicKey,
    pub constraints: Vec<u8>,
    pub image: Vec<u8>,
    pub target_max_expire_time: Option<i64>,
}

/// A single field-filter predicate, as consumed by [`Node::check_filters`].
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOp,
    pub value: Vec<u8>,
}

/// Comparison operators available to a match's per-row filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// The capability set the query processor and driver consume from a decoded
/// node. Every method is a pure query over already-verified node data;
/// nothing here performs I/O.
pub trait Node: Send + Sync {
    // --- identity -------------------------------------------------------
    fn id1(&self) -> &Id1;
    fn id2(&self) -> Option<&Id2>;
    /// `id = id2 || id1`, the value child nodes reference as `parentId`.
    fn id(&self) -> Vec<u8> {
        crate::ids::full_id(self.id2(), self.id1())
    }
    fn parent_id(&self) -> Option<&[u8]>;
    fn kind(&self) -> NodeKind;

    // --- metadata ---------------------------------------------------------
    fn creation_time(&self) -> i64;
    fn expire_time(&self) -> Option<i64>;
    fn region(&self) -> Option<&str>;
    fn jurisdiction(&self) -> Option<&str>;
    fn owner(&self) -> &PublicKey;
    /// The node this one borrows permissions from, for rights-by-association.
    fn ref_id(&self) -> Option<&[u8]>;
    fn difficulty(&self) -> u32;

    // --- structural predicates --------------------------------------------
    fn is_public(&self) -> bool;
    fn is_licensed(&self) -> bool;
    fn is_unique(&self) -> bool;
    fn is_leaf(&self) -> bool;
    fn is_indestructible(&self) -> bool;
    fn is_dynamic(&self) -> bool;
    fn has_rights_by_association(&self) -> bool;
    fn disallow_parent_licensing(&self) -> bool;
    fn disallow_public_children(&self) -> bool;
    fn only_own_children(&self) -> bool;
    /// Minimum `difficulty` this node imposes on its own children, in
    /// addition to whatever its own parent already imposes. Defaults to no
    /// additional floor.
    fn get_child_min_difficulty(&self) -> u32 {
        0
    }
    fn uses_parent_license(&self) -> bool;
    fn has_online_id(&self) -> bool;
    fn has_online(&self) -> bool;
    fn is_online(&self) -> bool;
    fn is_begin_restrictive_write_mode(&self) -> bool;
    fn is_end_restrictive_write_mode(&self) -> bool;

    // --- hashes -------------------------------------------------------------
    /// Vulnerability hashes by which a destroyer may remove this node.
    fn get_achilles_hashes(&self) -> Vec<Hash>;
    /// Hash used for the unique-row constraint when `is_unique()`.
    fn hash_unique(&self) -> Option<Hash>;
    /// Hash over the non-identity ("transient") attributes, used to decide
    /// whether a `preserveTransient` re-store is a no-op.
    fn hash_transient(&self) -> Hash;
    /// Destroy hash produced by a destroyer node, matched against achilles
    /// hashes of candidate victims.
    fn get_destroy_hashes(&self) -> Vec<Hash>;
    /// Licensing hashes this license node empowers, for `(ownerPk, targetPk,
    /// optionalParentId)`.
    fn get_licensing_hashes(
        &self,
        owner_pk: &PublicKey,
        target_pk: &PublicKey,
        parent_id: Option<&[u8]>,
    ) -> Vec<Hash>;
    /// Licensee hashes a license node covers, used by bump detection.
    fn get_licensee_hashes(&self) -> Vec<Hash>;
    /// The `licensing_hashes` rows this node inserts at store time. Empty
    /// for non-license kinds.
    fn licensing_hash_entries(&self) -> Vec<LicensingHashEntry>;

    // --- private-send capabilities -------------------------------------------
    fn can_send_privately(&self, source_pk: &PublicKey, target_pk: &PublicKey) -> bool;
    fn can_receive_privately(&self, source_pk: &PublicKey, target_pk: &PublicKey) -> bool;
    fn can_send_embedded(&self) -> bool;
    fn allow_embed(&self) -> bool;
    fn allow_embed_move(&self) -> bool;
    /// Produces a sendable embedded copy of this node for `target_pk`.
    fn embed(&self, target_pk: &PublicKey) -> anyhow::Result<Box<dyn Node>>;
    fn get_embedded_object(&self) -> Option<&[u8]>;

    // --- license knobs -------------------------------------------------------
    fn disallow_retro_licensing(&self) -> bool;
    fn get_parent_path_hash(&self) -> Option<Hash>;
    fn is_restrictive_mode_writer(&self) -> bool;
    fn is_restrictive_mode_manager(&self) -> bool;
    fn get_license_min_distance(&self) -> u32;
    fn get_license_max_distance(&self) -> u32;
    fn get_friend_level(&self) -> Option<u8>;

    // --- friend-cert knobs -----------------------------------------------------
    fn get_issuer_public_key(&self) -> Option<&PublicKey>;
    fn get_constraints(&self) -> Option<&[u8]>;
    fn get_target_max_expire_time(&self) -> Option<i64>;
    fn set_friend_a_cert_object(&mut self, cert: FriendCert);
    fn set_friend_b_cert_object(&mut self, cert: FriendCert);
    /// Validates a friend-cert bridge (or any other post-embed invariant)
    /// after both complementary certs have been installed.
    fn validate(&self, now: i64) -> anyhow::Result<()>;

    // --- payload -----------------------------------------------------------------
    fn image(&self) -> &[u8];
    fn check_filters(&self, filters: &[Filter]) -> bool;
    fn get_hashed_value(&self, field: &str) -> Option<Hash>;

    // --- private-visibility predicate, used outside the licensing path ----------
    /// Admits (source, target) for a non-licensed, non-public node.
    fn admits_private_send(&self, source_pk: &PublicKey, target_pk: &PublicKey) -> bool {
        self.can_send_privately(source_pk, target_pk)
            && self.can_receive_privately(source_pk, target_pk)
    }
}
