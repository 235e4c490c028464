//! Shared test fixture: a `GenericNode` implementing `graphkeep_core::Node`
//! by matching on its own `kind` field (the "interface polymorphism without
//! inheritance" design note), a passthrough `TestCodec`, and an in-memory
//! SQLite `Substrate` seeded from `schema::fixture::CREATE_ALL`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use graphkeep_core::hash::combine;
use graphkeep_core::ids::{Hash, Id1, Id2, PublicKey};
use graphkeep_core::node::{Filter, FriendCert, LicensingHashEntry, Node, NodeKind};
use graphkeep_core::NodeCodec;
use graphkeep_store::substrate::Substrate;

/// A node whose every capability is a plain field rather than computed
/// behavior, so tests can construct exactly the permission shape they want
/// to exercise.
#[derive(Clone)]
pub struct GenericNode {
    pub id1: Id1,
    pub id2: Option<Id2>,
    pub parent_id: Option<Vec<u8>>,
    pub kind: NodeKind,
    pub creation_time: i64,
    pub expire_time: Option<i64>,
    pub owner: PublicKey,
    pub ref_id: Option<Vec<u8>>,
    pub difficulty: u32,
    pub is_public: bool,
    pub is_licensed: bool,
    pub is_unique: bool,
    pub is_leaf: bool,
    pub indestructible: bool,
    pub has_rights_by_association: bool,
    pub has_online_id: bool,
    pub begin_restrictive_write_mode: bool,
    pub end_restrictive_write_mode: bool,
    pub disallow_public_children_flag: bool,
    pub only_own_children_flag: bool,
    pub child_min_difficulty: u32,
    pub can_send_embedded_flag: bool,
    pub friend_level: Option<u8>,
    pub issuer_public_key: Option<PublicKey>,
    pub constraints: Option<Vec<u8>>,
    pub friend_a_cert: Option<FriendCert>,
    pub friend_b_cert: Option<FriendCert>,
    pub achilles_hashes: Vec<Hash>,
    pub destroy_hashes: Vec<Hash>,
    pub licensing_hash_entries: Vec<LicensingHashEntry>,
    pub licensee_hashes: Vec<Hash>,
    pub licensing_hash_seed: Option<Vec<u8>>,
    pub unique_hash: Option<Hash>,
    pub allowed_private_sender: Option<PublicKey>,
    pub allowed_private_receiver: Option<PublicKey>,
    pub disallow_retro: bool,
    pub license_min_distance: u32,
    pub license_max_distance: u32,
    pub image: Vec<u8>,
    pub fields: HashMap<String, Hash>,
}

impl GenericNode {
    pub fn new(id1: &[u8], owner: &[u8]) -> Self {
        Self {
            id1: Id1(id1.to_vec()),
            id2: None,
            parent_id: None,
            kind: NodeKind::Data,
            creation_time: 0,
            expire_time: None,
            owner: PublicKey(owner.to_vec()),
            ref_id: None,
            difficulty: 0,
            is_public: false,
            is_licensed: false,
            is_unique: false,
            is_leaf: false,
            indestructible: false,
            has_rights_by_association: false,
            has_online_id: false,
            begin_restrictive_write_mode: false,
            end_restrictive_write_mode: false,
            disallow_public_children_flag: false,
            only_own_children_flag: false,
            child_min_difficulty: 0,
            can_send_embedded_flag: false,
            friend_level: None,
            issuer_public_key: None,
            constraints: None,
            friend_a_cert: None,
            friend_b_cert: None,
            achilles_hashes: Vec::new(),
            destroy_hashes: Vec::new(),
            licensing_hash_entries: Vec::new(),
            licensee_hashes: Vec::new(),
            licensing_hash_seed: None,
            unique_hash: None,
            allowed_private_sender: None,
            allowed_private_receiver: None,
            disallow_retro: false,
            license_min_distance: 0,
            license_max_distance: 20,
            image: Vec::new(),
            fields: HashMap::new(),
        }
    }

    #[must_use]
    pub fn parent(mut self, parent_id: &[u8]) -> Self {
        self.parent_id = Some(parent_id.to_vec());
        self
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    #[must_use]
    pub fn licensed(mut self, seed: &[u8]) -> Self {
        self.is_licensed = true;
        self.licensing_hash_seed = Some(seed.to_vec());
        self
    }

    #[must_use]
    pub fn as_license_for(mut self, seed: &[u8]) -> Self {
        self.kind = NodeKind::License;
        self.licensee_hashes = vec![combine(&[seed, b"licensee"])];
        self.licensing_hash_entries = vec![LicensingHashEntry {
            hash: combine(&[seed, b"licensee"]),
            disallow_retro: false,
            parent_path_hash: None,
            restrictive_writer: false,
            restrictive_manager: false,
        }];
        self
    }

    #[must_use]
    pub fn as_restrictive_writer_license_for(mut self, writer_id1: &[u8], owner: &[u8]) -> Self {
        self.kind = NodeKind::License;
        let hash = combine(&[writer_id1, owner, b"restrictive"]);
        self.licensee_hashes = vec![hash.clone()];
        self.licensing_hash_entries = vec![LicensingHashEntry {
            hash,
            disallow_retro: false,
            parent_path_hash: None,
            restrictive_writer: true,
            restrictive_manager: false,
        }];
        self
    }

    #[must_use]
    pub fn begin_restrictive(mut self) -> Self {
        self.begin_restrictive_write_mode = true;
        self
    }

    #[must_use]
    pub fn end_restrictive(mut self) -> Self {
        self.end_restrictive_write_mode = true;
        self
    }

    #[must_use]
    pub fn disallow_public_children(mut self) -> Self {
        self.disallow_public_children_flag = true;
        self
    }

    #[must_use]
    pub fn only_own_children(mut self) -> Self {
        self.only_own_children_flag = true;
        self
    }

    #[must_use]
    pub fn child_min_difficulty(mut self, min: u32) -> Self {
        self.child_min_difficulty = min;
        self
    }

    #[must_use]
    pub fn difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    #[must_use]
    pub fn friend_carrier(mut self, issuer: &[u8], constraints: &[u8], friend_level: u8) -> Self {
        self.kind = NodeKind::CarrierWithFriendCert;
        self.issuer_public_key = Some(PublicKey(issuer.to_vec()));
        self.constraints = Some(constraints.to_vec());
        self.friend_level = Some(friend_level);
        self.can_send_embedded_flag = true;
        self
    }

    #[must_use]
    pub fn unique(mut self, hash: &[u8]) -> Self {
        self.is_unique = true;
        self.unique_hash = Some(Hash(hash.to_vec()));
        self
    }

    #[must_use]
    pub fn achilles(mut self, hash: &[u8]) -> Self {
        self.achilles_hashes.push(Hash(hash.to_vec()));
        self
    }

    #[must_use]
    pub fn destroys(mut self, hash: &[u8]) -> Self {
        self.destroy_hashes.push(Hash(hash.to_vec()));
        self
    }

    #[must_use]
    pub fn private_between(mut self, sender: &[u8], receiver: &[u8]) -> Self {
        self.allowed_private_sender = Some(PublicKey(sender.to_vec()));
        self.allowed_private_receiver = Some(PublicKey(receiver.to_vec()));
        self
    }

    #[must_use]
    pub fn online(mut self) -> Self {
        self.has_online_id = true;
        self
    }

    #[must_use]
    pub fn image(mut self, bytes: &[u8]) -> Self {
        self.image = bytes.to_vec();
        self
    }

    pub fn boxed(self) -> Box<dyn Node> {
        Box::new(self)
    }
}

impl Node for GenericNode {
    fn id1(&self) -> &Id1 {
        &self.id1
    }

    fn id2(&self) -> Option<&Id2> {
        self.id2.as_ref()
    }

    fn parent_id(&self) -> Option<&[u8]> {
        self.parent_id.as_deref()
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn creation_time(&self) -> i64 {
        self.creation_time
    }

    fn expire_time(&self) -> Option<i64> {
        self.expire_time
    }

    fn region(&self) -> Option<&str> {
        None
    }

    fn jurisdiction(&self) -> Option<&str> {
        None
    }

    fn owner(&self) -> &PublicKey {
        &self.owner
    }

    fn ref_id(&self) -> Option<&[u8]> {
        self.ref_id.as_deref()
    }

    fn difficulty(&self) -> u32 {
        self.difficulty
    }

    fn is_public(&self) -> bool {
        self.is_public
    }

    fn is_licensed(&self) -> bool {
        self.is_licensed
    }

    fn is_unique(&self) -> bool {
        self.is_unique
    }

    fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    fn is_indestructible(&self) -> bool {
        self.indestructible
    }

    fn is_dynamic(&self) -> bool {
        false
    }

    fn has_rights_by_association(&self) -> bool {
        self.has_rights_by_association
    }

    fn disallow_parent_licensing(&self) -> bool {
        false
    }

    fn disallow_public_children(&self) -> bool {
        self.disallow_public_children_flag
    }

    fn only_own_children(&self) -> bool {
        self.only_own_children_flag
    }

    fn get_child_min_difficulty(&self) -> u32 {
        self.child_min_difficulty
    }

    fn uses_parent_license(&self) -> bool {
        false
    }

    fn has_online_id(&self) -> bool {
        self.has_online_id
    }

    fn has_online(&self) -> bool {
        self.has_online_id
    }

    fn is_online(&self) -> bool {
        false
    }

    fn is_begin_restrictive_write_mode(&self) -> bool {
        self.begin_restrictive_write_mode
    }

    fn is_end_restrictive_write_mode(&self) -> bool {
        self.end_restrictive_write_mode
    }

    fn get_achilles_hashes(&self) -> Vec<Hash> {
        self.achilles_hashes.clone()
    }

    fn hash_unique(&self) -> Option<Hash> {
        self.unique_hash.clone()
    }

    fn hash_transient(&self) -> Hash {
        combine(&[&self.image, self.owner.as_bytes()])
    }

    fn get_destroy_hashes(&self) -> Vec<Hash> {
        self.destroy_hashes.clone()
    }

    fn get_licensing_hashes(&self, _owner_pk: &PublicKey, _target_pk: &PublicKey, _parent_id: Option<&[u8]>) -> Vec<Hash> {
        match &self.licensing_hash_seed {
            Some(seed) => vec![combine(&[seed, b"licensee"])],
            None => Vec::new(),
        }
    }

    fn get_licensee_hashes(&self) -> Vec<Hash> {
        self.licensee_hashes.clone()
    }

    fn licensing_hash_entries(&self) -> Vec<LicensingHashEntry> {
        self.licensing_hash_entries.clone()
    }

    fn can_send_privately(&self, source_pk: &PublicKey, _target_pk: &PublicKey) -> bool {
        self.allowed_private_sender.as_ref() == Some(source_pk)
    }

    fn can_receive_privately(&self, _source_pk: &PublicKey, target_pk: &PublicKey) -> bool {
        self.allowed_private_receiver.as_ref() == Some(target_pk)
    }

    fn can_send_embedded(&self) -> bool {
        self.can_send_embedded_flag
    }

    fn allow_embed(&self) -> bool {
        false
    }

    fn allow_embed_move(&self) -> bool {
        false
    }

    fn embed(&self, target_pk: &PublicKey) -> anyhow::Result<Box<dyn Node>> {
        let mut copy = self.clone();
        copy.allowed_private_receiver = Some(target_pk.clone());
        Ok(Box::new(copy))
    }

    fn get_embedded_object(&self) -> Option<&[u8]> {
        None
    }

    fn disallow_retro_licensing(&self) -> bool {
        self.disallow_retro
    }

    fn get_parent_path_hash(&self) -> Option<Hash> {
        None
    }

    fn is_restrictive_mode_writer(&self) -> bool {
        false
    }

    fn is_restrictive_mode_manager(&self) -> bool {
        false
    }

    fn get_license_min_distance(&self) -> u32 {
        self.license_min_distance
    }

    fn get_license_max_distance(&self) -> u32 {
        self.license_max_distance
    }

    fn get_friend_level(&self) -> Option<u8> {
        self.friend_level
    }

    fn get_issuer_public_key(&self) -> Option<&PublicKey> {
        self.issuer_public_key.as_ref()
    }

    fn get_constraints(&self) -> Option<&[u8]> {
        self.constraints.as_deref()
    }

    fn get_target_max_expire_time(&self) -> Option<i64> {
        None
    }

    fn set_friend_a_cert_object(&mut self, cert: FriendCert) {
        self.friend_a_cert = Some(cert);
    }

    fn set_friend_b_cert_object(&mut self, cert: FriendCert) {
        self.friend_b_cert = Some(cert);
    }

    fn validate(&self, _now: i64) -> anyhow::Result<()> {
        if self.friend_level.is_some() && (self.friend_a_cert.is_none() || self.friend_b_cert.is_none()) {
            anyhow::bail!("friend-level carrier missing its complementary cert bridge");
        }
        Ok(())
    }

    fn image(&self) -> &[u8] {
        &self.image
    }

    fn check_filters(&self, filters: &[Filter]) -> bool {
        filters.iter().all(|f| match self.fields.get(&f.field) {
            Some(v) => match f.operator {
                graphkeep_core::node::FilterOp::Eq => v.as_bytes() == f.value.as_slice(),
                graphkeep_core::node::FilterOp::Ne => v.as_bytes() != f.value.as_slice(),
                _ => true,
            },
            None => false,
        })
    }

    fn get_hashed_value(&self, field: &str) -> Option<Hash> {
        self.fields.get(field).cloned()
    }
}

/// Decodes the stored `image` bytes back into a `GenericNode` by looking
/// it up from a side table the test harness keeps in memory, keyed by the
/// image bytes themselves (the harness never serializes a real node
/// encoding — tests construct `GenericNode`s directly and this codec only
/// needs to satisfy the `NodeCodec` contract for round-tripping through
/// storage).
pub struct TestCodec {
    by_image: std::sync::Mutex<HashMap<Vec<u8>, GenericNode>>,
}

impl TestCodec {
    pub fn new() -> Self {
        Self { by_image: std::sync::Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, node: &GenericNode) {
        self.by_image.lock().unwrap().insert(node.image.clone(), node.clone());
    }
}

impl Default for TestCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCodec for TestCodec {
    fn decode(&self, image: &[u8]) -> anyhow::Result<Box<dyn Node>> {
        self.by_image
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .map(|n| Box::new(n) as Box<dyn Node>)
            .ok_or_else(|| anyhow::anyhow!("unregistered test image"))
    }
}

pub async fn fresh_substrate() -> Arc<Substrate> {
    let substrate = Substrate::connect("sqlite::memory:").await.expect("connect in-memory sqlite");
    let mut tx = substrate.begin().await.expect("begin fixture tx");
    for stmt in graphkeep_store::schema::fixture::CREATE_ALL {
        tx.exec(stmt).await.expect("create fixture table");
    }
    tx.commit().await.expect("commit fixture schema");
    Arc::new(substrate)
}
