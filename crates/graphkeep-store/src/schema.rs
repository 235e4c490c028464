//! Table and column name constants (spec §6 "Tables").
//!
//! Plain `&str` constants, not a migration/bootstrap system: a deployment
//! is expected to have already created these seven tables (five node-side,
//! two blob-side) with the indexes listed in §6. `#[cfg(test)]` fixtures in
//! `tests/` issue the matching `CREATE TABLE` statements against an
//! in-memory SQLite connection so the integration suite has something to
//! run against.

pub const NODES: &str = "nodes";
pub const ACHILLES_HASHES: &str = "achilles_hashes";
pub const LICENSING_HASHES: &str = "licensing_hashes";
pub const DESTROY_HASHES: &str = "destroy_hashes";
pub const FRIEND_CERTS: &str = "friend_certs";
pub const BLOB_FRAGMENTS: &str = "blob_fragments";
pub const BLOB_BINDINGS: &str = "blob_bindings";

pub mod nodes {
    pub const ID1: &str = "id1";
    pub const ID2: &str = "id2";
    pub const ID: &str = "id";
    pub const PARENT_ID: &str = "parent_id";
    pub const CREATION_TIME: &str = "creation_time";
    pub const EXPIRE_TIME: &str = "expire_time";
    pub const REGION: &str = "region";
    pub const JURISDICTION: &str = "jurisdiction";
    pub const OWNER: &str = "owner";
    pub const IS_PUBLIC: &str = "is_public";
    pub const IS_LICENSED: &str = "is_licensed";
    pub const DISALLOW_PARENT_LICENSING: &str = "disallow_parent_licensing";
    pub const IS_LEAF: &str = "is_leaf";
    pub const IS_INACTIVE: &str = "is_inactive";
    pub const DIFFICULTY: &str = "difficulty";
    pub const UNIQUE_HASH: &str = "unique_hash";
    pub const TRANSIENT_HASH: &str = "transient_hash";
    pub const STORAGE_TIME: &str = "storage_time";
    pub const UPDATE_TIME: &str = "update_time";
    pub const TRAIL_UPDATE_TIME: &str = "trail_update_time";
    pub const BUMP_HASH: &str = "bump_hash";
    pub const IMAGE: &str = "image";
}

pub mod achilles_hashes {
    pub const ID1: &str = "id1";
    pub const HASH: &str = "hash";
}

pub mod licensing_hashes {
    pub const ID1: &str = "id1";
    pub const HASH: &str = "hash";
    pub const DISALLOW_RETRO: &str = "disallow_retro";
    pub const PARENT_PATH_HASH: &str = "parent_path_hash";
    pub const RESTRICTIVE_WRITER: &str = "restrictive_writer";
    pub const RESTRICTIVE_MANAGER: &str = "restrictive_manager";
}

pub mod destroy_hashes {
    pub const ID1: &str = "id1";
    pub const HASH: &str = "hash";
}

pub mod friend_certs {
    pub const ID1: &str = "id1";
    pub const ISSUER: &str = "issuer";
    pub const CONSTRAINTS: &str = "constraints";
    pub const IMAGE: &str = "image";
}

pub mod blob_fragments {
    pub const DATA_ID: &str = "data_id";
    pub const FRAGMENT_NR: &str = "fragment_nr";
    pub const FINALIZED: &str = "finalized";
    pub const FRAGMENT: &str = "fragment";
    pub const CREATION_TIME: &str = "creation_time";
}

pub mod blob_bindings {
    pub const NODE_ID1: &str = "node_id1";
    pub const DATA_ID: &str = "data_id";
    pub const STORAGE_TIME: &str = "storage_time";
}

/// `CREATE TABLE` statements for the integration-test fixture. Not used by
/// production code paths — `graphkeep-store` never bootstraps a schema.
#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixture {
    pub const CREATE_ALL: &[&str] = &[
        "CREATE TABLE nodes (
            id1 BLOB PRIMARY KEY,
            id2 BLOB,
            id BLOB NOT NULL,
            parent_id BLOB,
            creation_time INTEGER NOT NULL,
            expire_time INTEGER,
            region TEXT,
            jurisdiction TEXT,
            owner BLOB NOT NULL,
            is_public INTEGER NOT NULL DEFAULT 0,
            is_licensed INTEGER NOT NULL DEFAULT 0,
            disallow_parent_licensing INTEGER NOT NULL DEFAULT 0,
            is_leaf INTEGER NOT NULL DEFAULT 0,
            is_inactive INTEGER NOT NULL DEFAULT 0,
            difficulty INTEGER NOT NULL DEFAULT 0,
            unique_hash BLOB UNIQUE,
            transient_hash BLOB NOT NULL,
            storage_time INTEGER NOT NULL,
            update_time INTEGER NOT NULL,
            trail_update_time INTEGER NOT NULL,
            bump_hash BLOB,
            image BLOB NOT NULL
        )",
        "CREATE INDEX idx_nodes_creation_time ON nodes (creation_time)",
        "CREATE INDEX idx_nodes_storage_time ON nodes (storage_time)",
        "CREATE INDEX idx_nodes_id2 ON nodes (id2)",
        "CREATE INDEX idx_nodes_id ON nodes (id)",
        "CREATE INDEX idx_nodes_parent_id ON nodes (parent_id)",
        "CREATE INDEX idx_nodes_owner ON nodes (owner)",
        "CREATE INDEX idx_nodes_bump_hash ON nodes (bump_hash)",
        "CREATE TABLE achilles_hashes (id1 BLOB NOT NULL, hash BLOB NOT NULL)",
        "CREATE INDEX idx_achilles_id1 ON achilles_hashes (id1)",
        "CREATE INDEX idx_achilles_hash ON achilles_hashes (hash)",
        "CREATE TABLE licensing_hashes (
            id1 BLOB NOT NULL,
            hash BLOB NOT NULL,
            disallow_retro INTEGER NOT NULL DEFAULT 0,
            parent_path_hash BLOB,
            restrictive_writer INTEGER NOT NULL DEFAULT 0,
            restrictive_manager INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX idx_licensing_id1 ON licensing_hashes (id1)",
        "CREATE INDEX idx_licensing_hash ON licensing_hashes (hash)",
        "CREATE TABLE destroy_hashes (id1 BLOB NOT NULL, hash BLOB NOT NULL)",
        "CREATE INDEX idx_destroy_id1 ON destroy_hashes (id1)",
        "CREATE INDEX idx_destroy_hash ON destroy_hashes (hash)",
        "CREATE TABLE friend_certs (
            id1 BLOB NOT NULL,
            issuer BLOB NOT NULL,
            constraints BLOB NOT NULL,
            image BLOB NOT NULL
        )",
        "CREATE INDEX idx_friend_certs_constraints ON friend_certs (constraints)",
        "CREATE TABLE blob_fragments (
            data_id BLOB NOT NULL,
            fragment_nr INTEGER NOT NULL,
            finalized INTEGER NOT NULL DEFAULT 0,
            fragment BLOB NOT NULL,
            creation_time INTEGER NOT NULL,
            PRIMARY KEY (data_id, fragment_nr)
        )",
        "CREATE INDEX idx_blob_fragments_data_id ON blob_fragments (data_id)",
        "CREATE TABLE blob_bindings (
            node_id1 BLOB NOT NULL,
            data_id BLOB NOT NULL,
            storage_time INTEGER NOT NULL
        )",
        "CREATE INDEX idx_blob_bindings_node_id1 ON blob_bindings (node_id1)",
        "CREATE INDEX idx_blob_bindings_data_id ON blob_bindings (data_id)",
    ];
}
