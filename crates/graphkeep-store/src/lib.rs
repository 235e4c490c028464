//! `graphkeep-store` — the storage engine for a content-addressed,
//! permissioned, graph-structured node database: the write path and
//! single-node lookups ([`driver`]), the level-by-level read path
//! ([`query`]), and the fixed-size-fragment blob store ([`blob`]), all
//! wired over a relational [`substrate`] reachable through any engine
//! `sqlx`'s `Any` driver supports.

pub mod blob;
pub mod driver;
pub mod query;
pub mod rows;
pub mod schema;
pub mod substrate;

pub use blob::{BlobConfig, BlobDriver};
pub use driver::{DriverConfig, NodeDriver, StoreOutcome};
pub use query::{FetchQuery, FetchReply, QueryEvent, QueryProcessor, ReverseMode};
pub use substrate::Substrate;
