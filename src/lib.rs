//! Shardbase: multi-storage sharding locator with change-data-capture
//!
//! Given a logical entity class and a record, shardbase decides which
//! physical storage node(s) hold that record, allocates bucket placements
//! lazily, and, on backends that support it, records every mutation in a
//! durable change log that external subscribers drain and acknowledge.
//!
//! The library owns no threads and schedules no background work: every
//! operation runs on the caller's stack, and all mutual exclusion is
//! delegated to the backend's own transactional model.

pub mod data;
pub mod database;
pub mod driver;
pub mod routing;
pub mod schema;

// Re-export main types
pub use data::{fields, ColumnDef, DataType, Tuple, Value};
pub use database::{Database, CATALOG_STORAGE};
pub use driver::{
    Change, ChangeAction, FileDriver, MemoryDriver, StorageDriver, CHANGE_TABLE,
    SUBSCRIPTION_TABLE, WILDCARD_TABLE,
};
pub use routing::{
    Bucket, ConfigureJob, Locator, Topology, TopologyManager, TopologyStatus,
    REPLICATION_LISTENER,
};
pub use schema::{
    type_map, IndexDef, Model, Property, SchemaRegistry, Segment, BUCKET_TABLE,
    SHARDING_SEGMENT, STORAGE_TABLE, TOPOLOGY_TABLE,
};

/// Routing core error type
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no storage can host a bucket of '{0}' without colocation")]
    NoAvailableStorage(String),

    #[error("ambiguous routing for '{class}': {count} buckets match")]
    AmbiguousRouting { class: String, count: usize },

    #[error("unmapped schema type: {0}")]
    InvalidType(String),

    #[error("malformed row: {0}")]
    InvalidRow(String),

    #[error("change subscriptions are not supported by this storage")]
    ChangesUnsupported,

    #[error("storage error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ShardError>;
