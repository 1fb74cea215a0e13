//! Bucket records
//!
//! A bucket is one `(name, version, shard, replica)` cell of a topology;
//! it owns a placement on exactly one storage. `storage` is 0 until
//! assigned, then the id of the hosting storage, and is never reassigned.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::data::{fields, Tuple, Value};
use crate::database::CATALOG_STORAGE;
use crate::schema::SHARDING_SEGMENT;
use crate::{Result, ShardError};

/// The reserved bucket holding the routing catalog itself
///
/// Locating buckets requires reading the buckets table, which itself
/// lives in a bucket; this fixed placement breaks the recursion.
static BOOTSTRAP: Lazy<Bucket> = Lazy::new(|| Bucket {
    id: Bucket::BOOTSTRAP_ID,
    name: SHARDING_SEGMENT.to_string(),
    version: 0,
    shard: 0,
    replica: 0,
    storage: CATALOG_STORAGE,
});

/// One placement cell of a topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Row id
    pub id: i64,
    /// Segment name this bucket belongs to
    pub name: String,
    /// Topology version that generated this bucket
    pub version: i64,
    /// Shard index in `[0, shards)`
    pub shard: i64,
    /// Replica index: 0 is the primary, above 0 are read-only replicas
    pub replica: i64,
    /// Hosting storage id; 0 until assigned
    pub storage: i64,
}

impl Bucket {
    /// Reserved id of the bootstrap bucket (generated ids start at 1)
    pub const BOOTSTRAP_ID: i64 = 0;

    /// The reserved bootstrap bucket
    pub fn bootstrap() -> &'static Bucket {
        &BOOTSTRAP
    }

    /// Whether this bucket is the writable primary of its shard
    pub fn is_primary(&self) -> bool {
        self.replica == 0
    }

    /// Whether a storage has been assigned
    pub fn is_assigned(&self) -> bool {
        self.storage != 0
    }

    /// Decode a bucket from its catalog row
    pub fn from_tuple(row: &Tuple) -> Result<Self> {
        let int = |name: &str| {
            row.get(name)
                .and_then(Value::as_int)
                .ok_or_else(|| ShardError::InvalidRow(format!("bucket row missing '{name}'")))
        };
        let name = row
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ShardError::InvalidRow("bucket row missing 'name'".to_string()))?;
        Ok(Self {
            id: int("id")?,
            name: name.to_string(),
            version: int("version")?,
            shard: int("shard")?,
            replica: int("replica")?,
            storage: int("storage")?,
        })
    }

    /// Encode the bucket as its catalog row (without the row id)
    pub fn to_tuple(&self) -> Tuple {
        let mut row = self.cell_query();
        row.insert("storage".to_string(), Value::Int(self.storage));
        row
    }

    /// The `(name, version, shard, replica)` cell key
    pub fn cell_query(&self) -> Tuple {
        fields([
            ("name", Value::from(self.name.as_str())),
            ("version", Value::Int(self.version)),
            ("shard", Value::Int(self.shard)),
            ("replica", Value::Int(self.replica)),
        ])
    }
}

// ============================================================================
// Tests
// ============================================================================
