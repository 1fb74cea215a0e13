//! Bucket locator
//!
//! Resolves `(class, record, writable, multiple)` to the set of buckets
//! holding that record: consults the schema and topology, materializes
//! missing buckets lazily, filters by replica role and shard key, and
//! ensures every returned bucket is bound to a storage.

use std::sync::Arc;

use log::debug;

use super::assign::assign_storage;
use super::bucket::Bucket;
use super::topology::{Topology, TopologyManager, TopologyStatus};
use crate::data::{fields, Tuple, Value};
use crate::database::Database;
use crate::driver::StorageDriver;
use crate::schema::{BUCKET_TABLE, SHARDING_SEGMENT};
use crate::{Result, ShardError};

/// Routes records of a class to the buckets that hold them
pub struct Locator {
    db: Arc<Database>,
    topologies: TopologyManager,
}

impl Locator {
    /// Create a locator over a database
    pub fn new(db: Arc<Database>) -> Self {
        let topologies = TopologyManager::new(db.clone());
        Self { db, topologies }
    }

    /// Resolve the bucket set for a record of `class`
    ///
    /// `writable` restricts to primaries (with fallback when none exist);
    /// `multiple = false` asserts a single bucket survives filtering.
    /// Every returned bucket is storage-assigned and schema-synced.
    pub fn get_buckets(
        &self,
        class: &str,
        data: &Tuple,
        writable: bool,
        multiple: bool,
    ) -> Result<Vec<Bucket>> {
        let name = self.db.schema().resolve_segment_name(class);

        // The catalog's own bucket is reserved; resolving it through the
        // buckets table would never terminate
        if name == SHARDING_SEGMENT {
            return Ok(vec![Bucket::bootstrap().clone()]);
        }

        // Bucket rows are read from the catalog storage directly
        let rows = self
            .db
            .driver()
            .find(BUCKET_TABLE, &fields([("name", Value::from(name.as_str()))]))?;
        let mut buckets = Vec::with_capacity(rows.len());
        for row in &rows {
            buckets.push(Bucket::from_tuple(row)?);
        }

        let topology = self.topologies.get_topology(class)?;
        if let Some(t) = &topology {
            if t.status == TopologyStatus::Ready {
                buckets.retain(|b| b.version == t.version);
            }
        }

        if buckets.is_empty() {
            let default = Topology::default_for(&name);
            buckets = self.generate_buckets(topology.as_ref().unwrap_or(&default))?;
        }

        // Writable requests take primaries, reads prefer replicas; an
        // empty partition falls back to every surviving bucket
        let (primaries, replicas): (Vec<Bucket>, Vec<Bucket>) =
            buckets.into_iter().partition(Bucket::is_primary);
        let mut picked = match (writable, primaries.is_empty(), replicas.is_empty()) {
            (true, false, _) => primaries,
            (true, true, _) => replicas,
            (false, _, false) => replicas,
            (false, _, true) => primaries,
        };

        if let Some(t) = &topology {
            if picked.len() > 1 {
                if let Some(shard) = self.shard_key(t, class, data) {
                    picked.retain(|b| b.shard == shard);
                }
            }
        }

        if !multiple && picked.len() > 1 {
            return Err(ShardError::AmbiguousRouting {
                class: class.to_string(),
                count: picked.len(),
            });
        }

        for bucket in picked.iter_mut() {
            assign_storage(&self.db, bucket, class)?;
        }

        debug!("routed '{class}' to {} bucket(s) of '{name}'", picked.len());
        Ok(picked)
    }

    /// Materialize every cell of a topology, idempotently
    pub fn generate_buckets(&self, topology: &Topology) -> Result<Vec<Bucket>> {
        let mut buckets = Vec::with_capacity(topology.cells() as usize);
        for shard in 0..topology.shards {
            for replica in 0..=topology.replicas {
                let cell = Bucket {
                    id: 0,
                    name: topology.name.clone(),
                    version: topology.version,
                    shard,
                    replica,
                    storage: 0,
                };
                let row = self.db.driver().find_or_create(
                    BUCKET_TABLE,
                    &cell.cell_query(),
                    cell.to_tuple(),
                )?;
                buckets.push(Bucket::from_tuple(&row)?);
            }
        }
        Ok(buckets)
    }

    /// Shard index for a record, or `None` when it carries no key
    ///
    /// Integer-looking keys route by value; anything else routes by the
    /// CRC-32 of its string form.
    fn shard_key(&self, topology: &Topology, class: &str, data: &Tuple) -> Option<i64> {
        let key = match self.db.schema().class_model(class) {
            Some(model) => model.get_key(data),
            None => data.get("id").cloned(),
        }?;
        let numeric = match &key {
            Value::Int(i) => *i,
            other => {
                let s = other.to_string_value();
                match s.parse::<i64>() {
                    Ok(i) if i.to_string() == s => i,
                    _ => i64::from(crc32fast::hash(s.as_bytes())),
                }
            }
        };
        Some(numeric.rem_euclid(topology.shards.max(1)))
    }
}

// ============================================================================
// Tests
// ============================================================================
