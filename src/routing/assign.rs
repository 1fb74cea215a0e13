//! Storage assignment
//!
//! Binds a fresh bucket to a physical storage: least-used placement among
//! the storages not already hosting a sibling bucket of the same name,
//! persisted exactly once. Assignment also keeps the target storage's
//! schema in sync and registers the replication listener on replicated
//! primaries.

use log::{debug, info};

use super::bucket::Bucket;
use super::topology::{Topology, TopologyStatus};
use crate::data::{fields, Tuple, Value};
use crate::database::Database;
use crate::driver::StorageDriver;
use crate::schema::{BUCKET_TABLE, STORAGE_TABLE, TOPOLOGY_TABLE};
use crate::{Result, ShardError};

/// Listener name registered for replication drainers
pub const REPLICATION_LISTENER: &str = "replication";

/// Ensure a bucket is bound to a storage and the storage is usable
///
/// Placement happens only while `bucket.storage == 0`; a bucket is never
/// reassigned. Schema sync and listener registration are idempotent and
/// run on every call.
pub fn assign_storage(db: &Database, bucket: &mut Bucket, class: &str) -> Result<()> {
    if !bucket.is_assigned() {
        let storage = match db.schema().class_model(class).and_then(|m| m.storage_cast_fn()) {
            Some(cast) => cast(db, bucket)?,
            None => cast_storage(db, bucket)?,
        };
        db.driver().update(
            BUCKET_TABLE,
            &Value::Int(bucket.id),
            fields([("storage", Value::Int(storage))]),
        )?;
        bucket.storage = storage;
        info!(
            "assigned bucket '{}' v{} shard {} replica {} to storage {}",
            bucket.name, bucket.version, bucket.shard, bucket.replica, storage
        );
    }

    let driver = db.storage_driver(bucket.storage)?;

    if db.schema().has_segment(&bucket.name) {
        driver.sync_schema(db.schema(), &bucket.name)?;
    }

    // Replicated primaries feed the replication drain
    if bucket.version > 0 && bucket.is_primary() {
        if let Some(topology) = topology_of(db, bucket)? {
            if topology.replicas > 0 && topology.status == TopologyStatus::Ready {
                if let Some(segment) = db.schema().segment(&bucket.name) {
                    for table in segment.tables() {
                        driver.register_changes(table, REPLICATION_LISTENER)?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Default placement: least-used storage without a same-name bucket
fn cast_storage(db: &Database, bucket: &Bucket) -> Result<i64> {
    let storages = db.driver().find(STORAGE_TABLE, &Tuple::new())?;

    // A storage hosts at most one bucket per logical name
    let siblings = db.driver().find(
        BUCKET_TABLE,
        &fields([("name", Value::from(bucket.name.as_str()))]),
    )?;
    let occupied: Vec<i64> = siblings
        .iter()
        .filter_map(|row| row.get("storage").and_then(Value::as_int))
        .filter(|id| *id != 0)
        .collect();

    let mut best: Option<(i64, u64)> = None;
    for row in &storages {
        let Some(id) = row.get("id").and_then(Value::as_int) else {
            continue;
        };
        if occupied.contains(&id) {
            debug!(
                "storage {id} already hosts a bucket of '{}', skipping",
                bucket.name
            );
            continue;
        }
        let usage = db.storage_driver(id)?.get_usage()?;
        // Ties break toward the first candidate encountered
        if best.map_or(true, |(_, min)| usage < min) {
            best = Some((id, usage));
        }
    }

    best.map(|(id, _)| id)
        .ok_or_else(|| ShardError::NoAvailableStorage(bucket.name.clone()))
}

/// The topology matching a bucket's `(name, version)`, if recorded
fn topology_of(db: &Database, bucket: &Bucket) -> Result<Option<Topology>> {
    let rows = db.driver().find(
        TOPOLOGY_TABLE,
        &fields([
            ("name", Value::from(bucket.name.as_str())),
            ("version", Value::Int(bucket.version)),
        ]),
    )?;
    match rows.first() {
        Some(row) => Ok(Some(Topology::from_tuple(row)?)),
        None => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::schema::{Model, SchemaRegistry};
    use std::sync::Arc;

    fn order_schema() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema.register(
            "orders",
            Model::new("Order", "orders")
                .property("id", "int")
                .property("sum", "int"),
        );
        schema
    }

    fn db_with_storages(count: usize) -> (Arc<Database>, Vec<i64>) {
        let db = Arc::new(Database::new(Arc::new(MemoryDriver::new()), order_schema()).unwrap());
        let ids = (0..count)
            .map(|_| db.add_storage(Arc::new(MemoryDriver::new())).unwrap())
            .collect();
        (db, ids)
    }

    fn fresh_bucket(db: &Database, name: &str, shard: i64) -> Bucket {
        let row = db
            .driver()
            .create(
                BUCKET_TABLE,
                fields([
                    ("name", Value::from(name)),
                    ("version", Value::Int(0)),
                    ("shard", Value::Int(shard)),
                    ("replica", Value::Int(0)),
                    ("storage", Value::Int(0)),
                ]),
            )
            .unwrap();
        Bucket::from_tuple(&row).unwrap()
    }

    #[test]
    fn test_least_used_placement() {
        let (db, ids) = db_with_storages(2);
        // Load the first storage so the second is least-used
        let busy = db.storage_driver(ids[0]).unwrap();
        busy.create("noise", fields([("id", Value::Int(1))])).unwrap();

        let mut bucket = fresh_bucket(&db, "orders", 0);
        assign_storage(&db, &mut bucket, "Order").unwrap();
        assert_eq!(bucket.storage, ids[1]);

        // The persisted row agrees with the in-memory bucket
        let row = db
            .driver()
            .find_or_fail(BUCKET_TABLE, &fields([("id", Value::Int(bucket.id))]))
            .unwrap();
        assert_eq!(row.get("storage"), Some(&Value::Int(ids[1])));
    }

    #[test]
    fn test_no_same_name_colocation() {
        let (db, ids) = db_with_storages(2);
        let mut first = fresh_bucket(&db, "orders", 0);
        let mut second = fresh_bucket(&db, "orders", 1);
        assign_storage(&db, &mut first, "Order").unwrap();
        assign_storage(&db, &mut second, "Order").unwrap();
        assert_ne!(first.storage, second.storage);
        assert!(ids.contains(&first.storage));
        assert!(ids.contains(&second.storage));
    }

    #[test]
    fn test_exhaustion_fails() {
        let (db, _ids) = db_with_storages(2);
        let mut a = fresh_bucket(&db, "orders", 0);
        let mut b = fresh_bucket(&db, "orders", 1);
        let mut c = fresh_bucket(&db, "orders", 2);
        assign_storage(&db, &mut a, "Order").unwrap();
        assign_storage(&db, &mut b, "Order").unwrap();
        assert!(matches!(
            assign_storage(&db, &mut c, "Order"),
            Err(ShardError::NoAvailableStorage(_))
        ));
    }

    #[test]
    fn test_assignment_is_one_shot() {
        let (db, ids) = db_with_storages(2);
        let mut bucket = fresh_bucket(&db, "orders", 0);
        assign_storage(&db, &mut bucket, "Order").unwrap();
        let first = bucket.storage;

        // Tilt usage against the assigned storage; a second call must not move
        let busy = db.storage_driver(first).unwrap();
        for i in 0..5 {
            busy.create("noise", fields([("id", Value::Int(i))])).unwrap();
        }
        assign_storage(&db, &mut bucket, "Order").unwrap();
        assert_eq!(bucket.storage, first);
        assert!(ids.contains(&first));
    }

    #[test]
    fn test_schema_synced_on_assignment() {
        let (db, _ids) = db_with_storages(1);
        let mut bucket = fresh_bucket(&db, "orders", 0);
        assign_storage(&db, &mut bucket, "Order").unwrap();
        let driver = db.storage_driver(bucket.storage).unwrap();
        assert!(driver.has_table("orders").unwrap());
    }

    #[test]
    fn test_storage_cast_override() {
        let mut schema = SchemaRegistry::new();
        schema.register(
            "orders",
            Model::new("Order", "orders").storage_cast(|_db, _bucket| Ok(2)),
        );
        let db = Arc::new(Database::new(Arc::new(MemoryDriver::new()), schema).unwrap());
        db.add_storage(Arc::new(MemoryDriver::new())).unwrap();
        db.add_storage(Arc::new(MemoryDriver::new())).unwrap();

        let mut bucket = fresh_bucket(&db, "orders", 0);
        assign_storage(&db, &mut bucket, "Order").unwrap();
        assert_eq!(bucket.storage, 2);
    }

    #[test]
    fn test_replication_listener_on_replicated_primary() {
        let (db, _ids) = db_with_storages(2);
        // READY topology with replicas for version 1
        db.driver()
            .create(
                TOPOLOGY_TABLE,
                fields([
                    ("name", Value::from("orders")),
                    ("version", Value::Int(1)),
                    ("status", Value::from("ready")),
                    ("shards", Value::Int(1)),
                    ("replicas", Value::Int(1)),
                ]),
            )
            .unwrap();

        let row = db
            .driver()
            .create(
                BUCKET_TABLE,
                fields([
                    ("name", Value::from("orders")),
                    ("version", Value::Int(1)),
                    ("shard", Value::Int(0)),
                    ("replica", Value::Int(0)),
                    ("storage", Value::Int(0)),
                ]),
            )
            .unwrap();
        let mut primary = Bucket::from_tuple(&row).unwrap();
        assign_storage(&db, &mut primary, "Order").unwrap();

        // Writes on the assigned storage now feed the replication drain
        let driver = db.storage_driver(primary.storage).unwrap();
        driver.create("orders", fields([("id", Value::Int(1))])).unwrap();
        let changes = driver.get_changes(REPLICATION_LISTENER, 10).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].table, "orders");
    }

    #[test]
    fn test_no_storage_registered() {
        let db = Arc::new(Database::new(Arc::new(MemoryDriver::new()), order_schema()).unwrap());
        let mut bucket = fresh_bucket(&db, "orders", 0);
        assert!(matches!(
            assign_storage(&db, &mut bucket, "Order"),
            Err(ShardError::NoAvailableStorage(_))
        ));
    }
}
