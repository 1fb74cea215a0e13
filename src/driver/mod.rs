//! Storage driver contract
//!
//! Every physical backend is addressed through one [`StorageDriver`]: a
//! uniform CRUD surface plus schema synchronization, a utilization metric,
//! and optional change-data-capture. Backends differ in whether they can
//! host transactional change emission; the CDC operations therefore ship
//! with default bodies implementing the plain-backend behavior (reject
//! registration, drain nothing), and CDC-capable backends override them.
//!
//! Reference backends:
//! - [`MemoryDriver`]: tables in process memory; the state lock is the
//!   backend transaction.
//! - [`FileDriver`]: the same engine snapshotted to a single file, so
//!   pending change rows survive restarts until acked.

pub mod changes;
pub mod file;
pub mod memory;
mod tables;

pub use changes::{Change, ChangeAction, CHANGE_TABLE, SUBSCRIPTION_TABLE, WILDCARD_TABLE};
pub use file::FileDriver;
pub use memory::MemoryDriver;

use crate::data::{Tuple, Value};
use crate::schema::SchemaRegistry;
use crate::{Result, ShardError};

/// Uniform adapter over one physical storage backend
///
/// Every call is a potentially blocking I/O operation. Mutating
/// operations consult the change log: with no listeners registered for
/// the target table they execute natively (fast path); with listeners
/// they apply the mutation and append one change row per listener inside
/// the same backend transaction.
pub trait StorageDriver: Send + Sync {
    /// Insert one row; returns the stored form (with generated keys)
    fn create(&self, table: &str, data: Tuple) -> Result<Tuple>;

    /// Set the provided fields on the row keyed by `id`
    ///
    /// Returns the post-image, or `None` if the row is absent.
    fn update(&self, table: &str, id: &Value, data: Tuple) -> Result<Option<Tuple>>;

    /// Remove by id (or by compound key when `id` is a map)
    ///
    /// Returns the pre-image, or `None` if the row is absent.
    fn delete(&self, table: &str, id: &Value) -> Result<Option<Tuple>>;

    /// Full match on every query field (all-equal AND)
    fn find(&self, table: &str, query: &Tuple) -> Result<Vec<Tuple>>;

    /// As [`find`](Self::find), first match or none
    fn find_one(&self, table: &str, query: &Tuple) -> Result<Option<Tuple>> {
        Ok(self.find(table, query)?.into_iter().next())
    }

    /// As [`find_one`](Self::find_one), failing when nothing matches
    fn find_or_fail(&self, table: &str, query: &Tuple) -> Result<Tuple> {
        self.find_one(table, query)?.ok_or_else(|| {
            ShardError::NotFound(format!("no row in '{table}' matches the query"))
        })
    }

    /// Atomically return the existing match or insert `data`
    ///
    /// A change row is emitted only when the insert occurred.
    fn find_or_create(&self, table: &str, query: &Tuple, data: Tuple) -> Result<Tuple>;

    /// Whether the table exists on this backend
    fn has_table(&self, table: &str) -> Result<bool>;

    /// Idempotently materialize every model of `segment` on this backend
    fn sync_schema(&self, schema: &SchemaRegistry, segment: &str) -> Result<()>;

    /// Opaque utilization metric; only `min` across storages matters
    fn get_usage(&self) -> Result<u64>;

    /// Whether this backend can host transactional change emission
    fn supports_changes(&self) -> bool {
        false
    }

    /// Subscribe `listener` to changes on `table` (`"*"` for all tables)
    fn register_changes(&self, _table: &str, _listener: &str) -> Result<()> {
        Err(ShardError::ChangesUnsupported)
    }

    /// Remove a subscription created by [`register_changes`](Self::register_changes)
    fn unregister_changes(&self, _table: &str, _listener: &str) -> Result<()> {
        Err(ShardError::ChangesUnsupported)
    }

    /// Drain up to `limit` pending changes for `listener`
    ///
    /// Empty when the CDC tables do not exist on this backend.
    fn get_changes(&self, _listener: &str, _limit: usize) -> Result<Vec<Change>> {
        Ok(Vec::new())
    }

    /// Delete the supplied change rows
    fn ack_changes(&self, _changes: &[Change]) -> Result<()> {
        Ok(())
    }

    /// Set the process-local context attached to subsequent emissions
    fn set_context(&self, _context: Tuple) {}
}
