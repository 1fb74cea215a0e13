//! In-memory storage backend
//!
//! Tables live in process memory behind one mutex; holding the mutex
//! across a mutation and its change emission is the backend transaction.
//! `MemoryDriver::without_changes()` builds the plain variant that rejects
//! listener registration and always mutates via the fast path.

use parking_lot::{Mutex, RwLock};

use super::changes::Change;
use super::tables::TableSet;
use super::StorageDriver;
use crate::data::{Tuple, Value};
use crate::schema::SchemaRegistry;
use crate::{Result, ShardError};

/// Reference backend holding all tables in memory
pub struct MemoryDriver {
    tables: Mutex<TableSet>,
    context: RwLock<Tuple>,
    changes: bool,
}

impl MemoryDriver {
    /// Create a CDC-capable in-memory backend
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(TableSet::default()),
            context: RwLock::new(Tuple::new()),
            changes: true,
        }
    }

    /// Create the plain variant: no transactional change emission
    pub fn without_changes() -> Self {
        Self {
            changes: false,
            ..Self::new()
        }
    }

    fn context(&self) -> Tuple {
        self.context.read().clone()
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageDriver for MemoryDriver {
    fn create(&self, table: &str, data: Tuple) -> Result<Tuple> {
        let ctx = self.context();
        self.tables.lock().create(table, data, &ctx)
    }

    fn update(&self, table: &str, id: &Value, data: Tuple) -> Result<Option<Tuple>> {
        let ctx = self.context();
        self.tables.lock().update(table, id, data, &ctx)
    }

    fn delete(&self, table: &str, id: &Value) -> Result<Option<Tuple>> {
        let ctx = self.context();
        self.tables.lock().delete(table, id, &ctx)
    }

    fn find(&self, table: &str, query: &Tuple) -> Result<Vec<Tuple>> {
        Ok(self.tables.lock().find(table, query))
    }

    fn find_or_create(&self, table: &str, query: &Tuple, data: Tuple) -> Result<Tuple> {
        let ctx = self.context();
        self.tables.lock().find_or_create(table, query, data, &ctx)
    }

    fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self.tables.lock().has_table(table))
    }

    fn sync_schema(&self, schema: &SchemaRegistry, segment: &str) -> Result<()> {
        let created = self.tables.lock().sync_segment(schema, segment)?;
        // Bootstrap hooks call back into the driver, so the lock is
        // released before they run
        for class in created {
            if let Some(hook) = schema.class_model(&class).and_then(|m| m.bootstrap_fn()) {
                hook(self)?;
            }
        }
        Ok(())
    }

    fn get_usage(&self) -> Result<u64> {
        Ok(self.tables.lock().usage())
    }

    fn supports_changes(&self) -> bool {
        self.changes
    }

    fn register_changes(&self, table: &str, listener: &str) -> Result<()> {
        if !self.changes {
            return Err(ShardError::ChangesUnsupported);
        }
        self.tables.lock().register(table, listener)
    }

    fn unregister_changes(&self, table: &str, listener: &str) -> Result<()> {
        if !self.changes {
            return Err(ShardError::ChangesUnsupported);
        }
        self.tables.lock().unregister(table, listener);
        Ok(())
    }

    fn get_changes(&self, listener: &str, limit: usize) -> Result<Vec<Change>> {
        self.tables.lock().changes(listener, limit)
    }

    fn ack_changes(&self, changes: &[Change]) -> Result<()> {
        self.tables.lock().ack(changes);
        Ok(())
    }

    fn set_context(&self, context: Tuple) {
        *self.context.write() = context;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fields;
    use crate::driver::ChangeAction;

    #[test]
    fn test_cdc_round_trip() {
        let driver = MemoryDriver::new();
        driver.register_changes("orders", "repl").unwrap();

        driver
            .create("orders", fields([("id", Value::Int(1)), ("sum", Value::Int(10))]))
            .unwrap();
        let changes = driver.get_changes("repl", 10).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].seq, 1);
        assert_eq!(changes[0].listener, "repl");
        assert_eq!(changes[0].table, "orders");
        assert_eq!(changes[0].action, ChangeAction::Create);
        assert_eq!(
            changes[0].tuple,
            fields([("id", Value::Int(1)), ("sum", Value::Int(10))])
        );
        assert!(changes[0].context.is_empty());

        driver.set_context(fields([("trace", Value::from("x"))]));
        driver
            .update("orders", &Value::Int(1), fields([("sum", Value::Int(20))]))
            .unwrap()
            .unwrap();
        let changes = driver.get_changes("repl", 10).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].seq, 2);
        assert_eq!(changes[1].action, ChangeAction::Update);
        assert_eq!(changes[1].tuple.get("sum"), Some(&Value::Int(20)));
        assert_eq!(changes[1].context, fields([("trace", Value::from("x"))]));

        driver.ack_changes(&changes).unwrap();
        assert!(driver.get_changes("repl", usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_delete_emits_pre_image() {
        let driver = MemoryDriver::new();
        driver.register_changes("orders", "repl").unwrap();
        driver
            .create("orders", fields([("id", Value::Int(1)), ("sum", Value::Int(10))]))
            .unwrap();
        driver.delete("orders", &Value::Int(1)).unwrap().unwrap();

        let changes = driver.get_changes("repl", 10).unwrap();
        assert_eq!(changes[1].action, ChangeAction::Delete);
        assert_eq!(changes[1].tuple.get("sum"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_find_or_create_suppression() {
        let driver = MemoryDriver::new();
        driver.register_changes("orders", "repl").unwrap();

        let query = fields([("id", Value::Int(1))]);
        driver
            .find_or_create("orders", &query, fields([("id", Value::Int(1))]))
            .unwrap();
        assert_eq!(driver.get_changes("repl", 10).unwrap().len(), 1);

        // A hit commits without emitting
        driver
            .find_or_create("orders", &query, fields([("id", Value::Int(1))]))
            .unwrap();
        assert_eq!(driver.get_changes("repl", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_one_change_row_per_listener() {
        let driver = MemoryDriver::new();
        driver.register_changes("orders", "repl").unwrap();
        driver.register_changes("orders", "audit").unwrap();
        driver.create("orders", fields([("id", Value::Int(1))])).unwrap();

        let repl = driver.get_changes("repl", 10).unwrap();
        let audit = driver.get_changes("audit", 10).unwrap();
        assert_eq!(repl.len(), 1);
        assert_eq!(audit.len(), 1);
        // Each listener's row carries its own sequence number
        assert_ne!(repl[0].seq, audit[0].seq);
    }

    #[test]
    fn test_seq_strictly_increasing() {
        let driver = MemoryDriver::new();
        driver.register_changes("orders", "repl").unwrap();
        for i in 0..5 {
            driver.create("orders", fields([("id", Value::Int(i))])).unwrap();
        }
        let seqs: Vec<i64> = driver
            .get_changes("repl", usize::MAX)
            .unwrap()
            .iter()
            .map(|c| c.seq)
            .collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_plain_variant_rejects_registration() {
        let driver = MemoryDriver::without_changes();
        assert!(!driver.supports_changes());
        assert!(matches!(
            driver.register_changes("orders", "repl"),
            Err(ShardError::ChangesUnsupported)
        ));
        // Mutations still work, via the fast path
        driver.create("orders", fields([("id", Value::Int(1))])).unwrap();
        assert!(driver.get_changes("repl", 10).unwrap().is_empty());
    }

    #[test]
    fn test_unregister_stops_emission() {
        let driver = MemoryDriver::new();
        driver.register_changes("orders", "repl").unwrap();
        driver.create("orders", fields([("id", Value::Int(1))])).unwrap();
        driver.unregister_changes("orders", "repl").unwrap();
        driver.create("orders", fields([("id", Value::Int(2))])).unwrap();
        assert_eq!(driver.get_changes("repl", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_find_or_fail() {
        let driver = MemoryDriver::new();
        assert!(matches!(
            driver.find_or_fail("orders", &Tuple::new()),
            Err(ShardError::NotFound(_))
        ));
    }

    #[test]
    fn test_sync_schema_runs_bootstrap_once() {
        use crate::schema::{Model, SchemaRegistry};

        let mut schema = SchemaRegistry::new();
        schema.register(
            "rates",
            Model::new("Rate", "rates")
                .property("id", "int")
                .property("code", "string")
                .bootstrap_hook(|driver| {
                    driver.create(
                        "rates",
                        fields([("code", Value::from("default"))]),
                    )?;
                    Ok(())
                }),
        );

        let driver = MemoryDriver::new();
        driver.sync_schema(&schema, "rates").unwrap();
        assert!(driver.has_table("rates").unwrap());
        assert_eq!(driver.find("rates", &Tuple::new()).unwrap().len(), 1);

        // Re-syncing an existing table does not re-run the hook
        driver.sync_schema(&schema, "rates").unwrap();
        assert_eq!(driver.find("rates", &Tuple::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_sync_schema_rejects_unmapped_type() {
        use crate::schema::{Model, SchemaRegistry};

        let mut schema = SchemaRegistry::new();
        schema.register(
            "rates",
            Model::new("Rate", "rates").property("amount", "decimal"),
        );
        let driver = MemoryDriver::new();
        assert!(matches!(
            driver.sync_schema(&schema, "rates"),
            Err(ShardError::InvalidType(_))
        ));
    }
}
