//! File-backed storage backend
//!
//! The whole table set is snapshotted to one file after every committed
//! mutation and reloaded on open. Pending change rows and the sequence
//! watermark are part of the snapshot, so changes survive restarts until
//! acknowledged.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use super::changes::Change;
use super::tables::TableSet;
use super::StorageDriver;
use crate::data::{Tuple, Value};
use crate::schema::SchemaRegistry;
use crate::{Result, ShardError};

/// Reference backend persisting all tables to a single file
pub struct FileDriver {
    path: PathBuf,
    tables: Mutex<TableSet>,
    context: RwLock<Tuple>,
}

impl FileDriver {
    /// Open a file-backed backend, loading the snapshot if one exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let bytes = std::fs::read(&path)?;
            bincode::deserialize(&bytes)
                .map_err(|e| ShardError::Serialization(e.to_string()))?
        } else {
            TableSet::default()
        };
        Ok(Self {
            path,
            tables: Mutex::new(tables),
            context: RwLock::new(Tuple::new()),
        })
    }

    fn context(&self) -> Tuple {
        self.context.read().clone()
    }

    fn save(&self, tables: &TableSet) -> Result<()> {
        let bytes =
            bincode::serialize(tables).map_err(|e| ShardError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl StorageDriver for FileDriver {
    fn create(&self, table: &str, data: Tuple) -> Result<Tuple> {
        let ctx = self.context();
        let mut tables = self.tables.lock();
        let row = tables.create(table, data, &ctx)?;
        self.save(&tables)?;
        Ok(row)
    }

    fn update(&self, table: &str, id: &Value, data: Tuple) -> Result<Option<Tuple>> {
        let ctx = self.context();
        let mut tables = self.tables.lock();
        let post = tables.update(table, id, data, &ctx)?;
        if post.is_some() {
            self.save(&tables)?;
        }
        Ok(post)
    }

    fn delete(&self, table: &str, id: &Value) -> Result<Option<Tuple>> {
        let ctx = self.context();
        let mut tables = self.tables.lock();
        let pre = tables.delete(table, id, &ctx)?;
        if pre.is_some() {
            self.save(&tables)?;
        }
        Ok(pre)
    }

    fn find(&self, table: &str, query: &Tuple) -> Result<Vec<Tuple>> {
        Ok(self.tables.lock().find(table, query))
    }

    fn find_or_create(&self, table: &str, query: &Tuple, data: Tuple) -> Result<Tuple> {
        let ctx = self.context();
        let mut tables = self.tables.lock();
        let row = tables.find_or_create(table, query, data, &ctx)?;
        self.save(&tables)?;
        Ok(row)
    }

    fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self.tables.lock().has_table(table))
    }

    fn sync_schema(&self, schema: &SchemaRegistry, segment: &str) -> Result<()> {
        let created = {
            let mut tables = self.tables.lock();
            let created = tables.sync_segment(schema, segment)?;
            self.save(&tables)?;
            created
        };
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
        true
    }

    fn register_changes(&self, table: &str, listener: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.register(table, listener)?;
        self.save(&tables)
    }

    fn unregister_changes(&self, table: &str, listener: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.unregister(table, listener);
        self.save(&tables)
    }

    fn get_changes(&self, listener: &str, limit: usize) -> Result<Vec<Change>> {
        self.tables.lock().changes(listener, limit)
    }

    fn ack_changes(&self, changes: &[Change]) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.ack(changes);
        self.save(&tables)
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

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.bin");

        {
            let driver = FileDriver::open(&path).unwrap();
            driver
                .create("orders", fields([("id", Value::Int(1)), ("sum", Value::Int(10))]))
                .unwrap();
        }

        let driver = FileDriver::open(&path).unwrap();
        assert!(driver.has_table("orders").unwrap());
        let rows = driver.find("orders", &fields([("id", Value::Int(1))])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("sum"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_changes_survive_restart_until_ack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.bin");

        {
            let driver = FileDriver::open(&path).unwrap();
            driver.register_changes("orders", "repl").unwrap();
            driver.create("orders", fields([("id", Value::Int(1))])).unwrap();
        }

        let driver = FileDriver::open(&path).unwrap();
        let changes = driver.get_changes("repl", 10).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].seq, 1);
        driver.ack_changes(&changes).unwrap();
        drop(driver);

        let driver = FileDriver::open(&path).unwrap();
        assert!(driver.get_changes("repl", 10).unwrap().is_empty());
        // The sequence watermark also survived: the next emission does
        // not reuse an acked sequence number
        driver.create("orders", fields([("id", Value::Int(2))])).unwrap();
        assert_eq!(driver.get_changes("repl", 10).unwrap()[0].seq, 2);
    }

    #[test]
    fn test_missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileDriver::open(dir.path().join("fresh.bin")).unwrap();
        assert!(!driver.has_table("orders").unwrap());
        assert_eq!(driver.get_usage().unwrap(), 0);
    }
}
