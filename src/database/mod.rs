//! Database facade
//!
//! The hub every routing component hangs off: the bootstrap driver
//! holding the catalog tables, the pool of physical storage drivers, the
//! schema registry, and the optional Configure job dispatched when a new
//! sharded segment is first accessed.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;
use parking_lot::RwLock;

use crate::data::{Tuple, Value};
use crate::driver::StorageDriver;
use crate::routing::{ConfigureJob, Locator, TopologyManager};
use crate::schema::{SchemaRegistry, SHARDING_SEGMENT, STORAGE_TABLE};
use crate::{Result, ShardError};

/// Storage id of the catalog (bootstrap) driver
///
/// Generated storage ids start at 1; the reserved bootstrap bucket points
/// here.
pub const CATALOG_STORAGE: i64 = 0;

/// Owner of the catalog driver, the storage pool, and the schema
pub struct Database {
    driver: Arc<dyn StorageDriver>,
    storages: RwLock<BTreeMap<i64, Arc<dyn StorageDriver>>>,
    schema: SchemaRegistry,
    configure: Option<Arc<dyn ConfigureJob>>,
}

impl Database {
    /// Create a database over a bootstrap driver
    ///
    /// The built-in catalog segment is synced onto the driver so the
    /// bucket, topology and storage tables exist before first routing.
    pub fn new(driver: Arc<dyn StorageDriver>, schema: SchemaRegistry) -> Result<Self> {
        driver.sync_schema(&schema, SHARDING_SEGMENT)?;
        Ok(Self {
            driver,
            storages: RwLock::new(BTreeMap::new()),
            schema,
            configure: None,
        })
    }

    /// Install the Configure job dispatched for unprovisioned segments
    pub fn with_configure(mut self, job: Arc<dyn ConfigureJob>) -> Self {
        self.configure = Some(job);
        self
    }

    /// The bootstrap driver holding the catalog tables
    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    /// The schema registry
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// The installed Configure job, if any
    pub fn configure_job(&self) -> Option<Arc<dyn ConfigureJob>> {
        self.configure.clone()
    }

    /// Register a physical storage: persists its catalog row and makes
    /// the driver addressable by the returned id
    pub fn add_storage(&self, driver: Arc<dyn StorageDriver>) -> Result<i64> {
        let row = self.driver.create(STORAGE_TABLE, Tuple::new())?;
        let id = row
            .get("id")
            .and_then(Value::as_int)
            .ok_or_else(|| ShardError::InvalidRow("storage row has no id".to_string()))?;
        self.storages.write().insert(id, driver);
        info!("registered storage {id}");
        Ok(id)
    }

    /// Resolve a storage id to its driver
    pub fn storage_driver(&self, id: i64) -> Result<Arc<dyn StorageDriver>> {
        if id == CATALOG_STORAGE {
            return Ok(self.driver.clone());
        }
        self.storages
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ShardError::NotFound(format!("storage {id}")))
    }

    /// A locator over this database
    pub fn locator(self: &Arc<Self>) -> Locator {
        Locator::new(self.clone())
    }

    /// A topology manager over this database
    pub fn topologies(self: &Arc<Self>) -> TopologyManager {
        TopologyManager::new(self.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
