//! Schema registry
//!
//! Maps entity classes to segments, models, tables, properties, and
//! indexes. A *segment* is a named group of models that share a lifecycle
//! and live together in the same bucket(s); routing resolves every class
//! (or raw table name) to a segment first.
//!
//! Per-class capabilities are optional closures on the model: a shard-key
//! extractor, a storage-placement override, and a post-create bootstrap
//! hook. Either the class carries the capability or the default applies.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::data::{DataType, Tuple, Value};
use crate::database::Database;
use crate::driver::StorageDriver;
use crate::routing::Bucket;
use crate::{Result, ShardError};

/// The built-in segment holding the routing catalog itself
pub const SHARDING_SEGMENT: &str = "sharding";
/// Catalog table of bucket rows
pub const BUCKET_TABLE: &str = "bucket";
/// Catalog table of topology rows
pub const TOPOLOGY_TABLE: &str = "topology";
/// Catalog table of storage rows
pub const STORAGE_TABLE: &str = "storage";

/// Shard-key extractor: pull the routing key out of a record
pub type KeyExtractor = Arc<dyn Fn(&Tuple) -> Option<Value> + Send + Sync>;
/// Storage-placement override: pick the storage id for a fresh bucket
pub type StorageCast = Arc<dyn Fn(&Database, &Bucket) -> Result<i64> + Send + Sync>;
/// Bootstrap hook: seed rows after the model's table is first created
pub type BootstrapHook = Arc<dyn Fn(&dyn StorageDriver) -> Result<()> + Send + Sync>;

// ============================================================================
// Type Mapping
// ============================================================================

/// Map a declared property type to its backend-native column type
///
/// Any name outside the mapped set is a fatal schema error.
pub fn type_map(ty: &str) -> Result<DataType> {
    match ty {
        "int" => Ok(DataType::UInt),
        "string" => Ok(DataType::String),
        "array" => Ok(DataType::Variant),
        other => Err(ShardError::InvalidType(other.to_string())),
    }
}

// ============================================================================
// Model Metadata
// ============================================================================

/// Declared property of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Field name
    pub name: String,
    /// Declared type name (`int`, `string`, `array`)
    pub ty: String,
}

/// Declared index of a model
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexDef {
    /// Index name (idempotence key)
    pub name: String,
    /// Indexed fields, in order
    pub fields: Vec<String>,
    /// Whether the index is unique
    pub unique: bool,
}

impl IndexDef {
    /// Create a new index definition
    pub fn new(name: impl Into<String>, fields: &[&str], unique: bool) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique,
        }
    }
}

/// One entity model: a class bound to a table with declared schema
#[derive(Clone)]
pub struct Model {
    class: String,
    table: String,
    sharded: bool,
    properties: Vec<Property>,
    indexes: Vec<IndexDef>,
    key: Option<KeyExtractor>,
    cast: Option<StorageCast>,
    bootstrap: Option<BootstrapHook>,
}

impl Model {
    /// Create a model binding `class` to `table`
    pub fn new(class: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            table: table.into(),
            sharded: false,
            properties: Vec::new(),
            indexes: Vec::new(),
            key: None,
            cast: None,
            bootstrap: None,
        }
    }

    /// Mark the model as sharded (routes through a topology)
    pub fn sharded(mut self, sharded: bool) -> Self {
        self.sharded = sharded;
        self
    }

    /// Declare a property
    pub fn property(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.properties.push(Property {
            name: name.into(),
            ty: ty.into(),
        });
        self
    }

    /// Declare an index
    pub fn index(mut self, name: impl Into<String>, fields: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexDef::new(name, fields, unique));
        self
    }

    /// Install a custom shard-key extractor
    pub fn key_extractor(
        mut self,
        f: impl Fn(&Tuple) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.key = Some(Arc::new(f));
        self
    }

    /// Install a storage-placement override
    pub fn storage_cast(
        mut self,
        f: impl Fn(&Database, &Bucket) -> Result<i64> + Send + Sync + 'static,
    ) -> Self {
        self.cast = Some(Arc::new(f));
        self
    }

    /// Install a bootstrap hook, run once after the table is first created
    pub fn bootstrap_hook(
        mut self,
        f: impl Fn(&dyn StorageDriver) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.bootstrap = Some(Arc::new(f));
        self
    }

    /// Class name
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Backing table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the model routes through a topology
    pub fn is_sharded(&self) -> bool {
        self.sharded
    }

    /// Declared properties
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Declared indexes
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// The storage-placement override, if any
    pub fn storage_cast_fn(&self) -> Option<&StorageCast> {
        self.cast.as_ref()
    }

    /// The bootstrap hook, if any
    pub fn bootstrap_fn(&self) -> Option<&BootstrapHook> {
        self.bootstrap.as_ref()
    }

    /// Extract the shard key from a record
    ///
    /// Uses the class extractor when installed, else the `id` field.
    pub fn get_key(&self, data: &Tuple) -> Option<Value> {
        match &self.key {
            Some(extract) => extract(data),
            None => data.get("id").cloned(),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("class", &self.class)
            .field("table", &self.table)
            .field("sharded", &self.sharded)
            .field("properties", &self.properties)
            .field("indexes", &self.indexes)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Segment
// ============================================================================

/// A named group of models sharing bucket placement
#[derive(Debug, Clone)]
pub struct Segment {
    fullname: String,
    models: Vec<Model>,
}

impl Segment {
    fn new(fullname: &str) -> Self {
        Self {
            fullname: fullname.to_string(),
            models: Vec::new(),
        }
    }

    /// Segment name
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Models in this segment
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Backing tables of every model in this segment
    pub fn tables(&self) -> Vec<&str> {
        self.models.iter().map(Model::table).collect()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of segments and entity classes
///
/// Constructed once, then read-only: register every class before building
/// the [`Database`]. The built-in `sharding` segment (bucket, topology and
/// storage catalog models) is always present.
pub struct SchemaRegistry {
    segments: BTreeMap<String, Segment>,
    classes: BTreeMap<String, String>,
}

impl SchemaRegistry {
    /// Create a registry holding the built-in catalog segment
    pub fn new() -> Self {
        let mut registry = Self {
            segments: BTreeMap::new(),
            classes: BTreeMap::new(),
        };
        for model in sharding_models() {
            registry.register(SHARDING_SEGMENT, model);
        }
        registry
    }

    /// Register a model under a segment, creating the segment if needed
    pub fn register(&mut self, segment: &str, model: Model) {
        self.classes
            .insert(model.class.clone(), segment.to_string());
        self.segments
            .entry(segment.to_string())
            .or_insert_with(|| Segment::new(segment))
            .models
            .push(model);
    }

    /// Whether a segment with this name exists
    pub fn has_segment(&self, name: &str) -> bool {
        self.segments.contains_key(name)
    }

    /// Look up a segment by name
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.get(name)
    }

    /// The model registered for a class, if any
    pub fn class_model(&self, class: &str) -> Option<&Model> {
        let segment = self.segments.get(self.classes.get(class)?)?;
        segment.models.iter().find(|m| m.class == class)
    }

    /// The backing table of a registered class
    pub fn class_table(&self, class: &str) -> Option<&str> {
        self.class_model(class).map(Model::table)
    }

    /// The segment a registered class belongs to
    pub fn class_segment(&self, class: &str) -> Option<&Segment> {
        self.segments.get(self.classes.get(class)?)
    }

    /// Resolve a class or raw table name to its segment name
    ///
    /// Unregistered names split at the first `'.'`, else the first `'_'`;
    /// otherwise the whole string is the segment name.
    pub fn resolve_segment_name(&self, class: &str) -> String {
        if let Some(segment) = self.classes.get(class) {
            return segment.clone();
        }
        if let Some(prefix) = class.split('.').next().filter(|p| p.len() < class.len()) {
            return prefix.to_string();
        }
        if let Some(prefix) = class.split('_').next().filter(|p| p.len() < class.len()) {
            return prefix.to_string();
        }
        class.to_string()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Catalog models with the persisted bucket/topology/storage layouts
fn sharding_models() -> Vec<Model> {
    vec![
        Model::new("Bucket", BUCKET_TABLE)
            .property("id", "int")
            .property("name", "string")
            .property("version", "int")
            .property("shard", "int")
            .property("replica", "int")
            .property("storage", "int")
            .index("bucket_name_version", &["name", "version"], false)
            .index(
                "bucket_cell",
                &["name", "version", "shard", "replica"],
                true,
            ),
        Model::new("Topology", TOPOLOGY_TABLE)
            .property("id", "int")
            .property("name", "string")
            .property("version", "int")
            .property("status", "string")
            .property("shards", "int")
            .property("replicas", "int")
            .index("topology_name_status", &["name", "status"], false),
        Model::new("Storage", STORAGE_TABLE)
            .property("id", "int")
            .index("storage_id", &["id"], true),
    ]
}

// ============================================================================
// Tests
// ============================================================================
