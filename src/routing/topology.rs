//! Topology records and the topology manager
//!
//! A topology is the authoritative sharding plan for one segment at one
//! version: how many shards, how many replicas, and its lifecycle status.
//! Only READY topologies route traffic. The manager is read-mostly;
//! provisioning happens once, on first access of a new sharded segment,
//! by dispatching the external Configure job.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::data::{fields, Tuple, Value};
use crate::database::Database;
use crate::driver::StorageDriver;
use crate::schema::TOPOLOGY_TABLE;
use crate::{Result, ShardError};

// ============================================================================
// Topology Status
// ============================================================================

/// Lifecycle status of a topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyStatus {
    /// Bootstrap in progress; does not route traffic yet
    Creating,
    /// Authoritative layout for its segment
    Ready,
    /// Superseded by a newer version
    Retired,
}

impl TopologyStatus {
    /// Persisted string form
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyStatus::Creating => "creating",
            TopologyStatus::Ready => "ready",
            TopologyStatus::Retired => "retired",
        }
    }

    /// Parse the persisted string form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "creating" => Ok(TopologyStatus::Creating),
            "ready" => Ok(TopologyStatus::Ready),
            "retired" => Ok(TopologyStatus::Retired),
            other => Err(ShardError::InvalidRow(format!(
                "unknown topology status '{other}'"
            ))),
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// The sharding plan for one segment at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Row id
    pub id: i64,
    /// Segment name
    pub name: String,
    /// Plan version
    pub version: i64,
    /// Lifecycle status
    pub status: TopologyStatus,
    /// Shard count, at least 1
    pub shards: i64,
    /// Replica count per shard, 0 or more
    pub replicas: i64,
}

impl Topology {
    /// The implicit single-shard layout used when no topology exists
    pub fn default_for(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            version: 0,
            status: TopologyStatus::Ready,
            shards: 1,
            replicas: 0,
        }
    }

    /// Bucket cells this topology owns: `shards × (replicas + 1)`
    pub fn cells(&self) -> i64 {
        self.shards * (self.replicas + 1)
    }

    /// Decode a topology from its catalog row
    pub fn from_tuple(row: &Tuple) -> Result<Self> {
        let int = |name: &str| {
            row.get(name)
                .and_then(Value::as_int)
                .ok_or_else(|| ShardError::InvalidRow(format!("topology row missing '{name}'")))
        };
        let str_field = |name: &str| {
            row.get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| ShardError::InvalidRow(format!("topology row missing '{name}'")))
        };
        Ok(Self {
            id: int("id")?,
            name: str_field("name")?.to_string(),
            version: int("version")?,
            status: TopologyStatus::parse(str_field("status")?)?,
            shards: int("shards")?,
            replicas: int("replicas")?,
        })
    }

    /// Encode the topology as its catalog row (without the row id)
    pub fn to_tuple(&self) -> Tuple {
        fields([
            ("name", Value::from(self.name.as_str())),
            ("version", Value::Int(self.version)),
            ("status", Value::from(self.status.as_str())),
            ("shards", Value::Int(self.shards)),
            ("replicas", Value::Int(self.replicas)),
        ])
    }
}

// ============================================================================
// Configure Job
// ============================================================================

/// External provisioning job for a segment's first topology
///
/// Dispatched when a sharded class has no topology yet. The job must
/// create the topology's bucket rows before promoting it to READY, and
/// must be idempotent on `(name, version)`: concurrent first access of
/// the same segment may dispatch it more than once.
pub trait ConfigureJob: Send + Sync {
    /// Provision the initial topology for `name`
    fn run(&self, db: &Arc<Database>, name: &str) -> Result<Option<Topology>>;
}

// ============================================================================
// Topology Manager
// ============================================================================

/// Maintains topology records, one set of versions per segment name
pub struct TopologyManager {
    db: Arc<Database>,
}

impl TopologyManager {
    /// Create a manager over a database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The READY topology routing a class, if any
    ///
    /// Unsharded entities never route through a topology.
    pub fn get_topology(&self, class: &str) -> Result<Option<Topology>> {
        self.get_with_status(class, TopologyStatus::Ready)
    }

    /// As [`get_topology`](Self::get_topology), with an explicit status
    pub fn get_with_status(
        &self,
        class: &str,
        status: TopologyStatus,
    ) -> Result<Option<Topology>> {
        let Some(model) = self.db.schema().class_model(class) else {
            return Ok(None);
        };
        if !model.is_sharded() {
            return Ok(None);
        }
        let name = self.db.schema().resolve_segment_name(class);

        let rows = self
            .db
            .driver()
            .find(TOPOLOGY_TABLE, &fields([("name", Value::from(name.as_str()))]))?;
        let mut matching = Vec::new();
        for row in &rows {
            let topology = Topology::from_tuple(row)?;
            if topology.status == status {
                matching.push(topology);
            }
        }
        // Most recent by insertion wins
        if let Some(topology) = matching.into_iter().max_by_key(|t| t.id) {
            return Ok(Some(topology));
        }

        match self.db.configure_job() {
            Some(job) => {
                info!("provisioning topology for segment '{name}'");
                job.run(&self.db, &name)
            }
            None => Ok(None),
        }
    }

    /// Create the next topology version for a segment, in CREATING status
    pub fn create(&self, name: &str, shards: i64, replicas: i64) -> Result<Topology> {
        let rows = self
            .db
            .driver()
            .find(TOPOLOGY_TABLE, &fields([("name", Value::from(name))]))?;
        let mut version = 1;
        for row in &rows {
            version = version.max(Topology::from_tuple(row)?.version + 1);
        }
        let topology = Topology {
            id: 0,
            name: name.to_string(),
            version,
            status: TopologyStatus::Creating,
            shards,
            replicas,
        };
        let stored = self.db.driver().create(TOPOLOGY_TABLE, topology.to_tuple())?;
        Ok(Topology::from_tuple(&stored)?)
    }

    /// Promote a topology to READY, retiring superseded READY versions
    pub fn promote(&self, topology: &Topology) -> Result<Topology> {
        let driver = self.db.driver();
        driver.update(
            TOPOLOGY_TABLE,
            &Value::Int(topology.id),
            fields([("status", Value::from(TopologyStatus::Ready.as_str()))]),
        )?;
        let ready = driver.find(
            TOPOLOGY_TABLE,
            &fields([
                ("name", Value::from(topology.name.as_str())),
                ("status", Value::from(TopologyStatus::Ready.as_str())),
            ]),
        )?;
        for row in &ready {
            let other = Topology::from_tuple(row)?;
            if other.id != topology.id {
                driver.update(
                    TOPOLOGY_TABLE,
                    &Value::Int(other.id),
                    fields([("status", Value::from(TopologyStatus::Retired.as_str()))]),
                )?;
            }
        }
        info!(
            "topology '{}' v{} is ready ({} shards, {} replicas)",
            topology.name, topology.version, topology.shards, topology.replicas
        );
        Ok(Topology {
            status: TopologyStatus::Ready,
            ..topology.clone()
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
