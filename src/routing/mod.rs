//! Sharding and placement framework
//!
//! Maps logical segments to buckets and buckets to physical storages.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Locator                                                 │
//! │  - Resolves (class, record) to the bucket set            │
//! │  - Filters by writable/replica and by shard key          │
//! │  - Generates missing buckets lazily                      │
//! ├──────────────────────────────────────────────────────────┤
//! │  TopologyManager                                         │
//! │  - Versioned sharding plans per segment                  │
//! │  - Dispatches the external Configure job on first access │
//! ├──────────────────────────────────────────────────────────┤
//! │  Storage assignment                                      │
//! │  - Least-used placement, no same-name colocation         │
//! │  - Schema sync + replication listener registration       │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod assign;
pub mod bucket;
pub mod locator;
pub mod topology;

pub use assign::REPLICATION_LISTENER;
pub use bucket::Bucket;
pub use locator::Locator;
pub use topology::{ConfigureJob, Topology, TopologyManager, TopologyStatus};
