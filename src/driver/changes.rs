//! Change-log records
//!
//! One [`Change`] row is persisted per (mutation, listener) pair, inside
//! the mutation's own transaction, and survives until acknowledged. The
//! two bookkeeping tables are created lazily on first subscription; their
//! absence is equivalent to "no listeners anywhere".

use serde::{Deserialize, Serialize};

use crate::data::{fields, Tuple, Value};
use crate::{Result, ShardError};

/// Per-storage table of pending change rows
pub const CHANGE_TABLE: &str = "sharding_change";
/// Per-storage table of listener subscriptions
pub const SUBSCRIPTION_TABLE: &str = "sharding_subscription";
/// Subscription table name matching every table on the storage
pub const WILDCARD_TABLE: &str = "*";

// ============================================================================
// Change Action
// ============================================================================

/// The mutation kind a change row records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    /// Persisted string form
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }

    /// Parse the persisted string form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            other => Err(ShardError::InvalidRow(format!(
                "unknown change action '{other}'"
            ))),
        }
    }
}

// ============================================================================
// Change
// ============================================================================

/// One persisted mutation record for one listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Per-storage monotonic sequence number
    pub seq: i64,
    /// Subscriber this row belongs to
    pub listener: String,
    /// Mutated table
    pub table: String,
    /// Mutation kind
    pub action: ChangeAction,
    /// Post-image of the row (pre-image for deletes)
    pub tuple: Tuple,
    /// Caller-supplied context current when the mutation ran
    pub context: Tuple,
}

impl Change {
    /// Decode a change from its persisted row
    pub fn from_tuple(row: &Tuple) -> Result<Self> {
        let get = |name: &str| {
            row.get(name)
                .ok_or_else(|| ShardError::InvalidRow(format!("change row missing '{name}'")))
        };
        let action = ChangeAction::parse(get("action")?.as_str().unwrap_or_default())?;
        Ok(Self {
            seq: get("seq")?.as_int().unwrap_or_default(),
            listener: get("listener")?.to_string_value(),
            table: get("table")?.to_string_value(),
            action,
            tuple: get("tuple")?.as_map().cloned().unwrap_or_default(),
            context: get("context")?.as_map().cloned().unwrap_or_default(),
        })
    }

    /// Encode the change as its persisted row
    pub fn to_tuple(&self) -> Tuple {
        fields([
            ("seq", Value::Int(self.seq)),
            ("listener", Value::from(self.listener.as_str())),
            ("table", Value::from(self.table.as_str())),
            ("action", Value::from(self.action.as_str())),
            ("tuple", Value::Map(self.tuple.clone())),
            ("context", Value::Map(self.context.clone())),
        ])
    }
}

// ============================================================================
// Tests
// ============================================================================
