//! Shared table engine for the reference drivers
//!
//! A `TableSet` is the complete mutable state of one backend: its tables,
//! their rows, and the change-log sequence watermark. Both reference
//! drivers guard one `TableSet` with a lock; holding the lock across a
//! mutation and its change emission is what makes the emission
//! transactional on these backends.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::changes::{Change, ChangeAction, CHANGE_TABLE, SUBSCRIPTION_TABLE, WILDCARD_TABLE};
use crate::data::{self, fields, ColumnDef, DataType, Tuple, Value};
use crate::schema::{type_map, IndexDef, SchemaRegistry};
use crate::{Result, ShardError};

// ============================================================================
// Table Data
// ============================================================================

/// One table: declared schema plus rows in insertion order
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct TableData {
    columns: Vec<ColumnDef>,
    indexes: Vec<IndexDef>,
    rows: Vec<Tuple>,
    last_id: i64,
}

impl TableData {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.name == name)
    }

    /// Add columns for any data field not yet declared
    fn infer_columns(&mut self, data: &Tuple) {
        for (name, value) in data {
            if !self.has_column(name) {
                self.columns.push(ColumnDef::new(name, value.data_type()));
            }
        }
    }

    fn allocate_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    /// Keep generated ids ahead of caller-supplied ones
    fn observe_id(&mut self, value: &Value) {
        if let Some(id) = value.as_int() {
            self.last_id = self.last_id.max(id);
        }
    }
}

// ============================================================================
// Table Set
// ============================================================================

/// The full backend state the reference drivers snapshot and share
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct TableSet {
    tables: BTreeMap<String, TableData>,
    seq: i64,
}

fn is_cdc_table(table: &str) -> bool {
    table == CHANGE_TABLE || table == SUBSCRIPTION_TABLE
}

/// Row selector: plain values match the `id` field, maps match all fields
fn row_matches_key(row: &Tuple, id: &Value) -> bool {
    match id {
        Value::Map(key) => data::matches(row, key),
        value => row.get("id") == Some(value),
    }
}

impl TableSet {
    fn table_mut(&mut self, name: &str) -> &mut TableData {
        self.tables.entry(name.to_string()).or_default()
    }

    pub(crate) fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    pub(crate) fn create(&mut self, table: &str, mut data: Tuple, ctx: &Tuple) -> Result<Tuple> {
        {
            let t = self.table_mut(table);
            t.infer_columns(&data);
            if t.has_column("id") {
                match data.get("id").cloned() {
                    Some(id) => t.observe_id(&id),
                    None => {
                        let id = t.allocate_id();
                        data.insert("id".to_string(), Value::Int(id));
                    }
                }
            }
            t.rows.push(data.clone());
        }
        self.emit(table, ChangeAction::Create, &data, ctx);
        Ok(data)
    }

    pub(crate) fn update(
        &mut self,
        table: &str,
        id: &Value,
        data: Tuple,
        ctx: &Tuple,
    ) -> Result<Option<Tuple>> {
        let post = {
            let Some(t) = self.tables.get_mut(table) else {
                return Ok(None);
            };
            let Some(row) = t.rows.iter_mut().find(|r| row_matches_key(r, id)) else {
                return Ok(None);
            };
            for (name, value) in data {
                row.insert(name, value);
            }
            let post = row.clone();
            t.infer_columns(&post);
            post
        };
        self.emit(table, ChangeAction::Update, &post, ctx);
        Ok(Some(post))
    }

    pub(crate) fn delete(&mut self, table: &str, id: &Value, ctx: &Tuple) -> Result<Option<Tuple>> {
        let pre = {
            let Some(t) = self.tables.get_mut(table) else {
                return Ok(None);
            };
            let Some(pos) = t.rows.iter().position(|r| row_matches_key(r, id)) else {
                return Ok(None);
            };
            t.rows.remove(pos)
        };
        self.emit(table, ChangeAction::Delete, &pre, ctx);
        Ok(Some(pre))
    }

    pub(crate) fn find(&self, table: &str, query: &Tuple) -> Vec<Tuple> {
        match self.tables.get(table) {
            Some(t) => t
                .rows
                .iter()
                .filter(|r| data::matches(r, query))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn find_or_create(
        &mut self,
        table: &str,
        query: &Tuple,
        data: Tuple,
        ctx: &Tuple,
    ) -> Result<Tuple> {
        // Emission is suppressed on a hit: only an actual insert records
        if let Some(existing) = self.find(table, query).into_iter().next() {
            return Ok(existing);
        }
        self.create(table, data, ctx)
    }

    /// Rows stored outside the CDC bookkeeping tables
    pub(crate) fn usage(&self) -> u64 {
        self.tables
            .iter()
            .filter(|(name, _)| !is_cdc_table(name))
            .map(|(_, t)| t.rows.len() as u64)
            .sum()
    }

    // ========================================================================
    // Change Log
    // ========================================================================

    fn listeners_for(&self, table: &str) -> Vec<String> {
        let Some(subs) = self.tables.get(SUBSCRIPTION_TABLE) else {
            return Vec::new();
        };
        let mut listeners: Vec<String> = Vec::new();
        for row in &subs.rows {
            let subscribed = row.get("table").and_then(Value::as_str);
            if subscribed == Some(table) || subscribed == Some(WILDCARD_TABLE) {
                if let Some(listener) = row.get("listener").and_then(Value::as_str) {
                    if !listeners.iter().any(|l| l == listener) {
                        listeners.push(listener.to_string());
                    }
                }
            }
        }
        listeners
    }

    /// Append one change row per listener, inside the caller's lock hold
    fn emit(&mut self, table: &str, action: ChangeAction, tuple: &Tuple, ctx: &Tuple) {
        // The bookkeeping tables never emit for themselves
        if is_cdc_table(table) {
            return;
        }
        let listeners = self.listeners_for(table);
        if listeners.is_empty() {
            return; // fast path
        }
        for listener in listeners {
            self.seq += 1;
            let change = Change {
                seq: self.seq,
                listener,
                table: table.to_string(),
                action,
                tuple: tuple.clone(),
                context: ctx.clone(),
            };
            self.table_mut(CHANGE_TABLE).rows.push(change.to_tuple());
        }
    }

    fn ensure_cdc_tables(&mut self) {
        if !self.has_table(SUBSCRIPTION_TABLE) {
            self.tables.insert(
                SUBSCRIPTION_TABLE.to_string(),
                TableData {
                    columns: vec![
                        ColumnDef::new("listener", DataType::String),
                        ColumnDef::new("table", DataType::String),
                    ],
                    indexes: vec![IndexDef::new(
                        "subscription_listener_table",
                        &["listener", "table"],
                        true,
                    )],
                    ..TableData::default()
                },
            );
        }
        if !self.has_table(CHANGE_TABLE) {
            self.tables.insert(
                CHANGE_TABLE.to_string(),
                TableData {
                    columns: vec![
                        ColumnDef::new("seq", DataType::UInt),
                        ColumnDef::new("listener", DataType::String),
                        ColumnDef::new("table", DataType::String),
                        ColumnDef::new("action", DataType::String),
                        ColumnDef::new("tuple", DataType::Variant),
                        ColumnDef::new("context", DataType::Variant),
                    ],
                    indexes: vec![
                        IndexDef::new("change_seq", &["seq"], true),
                        IndexDef::new("change_listener", &["listener"], false),
                    ],
                    ..TableData::default()
                },
            );
        }
    }

    pub(crate) fn register(&mut self, table: &str, listener: &str) -> Result<()> {
        self.ensure_cdc_tables();
        let sub = fields([
            ("listener", Value::from(listener)),
            ("table", Value::from(table)),
        ]);
        if self.find(SUBSCRIPTION_TABLE, &sub).is_empty() {
            self.table_mut(SUBSCRIPTION_TABLE).rows.push(sub);
        }
        Ok(())
    }

    pub(crate) fn unregister(&mut self, table: &str, listener: &str) {
        if let Some(subs) = self.tables.get_mut(SUBSCRIPTION_TABLE) {
            subs.rows.retain(|row| {
                row.get("table").and_then(Value::as_str) != Some(table)
                    || row.get("listener").and_then(Value::as_str) != Some(listener)
            });
        }
    }

    pub(crate) fn changes(&self, listener: &str, limit: usize) -> Result<Vec<Change>> {
        let Some(changes) = self.tables.get(CHANGE_TABLE) else {
            return Ok(Vec::new());
        };
        changes
            .rows
            .iter()
            .filter(|row| row.get("listener").and_then(Value::as_str) == Some(listener))
            .take(limit)
            .map(Change::from_tuple)
            .collect()
    }

    pub(crate) fn ack(&mut self, acked: &[Change]) {
        if let Some(changes) = self.tables.get_mut(CHANGE_TABLE) {
            changes.rows.retain(|row| {
                let seq = row.get("seq").and_then(Value::as_int);
                !acked.iter().any(|c| Some(c.seq) == seq)
            });
        }
    }

    // ========================================================================
    // Schema Sync
    // ========================================================================

    /// Materialize every model of the segment; returns the classes whose
    /// table did not pre-exist (their bootstrap hooks run afterwards,
    /// outside the state lock)
    pub(crate) fn sync_segment(
        &mut self,
        schema: &SchemaRegistry,
        segment: &str,
    ) -> Result<Vec<String>> {
        let seg = schema
            .segment(segment)
            .ok_or_else(|| ShardError::NotFound(format!("segment '{segment}'")))?;
        let mut created = Vec::new();
        for model in seg.models() {
            if !self.has_table(model.table()) {
                self.tables
                    .insert(model.table().to_string(), TableData::default());
                created.push(model.class().to_string());
            }
            let t = self.table_mut(model.table());
            for property in model.properties() {
                if !t.has_column(&property.name) {
                    t.columns
                        .push(ColumnDef::new(&property.name, type_map(&property.ty)?));
                }
            }
            for index in model.indexes() {
                if !t.has_index(&index.name) {
                    t.indexes.push(index.clone());
                }
            }
        }
        Ok(created)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Tuple {
        Tuple::new()
    }

    #[test]
    fn test_create_infers_columns() {
        let mut set = TableSet::default();
        set.create("orders", fields([("id", Value::Int(1)), ("sum", Value::Int(10))]), &ctx())
            .unwrap();
        assert!(set.has_table("orders"));
        let t = set.tables.get("orders").unwrap();
        assert!(t.has_column("id"));
        assert!(t.has_column("sum"));
    }

    #[test]
    fn test_generated_id_skips_supplied_ones() {
        let mut set = TableSet::default();
        set.create("orders", fields([("id", Value::Int(5))]), &ctx()).unwrap();
        let row = set.create("orders", Tuple::new(), &ctx()).unwrap();
        assert_eq!(row.get("id"), Some(&Value::Int(6)));
    }

    #[test]
    fn test_update_and_delete_by_compound_key() {
        let mut set = TableSet::default();
        set.create(
            "cells",
            fields([("name", Value::from("a")), ("shard", Value::Int(0))]),
            &ctx(),
        )
        .unwrap();
        let key = Value::Map(fields([
            ("name", Value::from("a")),
            ("shard", Value::Int(0)),
        ]));
        let post = set
            .update("cells", &key, fields([("storage", Value::Int(2))]), &ctx())
            .unwrap()
            .unwrap();
        assert_eq!(post.get("storage"), Some(&Value::Int(2)));
        assert!(set.delete("cells", &key, &ctx()).unwrap().is_some());
        assert!(set.find("cells", &Tuple::new()).is_empty());
    }

    #[test]
    fn test_update_missing_row_is_none() {
        let mut set = TableSet::default();
        assert!(set
            .update("orders", &Value::Int(9), Tuple::new(), &ctx())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_wildcard_listener_union_dedupes() {
        let mut set = TableSet::default();
        set.register("orders", "repl").unwrap();
        set.register(WILDCARD_TABLE, "repl").unwrap();
        set.register(WILDCARD_TABLE, "audit").unwrap();
        assert_eq!(set.listeners_for("orders"), vec!["repl", "audit"]);
        assert_eq!(set.listeners_for("other"), vec!["repl", "audit"]);
    }

    #[test]
    fn test_usage_excludes_cdc_tables() {
        let mut set = TableSet::default();
        set.register("orders", "repl").unwrap();
        set.create("orders", fields([("id", Value::Int(1))]), &ctx()).unwrap();
        // one data row; the change row does not count
        assert_eq!(set.usage(), 1);
    }
}
