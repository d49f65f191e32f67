//! Atomic table change sets coming from an editing UI.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::Result;
use crate::sql::{
    build_delete, build_insert, build_reselect, build_update, Dialect, PrimaryKeyValue, Statement,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowInsert {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// One map per inserted row; key order is column order.
    pub data: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowUpdate {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub primary_keys: Vec<PrimaryKeyValue>,
    pub changes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDelete {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub primary_keys: Vec<PrimaryKeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChanges {
    #[serde(default)]
    pub inserts: Vec<RowInsert>,
    #[serde(default)]
    pub updates: Vec<RowUpdate>,
    #[serde(default)]
    pub deletes: Vec<RowDelete>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Statements applying `changes`, followed by one reselect per update.
#[derive(Debug)]
pub struct ChangeScript {
    pub statements: Vec<Statement>,
    /// How many trailing statements are reselects.
    pub reselects: usize,
}

/// Build the whole script up front so a bad change fails before any SQL runs.
pub fn build_change_script(dialect: &dyn Dialect, changes: &TableChanges) -> Result<ChangeScript> {
    let mut sql = Vec::new();

    for insert in &changes.inserts {
        for row in &insert.data {
            sql.push(build_insert(dialect, insert.schema.as_deref(), &insert.table, row)?);
        }
    }
    for update in &changes.updates {
        sql.push(build_update(
            dialect,
            update.schema.as_deref(),
            &update.table,
            &update.primary_keys,
            &update.changes,
        )?);
    }
    for delete in &changes.deletes {
        sql.push(build_delete(
            dialect,
            delete.schema.as_deref(),
            &delete.table,
            &delete.primary_keys,
        )?);
    }
    for update in &changes.updates {
        sql.push(build_reselect(
            dialect,
            update.schema.as_deref(),
            &update.table,
            &update.primary_keys,
        )?);
    }

    Ok(ChangeScript {
        statements: sql.into_iter().map(|s| Statement::parse(s, dialect)).collect(),
        reselects: changes.updates.len(),
    })
}
