//! Catalog introspection.
//!
//! Every function takes a session and the active dialect; the dialect
//! supplies the catalog SQL and this module turns the rows into the shared
//! model. A dialect that lacks a concept returns no SQL and the listing comes
//! back empty.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::error::{Error, Result};
use super::query::RawResult;
use super::session::Session;
use crate::sql::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Table,
    View,
    MaterializedView,
}

impl EntityType {
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Table => "TABLE",
            EntityType::View => "VIEW",
            EntityType::MaterializedView => "MVIEW",
        }
    }
}

/// A table, view or materialized view. Identity is `(schema, name, entity_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOrView {
    pub schema: String,
    pub name: String,
    pub entity_type: EntityType,
}

/// Scope for list operations. `only` and `ignore` combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    pub schema: Option<String>,
    #[serde(default)]
    pub only: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl ListFilter {
    pub fn schema(schema: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub ordinal_position: i64,
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub nullable: bool,
    pub has_default: bool,
    pub default_value: Option<String>,
    pub generated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryKeyColumn {
    pub column_name: String,
    pub position: i64,
}

/// One column pair of a foreign key, from the dependent to the referenced table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyRelation {
    pub from_table: String,
    pub from_schema: String,
    pub from_column: String,
    pub to_table: String,
    pub to_schema: String,
    pub to_column: String,
    pub constraint_name: String,
    pub on_delete: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC", alias = "asc")]
    Asc,
    #[serde(rename = "DESC", alias = "desc")]
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexColumn {
    pub column_name: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub table: String,
    pub schema: String,
    pub unique: bool,
    pub primary: bool,
    pub columns: Vec<IndexColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub name: String,
    pub schema: String,
    pub table: String,
    pub timing: Option<String>,
    pub manipulation: Option<String>,
    pub action: Option<String>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Routine {
    pub id: String,
    pub schema: String,
    pub name: String,
    pub routine_type: String,
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableProperties {
    pub description: Option<String>,
    pub size: Option<i64>,
    pub index_size: Option<i64>,
    pub row_estimate: Option<i64>,
    pub owner: Option<String>,
    pub indexes: Vec<Index>,
    pub relations: Vec<ForeignKeyRelation>,
    pub triggers: Vec<Trigger>,
}

async fn catalog<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    sql: &str,
) -> Result<RawResult> {
    debug!(dialect = dialect.name(), "catalog query");
    session.fetch(sql).await.map_err(|e| dialect.rewrite_error(e))
}

pub async fn list_databases<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
) -> Result<Vec<String>> {
    let Some(sql) = dialect.databases_sql() else {
        return Ok(vec![]);
    };
    let raw = catalog(session, dialect, &sql).await?;
    Ok(raw.readers().filter_map(|r| r.text("name")).collect())
}

pub async fn list_schemas<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    filter: &ListFilter,
) -> Result<Vec<String>> {
    let Some(sql) = dialect.schemas_sql(filter) else {
        return Ok(vec![]);
    };
    let raw = catalog(session, dialect, &sql).await?;
    Ok(raw.readers().filter_map(|r| r.text("name")).collect())
}

pub async fn list_entities<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    kind: EntityType,
    filter: &ListFilter,
) -> Result<Vec<TableOrView>> {
    let Some(sql) = dialect.entities_sql(kind, filter) else {
        return Ok(vec![]);
    };
    let raw = catalog(session, dialect, &sql).await?;
    Ok(raw
        .readers()
        .map(|r| TableOrView {
            schema: r.string("schema_name"),
            name: r.string("name"),
            entity_type: kind,
        })
        .collect())
}

/// Columns ordered by table, then ordinal position.
pub async fn list_columns<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: Option<&str>,
) -> Result<Vec<Column>> {
    let sql = dialect.columns_sql(schema, table);
    let raw = catalog(session, dialect, &sql).await?;
    let mut columns: Vec<Column> = raw
        .readers()
        .map(|r| {
            let default_value = r.trimmed("default_value");
            Column {
                ordinal_position: r.int("ordinal_position").unwrap_or_default(),
                schema_name: r.string("schema_name"),
                table_name: r.string("table_name"),
                column_name: r.string("column_name"),
                data_type: r.string("data_type"),
                nullable: r.flag("nullable"),
                has_default: default_value.is_some(),
                default_value,
                generated: r.flag("generated"),
            }
        })
        .collect();
    columns.sort_by(|a, b| {
        (&a.schema_name, &a.table_name, a.ordinal_position).cmp(&(
            &b.schema_name,
            &b.table_name,
            b.ordinal_position,
        ))
    });
    Ok(columns)
}

pub async fn get_primary_keys<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<PrimaryKeyColumn>> {
    let sql = dialect.primary_keys_sql(schema, table);
    let raw = catalog(session, dialect, &sql).await?;
    let mut keys: Vec<PrimaryKeyColumn> = raw
        .readers()
        .map(|r| PrimaryKeyColumn {
            column_name: r.string("column_name"),
            position: r.int("position").unwrap_or_default(),
        })
        .collect();
    keys.sort_by_key(|k| k.position);
    Ok(keys)
}

/// The key column of a simple-keyed table. Composite or missing keys give `None`.
pub fn single_primary_key(keys: &[PrimaryKeyColumn]) -> Option<String> {
    match keys {
        [only] => Some(only.column_name.clone()),
        _ => None,
    }
}

/// Group phase-two rows by parent id, keeping each group's row order.
fn group_by_id<T>(items: impl Iterator<Item = (String, T)>) -> HashMap<String, Vec<T>> {
    let mut groups: HashMap<String, Vec<T>> = HashMap::new();
    for (id, item) in items {
        groups.entry(id).or_default().push(item);
    }
    groups
}

pub async fn list_indexes<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<Index>> {
    let Some(sql) = dialect.indexes_sql(schema, table) else {
        return Ok(vec![]);
    };
    let parents = catalog(session, dialect, &sql).await?;
    if parents.rows.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<String> = parents.readers().map(|r| r.string("id")).collect();
    let members = catalog(session, dialect, &dialect.index_columns_sql(&ids)).await?;
    let mut columns = group_by_id(members.readers().map(|r| {
        let direction = match r.string("direction").to_ascii_uppercase().as_str() {
            "DESC" => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        (
            r.string("id"),
            IndexColumn {
                column_name: r.string("column_name"),
                direction,
            },
        )
    }));

    Ok(parents
        .readers()
        .map(|r| Index {
            columns: columns.remove(&r.string("id")).unwrap_or_default(),
            name: r.string("name"),
            table: r.string("table_name"),
            schema: r.string("schema_name"),
            unique: r.flag("is_unique"),
            primary: r.flag("is_primary"),
        })
        .collect())
}

async fn fetch_relations<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    sql: Option<String>,
) -> Result<Vec<ForeignKeyRelation>> {
    let Some(sql) = sql else {
        return Ok(vec![]);
    };
    let constraints = catalog(session, dialect, &sql).await?;
    if constraints.rows.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<String> = constraints.readers().map(|r| r.string("id")).collect();
    let members = catalog(session, dialect, &dialect.foreign_key_columns_sql(&ids)).await?;
    let mut pairs = group_by_id(
        members
            .readers()
            .map(|r| (r.string("id"), (r.string("from_column"), r.string("to_column")))),
    );

    let mut relations = Vec::new();
    for r in constraints.readers() {
        for (from_column, to_column) in pairs.remove(&r.string("id")).unwrap_or_default() {
            relations.push(ForeignKeyRelation {
                from_table: r.string("from_table"),
                from_schema: r.string("from_schema"),
                from_column,
                to_table: r.string("to_table"),
                to_schema: r.string("to_schema"),
                to_column,
                constraint_name: r.string("constraint_name"),
                on_delete: r.text("on_delete"),
            });
        }
    }
    Ok(relations)
}

/// Keys declared on `table`, pointing elsewhere.
pub async fn list_foreign_keys<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<ForeignKeyRelation>> {
    fetch_relations(session, dialect, dialect.foreign_keys_sql(schema, table)).await
}

/// Keys declared elsewhere, pointing at `table`.
pub async fn list_incoming_keys<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<ForeignKeyRelation>> {
    fetch_relations(session, dialect, dialect.incoming_keys_sql(schema, table)).await
}

pub async fn list_triggers<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<Trigger>> {
    let Some(sql) = dialect.triggers_sql(schema, table) else {
        return Ok(vec![]);
    };
    let raw = catalog(session, dialect, &sql).await?;
    Ok(raw
        .readers()
        .map(|r| Trigger {
            name: r.string("name"),
            schema: r.string("schema_name"),
            table: r.string("table_name"),
            timing: r.trimmed("timing"),
            manipulation: r.trimmed("manipulation"),
            action: r.trimmed("action"),
            condition: r.trimmed("condition"),
        })
        .collect())
}

pub async fn list_routines<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    filter: &ListFilter,
) -> Result<Vec<Routine>> {
    let Some(sql) = dialect.routines_sql(filter) else {
        return Ok(vec![]);
    };
    let raw = catalog(session, dialect, &sql).await?;
    Ok(raw
        .readers()
        .map(|r| Routine {
            id: r.string("id"),
            schema: r.string("schema_name"),
            name: r.string("name"),
            routine_type: r.string("routine_type"),
            return_type: r.trimmed("return_type"),
        })
        .collect())
}

pub async fn get_table_properties<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
) -> Result<TableProperties> {
    let Some(sql) = dialect.table_properties_sql(schema, table) else {
        return Err(Error::not_implemented(dialect.name(), "table properties"));
    };
    let raw = catalog(session, dialect, &sql).await?;
    let reader = raw.readers().next();

    Ok(TableProperties {
        description: reader.as_ref().and_then(|r| r.trimmed("description")),
        size: reader.as_ref().and_then(|r| r.int("total_size")),
        index_size: reader.as_ref().and_then(|r| r.int("index_size")),
        row_estimate: reader.as_ref().and_then(|r| r.int("row_estimate")),
        owner: reader.as_ref().and_then(|r| r.text("owner")),
        indexes: list_indexes(session, dialect, schema, table).await?,
        relations: list_foreign_keys(session, dialect, schema, table).await?,
        triggers: list_triggers(session, dialect, schema, table).await?,
    })
}

/// `CREATE TABLE` statement rebuilt from introspected columns and key.
pub fn table_ddl(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    columns: &[Column],
    keys: &[PrimaryKeyColumn],
) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|col| {
            let name = dialect.wrap_identifier(&col.column_name);
            let mut line = format!("    {} {}", name, col.data_type);
            if let Some(default) = &col.default_value {
                line.push_str(&format!(" DEFAULT {}", default));
            }
            if !col.nullable {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();

    if !keys.is_empty() {
        let names: Vec<String> = keys
            .iter()
            .map(|k| dialect.wrap_identifier(&k.column_name))
            .collect();
        lines.push(format!("    PRIMARY KEY ({})", names.join(", ")));
    }

    format!(
        "CREATE TABLE {} (\n{}\n);\n",
        dialect.qualify(schema, table),
        lines.join(",\n")
    )
}
