//! Engine-agnostic statement assembly.
//!
//! Every identifier goes through [`Dialect::wrap_identifier`] and every value
//! through [`Dialect::escape_value`]. Raw filter fragments are the one trusted
//! passthrough and are never re-escaped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::dialect::Dialect;
use crate::db::error::{Error, Result};
use crate::db::schema::SortDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "ilike")]
    ILike,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "is not")]
    IsNot,
}

impl FilterOp {
    fn operator(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::NotEq => "!=",
            FilterOp::Ne => "<>",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Like => "LIKE",
            FilterOp::ILike => "ILIKE",
            FilterOp::In => "IN",
            FilterOp::Is => "IS",
            FilterOp::IsNot => "IS NOT",
        }
    }
}

/// One predicate. `values` is read only by `in`; `is` and `is not` read neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    #[serde(rename = "type")]
    pub op: FilterOp,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub values: Option<Vec<Value>>,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: Some(value.into()),
            values: None,
        }
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::In,
            value: None,
            values: Some(values),
        }
    }

    /// Render the predicate. A missing or null value turns `=` into `IS NULL`
    /// and `!=`/`<>` into `IS NOT NULL`; other comparisons need a value.
    pub fn render(&self, dialect: &dyn Dialect) -> Result<String> {
        let column = dialect.wrap_identifier(&self.field);
        let value = self.value.as_ref().filter(|v| !v.is_null());
        let sql = match (self.op, value) {
            (FilterOp::Is, _) | (FilterOp::Eq, None) => format!("{} IS NULL", column),
            (FilterOp::IsNot, _) | (FilterOp::NotEq | FilterOp::Ne, None) => {
                format!("{} IS NOT NULL", column)
            }
            (FilterOp::In, _) => {
                let values = self.values.as_deref().unwrap_or_default();
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let items: Vec<String> = values.iter().map(|v| dialect.escape_value(v)).collect();
                format!("{} IN ({})", column, items.join(", "))
            }
            (op, None) => {
                return Err(Error::InvalidFilter {
                    field: self.field.clone(),
                    reason: format!("operator {} needs a value", op.operator()),
                })
            }
            (FilterOp::ILike, Some(value)) => {
                dialect.case_insensitive_like(&column, &dialect.escape_value(value))
            }
            (op, Some(value)) => format!(
                "{} {} {}",
                column,
                op.operator(),
                dialect.escape_value(value)
            ),
        };
        Ok(sql)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connective {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// A structured predicate list, or a raw fragment supplied by a trusted caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filters {
    Raw(String),
    List {
        #[serde(default)]
        connective: Connective,
        filters: Vec<Filter>,
    },
}

impl Filters {
    pub fn all(filters: Vec<Filter>) -> Self {
        Filters::List {
            connective: Connective::And,
            filters,
        }
    }

    /// The WHERE body, or `None` when there is nothing to filter on.
    pub fn render(&self, dialect: &dyn Dialect) -> Result<Option<String>> {
        match self {
            Filters::Raw(fragment) => {
                let fragment = dialect.wrap_literal(fragment.trim());
                Ok((!fragment.is_empty()).then_some(fragment))
            }
            Filters::List { connective, filters } => {
                if filters.is_empty() {
                    return Ok(None);
                }
                let joiner = match connective {
                    Connective::And => " AND ",
                    Connective::Or => " OR ",
                };
                let parts = filters
                    .iter()
                    .map(|f| f.render(dialect))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(parts.join(joiner)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderBy {
    Field(String),
    Spec {
        field: String,
        #[serde(default)]
        direction: SortDirection,
    },
}

impl OrderBy {
    pub fn render(&self, dialect: &dyn Dialect) -> String {
        let (field, direction) = match self {
            OrderBy::Field(field) => (field, SortDirection::Asc),
            OrderBy::Spec { field, direction } => (field, *direction),
        };
        format!("{} {}", dialect.wrap_identifier(field), direction.keyword())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub filters: Option<Filters>,
    /// Column names to select; empty selects every column.
    #[serde(default)]
    pub projection: Vec<String>,
    #[serde(default)]
    pub count_only: bool,
}

impl SelectRequest {
    pub fn new(schema: Option<&str>, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: schema.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    /// The same table and filters, counting instead of fetching.
    pub fn counting(&self) -> Self {
        Self {
            table: self.table.clone(),
            schema: self.schema.clone(),
            filters: self.filters.clone(),
            count_only: true,
            ..Self::default()
        }
    }
}

pub fn build_select(dialect: &dyn Dialect, request: &SelectRequest) -> Result<String> {
    let projection = if request.count_only {
        format!("COUNT(*) AS {}", dialect.count_alias())
    } else if request.projection.is_empty() {
        "*".to_string()
    } else {
        request
            .projection
            .iter()
            .map(|c| dialect.wrap_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!(
        "SELECT {} FROM {}",
        projection,
        dialect.qualify(request.schema.as_deref(), &request.table)
    );

    let clause = match &request.filters {
        Some(filters) => filters.render(dialect)?,
        None => None,
    };
    if let Some(clause) = clause {
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }

    if !request.order_by.is_empty() {
        let order: Vec<String> = request.order_by.iter().map(|o| o.render(dialect)).collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    if let (Some(offset), Some(limit)) = (request.offset, request.limit) {
        sql.push(' ');
        sql.push_str(&dialect.paginate(offset, limit));
    }

    Ok(sql)
}

/// Column/value pair addressing one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyValue {
    pub column: String,
    pub value: Value,
}

fn key_clause(dialect: &dyn Dialect, table: &str, keys: &[PrimaryKeyValue]) -> Result<String> {
    if keys.is_empty() || keys.iter().any(|k| k.value.is_null()) {
        return Err(Error::MissingPrimaryKey {
            table: table.to_string(),
        });
    }
    let parts: Vec<String> = keys
        .iter()
        .map(|k| {
            format!(
                "{} = {}",
                dialect.wrap_identifier(&k.column),
                dialect.escape_value(&k.value)
            )
        })
        .collect();
    Ok(parts.join(" AND "))
}

/// Columns are listed in the order the row map holds them.
pub fn build_insert(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    row: &Map<String, Value>,
) -> Result<String> {
    if row.is_empty() {
        return Err(Error::InvalidChange {
            table: table.to_string(),
            reason: "insert carries no columns".to_string(),
        });
    }
    let columns: Vec<String> = row.keys().map(|c| dialect.wrap_identifier(c)).collect();
    let values: Vec<String> = row.values().map(|v| dialect.escape_value(v)).collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.qualify(schema, table),
        columns.join(", "),
        values.join(", ")
    ))
}

pub fn build_update(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    keys: &[PrimaryKeyValue],
    changes: &Map<String, Value>,
) -> Result<String> {
    let predicate = key_clause(dialect, table, keys)?;
    if changes.is_empty() {
        return Err(Error::InvalidChange {
            table: table.to_string(),
            reason: "update assigns no columns".to_string(),
        });
    }
    let assignments: Vec<String> = changes
        .iter()
        .map(|(column, value)| {
            format!(
                "{} = {}",
                dialect.wrap_identifier(column),
                dialect.escape_value(value)
            )
        })
        .collect();
    Ok(format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.qualify(schema, table),
        assignments.join(", "),
        predicate
    ))
}

pub fn build_delete(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    keys: &[PrimaryKeyValue],
) -> Result<String> {
    Ok(format!(
        "DELETE FROM {} WHERE {}",
        dialect.qualify(schema, table),
        key_clause(dialect, table, keys)?
    ))
}

/// Re-read one row after an update so callers see server-side effects.
pub fn build_reselect(
    dialect: &dyn Dialect,
    schema: Option<&str>,
    table: &str,
    keys: &[PrimaryKeyValue],
) -> Result<String> {
    Ok(format!(
        "SELECT * FROM {} WHERE {}",
        dialect.qualify(schema, table),
        key_clause(dialect, table, keys)?
    ))
}
