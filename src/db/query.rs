use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// What a cancelable call resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Canceled,
}

impl<T> Outcome<T> {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Canceled => None,
        }
    }
}

/// A column as reported by the driver, before synthetic ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Tabular payload straight from a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
}

/// Result column with a per-result unique id (`c0`, `c1`, ...).
///
/// Two columns may share a `name` (`SELECT a.id, b.id ...`); the id never repeats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub id: String,
    pub name: String,
    pub data_type: String,
}

pub fn fields_from_columns(columns: &[ColumnInfo]) -> Vec<Field> {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| Field {
            id: format!("c{}", i),
            name: col.name.clone(),
            data_type: col.type_name.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Arbitrary precision number kept in its decimal text form.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<CellValue>),
    Unknown(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int16(i) => i.to_string(),
            CellValue::Int32(i) => i.to_string(),
            CellValue::Int64(i) => i.to_string(),
            CellValue::Float32(f) => f.to_string(),
            CellValue::Float64(f) => f.to_string(),
            CellValue::Numeric(n) => n.clone(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bytes(b) => format!("[{} bytes]", b.len()),
            CellValue::Date(d) => d.to_string(),
            CellValue::Time(t) => t.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::TimestampTz(dt) => dt.to_string(),
            CellValue::Json(j) => j.to_string(),
            CellValue::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| v.display()).collect();
                format!("{{{}}}", items.join(", "))
            }
            CellValue::Unknown(s) => s.clone(),
        }
    }

    /// Text form for catalog lookups; `None` for NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            other => Some(other.display()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int16(i) => Some(*i as i64),
            CellValue::Int32(i) => Some(*i as i64),
            CellValue::Int64(i) => Some(*i),
            CellValue::Float32(f) => Some(*f as i64),
            CellValue::Float64(f) => Some(*f as i64),
            CellValue::Numeric(s) | CellValue::Text(s) | CellValue::Unknown(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            _ => None,
        }
    }

    /// Truthiness across engines that lack a boolean type (`1`, `Y`, `YES`).
    pub fn as_flag(&self) -> bool {
        match self {
            CellValue::Bool(b) => *b,
            CellValue::Null => false,
            CellValue::Text(s) | CellValue::Unknown(s) => matches!(
                s.trim().to_ascii_uppercase().as_str(),
                "Y" | "YES" | "T" | "TRUE" | "1"
            ),
            other => other.as_i64().map(|i| i != 0).unwrap_or(false),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Int16(i) => serde_json::json!(*i),
            CellValue::Int32(i) => serde_json::json!(*i),
            CellValue::Int64(i) => serde_json::json!(*i),
            CellValue::Float32(f) => serde_json::json!(*f),
            CellValue::Float64(f) => serde_json::json!(*f),
            CellValue::Json(j) => j.clone(),
            CellValue::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(CellValue::to_json).collect())
            }
            other => serde_json::Value::String(other.display()),
        }
    }
}

/// Normalized result of one statement.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Statement text as sent to the engine.
    pub command: String,
    pub fields: Vec<Field>,
    /// Each row is aligned with `fields`.
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub affected_rows: Option<u64>,
    pub execution_time: Duration,
}

impl QueryResult {
    pub fn from_rows(command: &str, raw: RawResult, execution_time: Duration) -> Self {
        let fields = fields_from_columns(&raw.columns);
        let row_count = raw.rows.len();
        Self {
            command: command.to_string(),
            fields,
            rows: raw.rows,
            row_count,
            affected_rows: None,
            execution_time,
        }
    }

    pub fn from_command(command: &str, affected: u64, execution_time: Duration) -> Self {
        Self {
            command: command.to_string(),
            fields: vec![],
            rows: vec![],
            row_count: 0,
            affected_rows: Some(affected),
            execution_time,
        }
    }

    /// Index of the first field carrying `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Rows as ordered `(field id, value)` pairs.
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &CellValue)>> + '_ {
        self.rows.iter().map(move |row| {
            self.fields
                .iter()
                .zip(row.iter())
                .map(|(field, value)| (field.id.as_str(), value))
                .collect()
        })
    }

    /// Rows keyed by field id, in field order.
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.records()
            .map(|record| {
                let mut obj = serde_json::Map::new();
                for (id, value) in record {
                    obj.insert(id.to_string(), value.to_json());
                }
                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

/// Name-based access into a catalog row.
///
/// Lookups are case-insensitive: dictionary views of some engines fold
/// unquoted aliases to upper case.
pub struct RowReader<'a> {
    columns: &'a [ColumnInfo],
    row: &'a [CellValue],
}

impl<'a> RowReader<'a> {
    pub fn new(columns: &'a [ColumnInfo], row: &'a [CellValue]) -> Self {
        Self { columns, row }
    }

    fn value(&self, name: &str) -> Option<&'a CellValue> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .and_then(|i| self.row.get(i))
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.value(name).and_then(CellValue::as_text)
    }

    /// Text with surrounding whitespace removed; empty strings become `None`.
    pub fn trimmed(&self, name: &str) -> Option<String> {
        self.text(name)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn string(&self, name: &str) -> String {
        self.text(name).unwrap_or_default()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(CellValue::as_i64)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.value(name).map(CellValue::as_flag).unwrap_or(false)
    }
}

impl RawResult {
    pub fn readers(&self) -> impl Iterator<Item = RowReader<'_>> {
        self.rows.iter().map(move |row| RowReader::new(&self.columns, row))
    }
}
