//! Export writers fed by query results or a streaming cursor.
//!
//! A [`RowSink`] receives the ordered field list once, then one call per row,
//! then a footer call.

use deadpool::managed::Manager;
use std::collections::HashSet;
use std::io::{self, Write};
use tracing::{debug, warn};

use crate::db::{CellValue, Field, QueryResult, Result, Session, StreamResults};
use crate::sql::Dialect;

pub trait RowSink {
    fn header(&mut self, fields: &[Field]) -> io::Result<()>;
    fn row(&mut self, values: &[CellValue]) -> io::Result<()>;
    fn footer(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Column keys for exported rows: the field name, or the field id when
/// several fields share a name.
pub fn field_keys(fields: &[Field]) -> Vec<String> {
    let mut seen = HashSet::new();
    let duplicated: HashSet<&str> = fields
        .iter()
        .filter(|f| !seen.insert(f.name.as_str()))
        .map(|f| f.name.as_str())
        .collect();
    fields
        .iter()
        .map(|f| {
            if duplicated.contains(f.name.as_str()) {
                f.id.clone()
            } else {
                f.name.clone()
            }
        })
        .collect()
}

pub struct CsvSink<W: Write> {
    out: W,
    delimiter: char,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            delimiter: ',',
        }
    }

    pub fn tsv(out: W) -> Self {
        Self {
            out,
            delimiter: '\t',
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn escape(&self, s: &str) -> String {
        if self.delimiter == '\t' {
            return s.replace(['\t', '\n', '\r'], " ");
        }
        if s.contains(self.delimiter) || s.contains('"') || s.contains('\n') || s.contains('\r') {
            format!("\"{}\"", s.replace('"', "\"\""))
        } else {
            s.to_string()
        }
    }

    fn line(&mut self, cells: Vec<String>) -> io::Result<()> {
        let line = cells.join(&self.delimiter.to_string());
        writeln!(self.out, "{}", line)
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn header(&mut self, fields: &[Field]) -> io::Result<()> {
        let cells = field_keys(fields).iter().map(|k| self.escape(k)).collect();
        self.line(cells)
    }

    fn row(&mut self, values: &[CellValue]) -> io::Result<()> {
        let cells = values
            .iter()
            .map(|cell| match cell {
                CellValue::Null => String::new(),
                other => self.escape(&other.display()),
            })
            .collect();
        self.line(cells)
    }

    fn footer(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// One JSON object per line, keys in field order.
pub struct JsonLinesSink<W: Write> {
    out: W,
    keys: Vec<String>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, keys: vec![] }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RowSink for JsonLinesSink<W> {
    fn header(&mut self, fields: &[Field]) -> io::Result<()> {
        self.keys = field_keys(fields);
        Ok(())
    }

    fn row(&mut self, values: &[CellValue]) -> io::Result<()> {
        let mut obj = serde_json::Map::new();
        for (key, value) in self.keys.iter().zip(values) {
            obj.insert(key.clone(), value.to_json());
        }
        serde_json::to_writer(&mut self.out, &serde_json::Value::Object(obj))?;
        self.out.write_all(b"\n")
    }

    fn footer(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// `INSERT` statements in the target dialect, one per row.
pub struct SqlInsertSink<'a, W: Write> {
    out: W,
    dialect: &'a dyn Dialect,
    table: String,
    columns: String,
}

impl<'a, W: Write> SqlInsertSink<'a, W> {
    pub fn new(out: W, dialect: &'a dyn Dialect, schema: Option<&str>, table: &str) -> Self {
        Self {
            out,
            dialect,
            table: dialect.qualify(schema, table),
            columns: String::new(),
        }
    }
}

impl<W: Write> RowSink for SqlInsertSink<'_, W> {
    fn header(&mut self, fields: &[Field]) -> io::Result<()> {
        self.columns = fields
            .iter()
            .map(|f| self.dialect.wrap_identifier(&f.name))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(())
    }

    fn row(&mut self, values: &[CellValue]) -> io::Result<()> {
        let values: Vec<String> = values
            .iter()
            .map(|v| self.dialect.escape_value(&v.to_json()))
            .collect();
        writeln!(
            self.out,
            "INSERT INTO {} ({}) VALUES ({});",
            self.table,
            self.columns,
            values.join(", ")
        )
    }

    fn footer(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

pub fn export_result(result: &QueryResult, sink: &mut dyn RowSink) -> Result<u64> {
    sink.header(&result.fields)?;
    for row in &result.rows {
        sink.row(row)?;
    }
    sink.footer()?;
    Ok(result.rows.len() as u64)
}

/// Drain a stream into `sink` chunk by chunk. The cursor is closed on every
/// exit path, including a failing sink.
pub async fn export_stream<M>(stream: &mut StreamResults<M>, sink: &mut dyn RowSink) -> Result<u64>
where
    M: Manager,
    M::Type: Session,
{
    let written = drain(stream, sink).await;
    if written.is_err() {
        if let Err(e) = stream.cursor.close().await {
            warn!(error = %e, "closing cursor after failed export failed");
        }
    }
    written
}

async fn drain<M>(stream: &mut StreamResults<M>, sink: &mut dyn RowSink) -> Result<u64>
where
    M: Manager,
    M::Type: Session,
{
    sink.header(&stream.fields)?;
    let mut written = 0u64;
    while !stream.cursor.is_closed() {
        let rows = stream.cursor.fetch().await?;
        for row in &rows {
            sink.row(row)?;
        }
        written += rows.len() as u64;
        debug!(written, "export chunk written");
    }
    sink.footer()?;
    Ok(written)
}
