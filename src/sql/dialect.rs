//! Dialect trait: everything that differs between engines at the SQL level.
//!
//! Escaping, pagination, transaction and cursor statements, catalog queries
//! and error rewrites live here. Shared behavior is provided as default
//! methods so a dialect only overrides what its engine does differently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::oracle::OracleDialect;
use super::postgres::PostgresDialect;
use crate::db::error::Error;
use crate::db::schema::{EntityType, ListFilter};

/// Database engine identifier, chosen in the connection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Postgres,
    Oracle,
}

impl Engine {
    pub fn dialect(&self) -> &'static dyn Dialect {
        match self {
            Engine::Postgres => &PostgresDialect,
            Engine::Oracle => &OracleDialect,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::Oracle => "oracle",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Optional behaviors a dialect honors. Callers branch on these instead of
/// attempting an operation and handling the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedFeatures {
    pub custom_routines: bool,
    pub comments: bool,
    pub properties: bool,
    pub partitions: bool,
    pub edit_partitions: bool,
    pub backup: bool,
    pub restore: bool,
    /// Server-side cursors for streaming.
    pub cursors: bool,
    /// Out-of-band interrupt of a running statement.
    pub interrupt: bool,
}

/// Known driver message fragment and the advice appended to it.
pub struct ErrorHint {
    pub pattern: &'static str,
    pub advice: &'static str,
}

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn engine(&self) -> Engine;

    /// Parser used by the statement classifier.
    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect>;

    /// Schema assumed when a request does not name one. `None` lets the
    /// engine resolve names against the session's current schema.
    fn default_schema(&self) -> Option<&'static str>;

    fn features(&self) -> SupportedFeatures;

    // ---------------------------------------------------------------------
    // Escaping
    // ---------------------------------------------------------------------

    /// Quote an identifier. `*` passes through untouched.
    ///
    /// Not idempotent: quoting an already quoted name quotes the quotes.
    fn wrap_identifier(&self, name: &str) -> String {
        if name == "*" {
            return name.to_string();
        }
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Escape a string value. With `literal` the result is a complete quoted
    /// literal, otherwise only the embedded quotes are doubled.
    fn escape_string(&self, value: &str, literal: bool) -> String {
        let escaped = value.replace('\'', "''");
        if literal {
            format!("'{}'", escaped)
        } else {
            escaped
        }
    }

    /// Adjust a caller-supplied raw SQL fragment before embedding it.
    fn wrap_literal(&self, fragment: &str) -> String {
        fragment.to_string()
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    /// Render a JSON payload value as a SQL literal.
    fn escape_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => self.bool_literal(*b).to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.escape_string(s, true),
            other => self.escape_string(&other.to_string(), true),
        }
    }

    /// `"schema"."name"`, or just `"name"` without a schema.
    fn qualify(&self, schema: Option<&str>, name: &str) -> String {
        match schema.filter(|s| !s.is_empty()) {
            Some(schema) => format!(
                "{}.{}",
                self.wrap_identifier(schema),
                self.wrap_identifier(name)
            ),
            None => self.wrap_identifier(name),
        }
    }

    /// `('a', 'b')` with every entry escaped.
    fn in_list(&self, values: &[String]) -> String {
        let items: Vec<String> = values.iter().map(|v| self.escape_string(v, true)).collect();
        format!("({})", items.join(", "))
    }

    /// ` AND col IN (...) AND col NOT IN (...)` for an allow/deny list.
    fn name_filter(&self, column: &str, filter: &ListFilter) -> String {
        let mut clause = String::new();
        if !filter.only.is_empty() {
            clause.push_str(&format!(" AND {} IN {}", column, self.in_list(&filter.only)));
        }
        if !filter.ignore.is_empty() {
            clause.push_str(&format!(
                " AND {} NOT IN {}",
                column,
                self.in_list(&filter.ignore)
            ));
        }
        clause
    }

    // ---------------------------------------------------------------------
    // Builder hooks
    // ---------------------------------------------------------------------

    fn paginate(&self, offset: u64, limit: u64) -> String;

    fn case_insensitive_like(&self, column: &str, pattern: &str) -> String {
        format!("{} ILIKE {}", column, pattern)
    }

    fn count_alias(&self) -> &'static str {
        "total"
    }

    // ---------------------------------------------------------------------
    // Transactions and cursors
    // ---------------------------------------------------------------------

    /// Statement opening a transaction, `None` when the engine opens one
    /// implicitly with the first DML.
    fn begin_transaction(&self) -> Option<&'static str>;

    fn commit(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback(&self) -> &'static str {
        "ROLLBACK"
    }

    /// Statement declaring a server-side cursor, `None` when unsupported.
    fn declare_cursor(&self, _name: &str, _sql: &str) -> Option<String> {
        None
    }

    fn fetch_cursor(&self, name: &str, count: usize) -> String {
        format!("FETCH FORWARD {} FROM {}", count, self.wrap_identifier(name))
    }

    fn close_cursor(&self, name: &str) -> String {
        format!("CLOSE {}", self.wrap_identifier(name))
    }

    // ---------------------------------------------------------------------
    // Catalog queries. `None` means the engine lacks the concept.
    // ---------------------------------------------------------------------

    fn version_sql(&self) -> &'static str;

    fn databases_sql(&self) -> Option<String>;

    fn schemas_sql(&self, filter: &ListFilter) -> Option<String>;

    /// Columns: `schema_name`, `name`.
    fn entities_sql(&self, kind: EntityType, filter: &ListFilter) -> Option<String>;

    /// Columns: `ordinal_position`, `schema_name`, `table_name`, `column_name`,
    /// `data_type`, `nullable`, `default_value`, `generated`.
    fn columns_sql(&self, schema: Option<&str>, table: Option<&str>) -> String;

    /// Columns: `column_name`, `position`.
    fn primary_keys_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// Phase one. Columns: `id`, `name`, `schema_name`, `table_name`,
    /// `is_unique`, `is_primary`.
    fn indexes_sql(&self, schema: Option<&str>, table: &str) -> Option<String>;

    /// Phase two. Columns: `id`, `column_name`, `direction`.
    fn index_columns_sql(&self, ids: &[String]) -> String;

    /// Phase one. Columns: `id`, `constraint_name`, `from_schema`,
    /// `from_table`, `to_schema`, `to_table`, `on_delete`.
    fn foreign_keys_sql(&self, schema: Option<&str>, table: &str) -> Option<String>;

    /// Same shape as [`Dialect::foreign_keys_sql`], for keys pointing at `table`.
    fn incoming_keys_sql(&self, schema: Option<&str>, table: &str) -> Option<String>;

    /// Phase two. Columns: `id`, `from_column`, `to_column`.
    fn foreign_key_columns_sql(&self, ids: &[String]) -> String;

    /// Columns: `name`, `schema_name`, `table_name`, `timing`, `manipulation`,
    /// `action`, `condition`.
    fn triggers_sql(&self, schema: Option<&str>, table: &str) -> Option<String>;

    /// Columns: `id`, `schema_name`, `name`, `routine_type`, `return_type`.
    fn routines_sql(&self, filter: &ListFilter) -> Option<String>;

    /// Columns: `description`, `total_size`, `index_size`, `row_estimate`, `owner`.
    fn table_properties_sql(&self, _schema: Option<&str>, _table: &str) -> Option<String> {
        None
    }

    fn truncate_sql(&self, schema: Option<&str>, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.qualify(schema, table))
    }

    fn drop_sql(&self, kind: EntityType, schema: Option<&str>, name: &str) -> Option<String> {
        let keyword = match kind {
            EntityType::Table => "TABLE",
            EntityType::View => "VIEW",
            EntityType::MaterializedView => "MATERIALIZED VIEW",
        };
        Some(format!("DROP {} {}", keyword, self.qualify(schema, name)))
    }

    // ---------------------------------------------------------------------
    // Errors
    // ---------------------------------------------------------------------

    fn error_hints(&self) -> &'static [ErrorHint];

    /// Append advice to known driver messages. The category is left alone.
    fn rewrite_error(&self, err: Error) -> Error {
        match err {
            Error::Statement(mut structured) => {
                if let Some(hint) = self
                    .error_hints()
                    .iter()
                    .find(|h| structured.message.contains(h.pattern))
                {
                    structured.message = format!("{}. {}", structured.message, hint.advice);
                    if structured.hint.is_none() {
                        structured.hint = Some(hint.advice.to_string());
                    }
                }
                Error::Statement(structured)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::error::{ErrorCategory, StructuredError};

    #[test]
    fn test_engine_selects_dialect() {
        assert_eq!(Engine::Postgres.dialect().name(), "postgres");
        assert_eq!(Engine::Oracle.dialect().name(), "oracle");
        assert_eq!(Engine::Oracle.to_string(), "oracle");
    }

    #[test]
    fn test_engine_deserializes_lowercase() {
        let engine: Engine = serde_json::from_str("\"oracle\"").unwrap();
        assert_eq!(engine, Engine::Oracle);
    }

    #[test]
    fn test_wrap_identifier_doubles_quotes() {
        let d = Engine::Postgres.dialect();
        assert_eq!(d.wrap_identifier("orders"), "\"orders\"");
        assert_eq!(d.wrap_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(d.wrap_identifier("*"), "*");
    }

    #[test]
    fn test_wrap_identifier_is_not_idempotent() {
        let d = Engine::Postgres.dialect();
        let once = d.wrap_identifier("a");
        assert_ne!(d.wrap_identifier(&once), once);
    }

    #[test]
    fn test_name_filter_composes_only_and_ignore() {
        let d = Engine::Postgres.dialect();
        let filter = ListFilter {
            schema: None,
            only: vec!["a".into(), "b".into()],
            ignore: vec!["b".into()],
        };
        assert_eq!(
            d.name_filter("c.relname", &filter),
            " AND c.relname IN ('a', 'b') AND c.relname NOT IN ('b')"
        );
        assert_eq!(d.name_filter("c.relname", &ListFilter::default()), "");
    }

    #[test]
    fn test_rewrite_error_keeps_category() {
        let d = Engine::Postgres.dialect();
        let err = Error::Statement(
            StructuredError::from_string("relation \"Orders\" does not exist").with_code("42P01"),
        );
        let rewritten = d.rewrite_error(err);
        let structured = rewritten.statement_error().unwrap();
        assert_eq!(structured.category, ErrorCategory::Semantic);
        assert!(structured.message.contains("quot"));
        assert!(structured.hint.is_some());
    }

    #[test]
    fn test_rewrite_error_leaves_unknown_messages() {
        let d = Engine::Postgres.dialect();
        let err = Error::Statement(StructuredError::from_string("division by zero"));
        let rewritten = d.rewrite_error(err);
        assert_eq!(rewritten.to_string(), "division by zero");
    }
}
