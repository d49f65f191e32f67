//! PostgreSQL dialect.

use sqlparser::dialect::PostgreSqlDialect;

use super::dialect::{Dialect, Engine, ErrorHint, SupportedFeatures};
use crate::db::schema::{EntityType, ListFilter};

const ERROR_HINTS: &[ErrorHint] = &[
    ErrorHint {
        pattern: "does not exist",
        advice: "Identifiers with upper case letters or special characters must be double-quoted",
    },
    ErrorHint {
        pattern: "current transaction is aborted",
        advice: "An earlier statement in this transaction failed; roll back before retrying",
    },
];

pub struct PostgresDialect;

impl PostgresDialect {
    fn schema_clause(&self, column: &str, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{} = {}", column, self.escape_string(schema, true)),
            None => format!(
                "{col} NOT IN ('pg_catalog', 'information_schema') \
                 AND {col} NOT LIKE 'pg\\_toast%'",
                col = column
            ),
        }
    }

    /// Owner of a single named table; unscoped names resolve in `current_schema()`.
    fn owner_clause(&self, column: &str, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{} = {}", column, self.escape_string(schema, true)),
            None => format!("{} = current_schema()", column),
        }
    }

    fn table_clause(&self, schema: Option<&str>, table: &str) -> String {
        format!(
            "{} AND t.relname = {}",
            self.owner_clause("n.nspname", schema),
            self.escape_string(table, true)
        )
    }

    fn foreign_keys_where(&self, where_clause: String) -> String {
        format!(
            r#"SELECT
    c.oid::text AS id,
    c.conname::text AS constraint_name,
    fn.nspname::text AS from_schema,
    ft.relname::text AS from_table,
    tn.nspname::text AS to_schema,
    tt.relname::text AS to_table,
    CASE c.confdeltype
        WHEN 'a' THEN 'NO ACTION'
        WHEN 'r' THEN 'RESTRICT'
        WHEN 'c' THEN 'CASCADE'
        WHEN 'n' THEN 'SET NULL'
        WHEN 'd' THEN 'SET DEFAULT'
    END AS on_delete
FROM pg_catalog.pg_constraint c
JOIN pg_catalog.pg_class ft ON ft.oid = c.conrelid
JOIN pg_catalog.pg_namespace fn ON fn.oid = ft.relnamespace
JOIN pg_catalog.pg_class tt ON tt.oid = c.confrelid
JOIN pg_catalog.pg_namespace tn ON tn.oid = tt.relnamespace
WHERE c.contype = 'f' AND {}
ORDER BY c.conname"#,
            where_clause
        )
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(PostgreSqlDialect {})
    }

    fn default_schema(&self) -> Option<&'static str> {
        Some("public")
    }

    fn features(&self) -> SupportedFeatures {
        SupportedFeatures {
            custom_routines: true,
            comments: true,
            properties: true,
            partitions: true,
            edit_partitions: false,
            backup: false,
            restore: false,
            cursors: true,
            interrupt: true,
        }
    }

    /// Backslashes switch the literal to `E''` form so it reads the same
    /// whatever `standard_conforming_strings` is set to.
    fn escape_string(&self, value: &str, literal: bool) -> String {
        let escaped = value.replace('\'', "''");
        if !literal {
            return escaped;
        }
        if escaped.contains('\\') {
            format!("E'{}'", escaped.replace('\\', "\\\\"))
        } else {
            format!("'{}'", escaped)
        }
    }

    fn paginate(&self, offset: u64, limit: u64) -> String {
        format!("LIMIT {} OFFSET {}", limit, offset)
    }

    fn begin_transaction(&self) -> Option<&'static str> {
        Some("BEGIN")
    }

    fn declare_cursor(&self, name: &str, sql: &str) -> Option<String> {
        Some(format!(
            "DECLARE {} NO SCROLL CURSOR FOR {}",
            self.wrap_identifier(name),
            sql
        ))
    }

    fn version_sql(&self) -> &'static str {
        "SELECT version() AS version"
    }

    fn databases_sql(&self) -> Option<String> {
        Some(
            "SELECT datname::text AS name FROM pg_catalog.pg_database \
             WHERE datistemplate = false ORDER BY datname"
                .to_string(),
        )
    }

    fn schemas_sql(&self, filter: &ListFilter) -> Option<String> {
        Some(format!(
            "SELECT nspname::text AS name FROM pg_catalog.pg_namespace \
             WHERE nspname NOT IN ('pg_catalog', 'information_schema') \
             AND nspname NOT LIKE 'pg\\_%'{} ORDER BY nspname",
            self.name_filter("nspname", filter)
        ))
    }

    fn entities_sql(&self, kind: EntityType, filter: &ListFilter) -> Option<String> {
        let relkinds = match kind {
            EntityType::Table => "'r', 'p'",
            EntityType::View => "'v'",
            EntityType::MaterializedView => "'m'",
        };
        Some(format!(
            r#"SELECT n.nspname::text AS schema_name, c.relname::text AS name
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ({}) AND {}{}
ORDER BY n.nspname, c.relname"#,
            relkinds,
            self.schema_clause("n.nspname", filter.schema.as_deref()),
            self.name_filter("c.relname", filter)
        ))
    }

    fn columns_sql(&self, schema: Option<&str>, table: Option<&str>) -> String {
        let (schema_clause, table_clause) = match table {
            Some(t) => (
                self.owner_clause("c.table_schema", schema),
                format!(" AND c.table_name = {}", self.escape_string(t, true)),
            ),
            None => (self.schema_clause("c.table_schema", schema), String::new()),
        };
        format!(
            r#"SELECT
    c.ordinal_position::int AS ordinal_position,
    c.table_schema::text AS schema_name,
    c.table_name::text AS table_name,
    c.column_name::text AS column_name,
    CASE
        WHEN c.character_maximum_length IS NOT NULL
            THEN c.data_type || '(' || c.character_maximum_length || ')'
        ELSE c.data_type
    END::text AS data_type,
    c.is_nullable = 'YES' AS nullable,
    c.column_default::text AS default_value,
    c.is_generated = 'ALWAYS' AS generated
FROM information_schema.columns c
WHERE {}{}
ORDER BY c.table_schema, c.table_name, c.ordinal_position"#,
            schema_clause, table_clause
        )
    }

    fn primary_keys_sql(&self, schema: Option<&str>, table: &str) -> String {
        format!(
            r#"SELECT a.attname::text AS column_name, k.ord::int AS position
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE ix.indisprimary AND {}
ORDER BY k.ord"#,
            self.table_clause(schema, table)
        )
    }

    fn indexes_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(format!(
            r#"SELECT
    i.oid::text AS id,
    i.relname::text AS name,
    n.nspname::text AS schema_name,
    t.relname::text AS table_name,
    ix.indisunique AS is_unique,
    ix.indisprimary AS is_primary
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
WHERE {}
ORDER BY i.relname"#,
            self.table_clause(schema, table)
        ))
    }

    fn index_columns_sql(&self, ids: &[String]) -> String {
        format!(
            r#"SELECT
    ix.indexrelid::text AS id,
    a.attname::text AS column_name,
    CASE WHEN (ix.indoption[k.ord - 1] & 1) = 1 THEN 'DESC' ELSE 'ASC' END AS direction
FROM pg_catalog.pg_index ix
CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_catalog.pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
WHERE ix.indexrelid::text IN {}
ORDER BY ix.indexrelid, k.ord"#,
            self.in_list(ids)
        )
    }

    fn foreign_keys_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(self.foreign_keys_where(format!(
            "{} AND ft.relname = {}",
            self.owner_clause("fn.nspname", schema),
            self.escape_string(table, true)
        )))
    }

    fn incoming_keys_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(self.foreign_keys_where(format!(
            "{} AND tt.relname = {}",
            self.owner_clause("tn.nspname", schema),
            self.escape_string(table, true)
        )))
    }

    fn foreign_key_columns_sql(&self, ids: &[String]) -> String {
        format!(
            r#"SELECT
    c.oid::text AS id,
    fa.attname::text AS from_column,
    ta.attname::text AS to_column
FROM pg_catalog.pg_constraint c
CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(from_attnum, to_attnum, ord)
JOIN pg_catalog.pg_attribute fa ON fa.attrelid = c.conrelid AND fa.attnum = k.from_attnum
JOIN pg_catalog.pg_attribute ta ON ta.attrelid = c.confrelid AND ta.attnum = k.to_attnum
WHERE c.oid::text IN {}
ORDER BY c.oid, k.ord"#,
            self.in_list(ids)
        )
    }

    fn triggers_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(format!(
            r#"SELECT
    trigger_name::text AS name,
    event_object_schema::text AS schema_name,
    event_object_table::text AS table_name,
    action_timing::text AS timing,
    string_agg(event_manipulation::text, ' OR ' ORDER BY event_manipulation) AS manipulation,
    action_statement::text AS action,
    action_condition::text AS condition
FROM information_schema.triggers
WHERE {} AND event_object_table = {}
GROUP BY trigger_name, event_object_schema, event_object_table,
         action_timing, action_statement, action_condition
ORDER BY trigger_name"#,
            self.owner_clause("event_object_schema", schema),
            self.escape_string(table, true)
        ))
    }

    fn routines_sql(&self, filter: &ListFilter) -> Option<String> {
        Some(format!(
            r#"SELECT
    r.specific_name::text AS id,
    r.routine_schema::text AS schema_name,
    r.routine_name::text AS name,
    r.routine_type::text AS routine_type,
    r.data_type::text AS return_type
FROM information_schema.routines r
WHERE {}{}
ORDER BY r.routine_schema, r.routine_name"#,
            self.schema_clause("r.routine_schema", filter.schema.as_deref()),
            self.name_filter("r.routine_name", filter)
        ))
    }

    fn table_properties_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(format!(
            r#"SELECT
    obj_description(t.oid, 'pg_class') AS description,
    pg_total_relation_size(t.oid) AS total_size,
    pg_indexes_size(t.oid) AS index_size,
    t.reltuples::bigint AS row_estimate,
    pg_catalog.pg_get_userbyid(t.relowner)::text AS owner
FROM pg_catalog.pg_class t
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
WHERE {}"#,
            self.table_clause(schema, table)
        ))
    }

    fn error_hints(&self) -> &'static [ErrorHint] {
        ERROR_HINTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_string_doubles_quotes() {
        let d = PostgresDialect;
        assert_eq!(d.escape_string("O'Brien", true), "'O''Brien'");
        assert_eq!(d.escape_string("O'Brien", false), "O''Brien");
    }

    #[test]
    fn test_escape_string_with_backslash_uses_escape_form() {
        let d = PostgresDialect;
        assert_eq!(d.escape_string("C:\\tmp", true), "E'C:\\\\tmp'");
    }

    #[test]
    fn test_escape_value() {
        let d = PostgresDialect;
        assert_eq!(d.escape_value(&serde_json::json!(null)), "NULL");
        assert_eq!(d.escape_value(&serde_json::json!(true)), "TRUE");
        assert_eq!(d.escape_value(&serde_json::json!(42)), "42");
        assert_eq!(d.escape_value(&serde_json::json!("x")), "'x'");
        assert_eq!(d.escape_value(&serde_json::json!({"a": 1})), "'{\"a\":1}'");
    }

    #[test]
    fn test_paginate() {
        assert_eq!(PostgresDialect.paginate(20, 10), "LIMIT 10 OFFSET 20");
    }

    #[test]
    fn test_entities_sql_scopes_schema_and_names() {
        let filter = ListFilter {
            schema: Some("sales".into()),
            only: vec![],
            ignore: vec!["audit".into()],
        };
        let sql = PostgresDialect
            .entities_sql(EntityType::MaterializedView, &filter)
            .unwrap();
        assert!(sql.contains("c.relkind IN ('m')"));
        assert!(sql.contains("n.nspname = 'sales'"));
        assert!(sql.contains("c.relname NOT IN ('audit')"));
    }

    #[test]
    fn test_entities_sql_without_schema_hides_system_schemas() {
        let sql = PostgresDialect
            .entities_sql(EntityType::Table, &ListFilter::default())
            .unwrap();
        assert!(sql.contains("NOT IN ('pg_catalog', 'information_schema')"));
    }

    #[test]
    fn test_table_lookup_escapes_names() {
        let sql = PostgresDialect.primary_keys_sql(Some("sales"), "o'rders");
        assert!(sql.contains("n.nspname = 'sales' AND t.relname = 'o''rders'"));
    }

    #[test]
    fn test_unscoped_table_lookups_agree_on_current_schema() {
        let d = PostgresDialect;
        let lookups = [
            d.columns_sql(None, Some("orders")),
            d.primary_keys_sql(None, "orders"),
            d.indexes_sql(None, "orders").unwrap(),
            d.foreign_keys_sql(None, "orders").unwrap(),
            d.incoming_keys_sql(None, "orders").unwrap(),
            d.triggers_sql(None, "orders").unwrap(),
        ];
        for sql in &lookups {
            assert!(sql.contains("= current_schema()"), "{sql}");
            assert!(!sql.contains("'public'"), "{sql}");
        }
        // listing every column still spans all user schemas
        let all = d.columns_sql(None, None);
        assert!(all.contains("c.table_schema NOT IN ('pg_catalog', 'information_schema')"));
    }

    #[test]
    fn test_index_columns_sql_keys_by_ids() {
        let sql = PostgresDialect.index_columns_sql(&["16401".into(), "16405".into()]);
        assert!(sql.contains("IN ('16401', '16405')"));
    }

    #[test]
    fn test_declare_cursor() {
        assert_eq!(
            PostgresDialect.declare_cursor("c1", "SELECT 1").as_deref(),
            Some("DECLARE \"c1\" NO SCROLL CURSOR FOR SELECT 1")
        );
        assert_eq!(PostgresDialect.fetch_cursor("c1", 500), "FETCH FORWARD 500 FROM \"c1\"");
    }
}
