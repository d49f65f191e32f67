//! Oracle dialect.
//!
//! Catalog queries read the `ALL_*` dictionary views, so results cover every
//! object the connected user can see. Unqualified lookups resolve against
//! the session's current schema.

use sqlparser::dialect::GenericDialect;

use super::dialect::{Dialect, Engine, ErrorHint, SupportedFeatures};
use crate::db::schema::{EntityType, ListFilter};

const ERROR_HINTS: &[ErrorHint] = &[
    ErrorHint {
        pattern: "ORA-00942",
        advice: "Check the owner and letter case; mixed-case names must be double-quoted",
    },
    ErrorHint {
        pattern: "ORA-00904",
        advice: "Mixed-case column names must be double-quoted",
    },
    ErrorHint {
        pattern: "ORA-00933",
        advice: "Oracle statements must not end with a semicolon",
    },
];

const CURRENT_SCHEMA: &str = "SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA')";

pub struct OracleDialect;

impl OracleDialect {
    fn owner_clause(&self, column: &str, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{} = {}", column, self.escape_string(schema, true)),
            None => format!("{} = {}", column, CURRENT_SCHEMA),
        }
    }

    fn foreign_keys_where(&self, where_clause: String) -> String {
        format!(
            r#"SELECT
    c.owner || '.' || c.constraint_name AS id,
    c.constraint_name AS constraint_name,
    c.owner AS from_schema,
    c.table_name AS from_table,
    r.owner AS to_schema,
    r.table_name AS to_table,
    c.delete_rule AS on_delete
FROM all_constraints c
JOIN all_constraints r ON r.owner = c.r_owner AND r.constraint_name = c.r_constraint_name
WHERE c.constraint_type = 'R' AND {}
ORDER BY c.constraint_name"#,
            where_clause
        )
    }
}

impl Dialect for OracleDialect {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn engine(&self) -> Engine {
        Engine::Oracle
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(GenericDialect {})
    }

    fn default_schema(&self) -> Option<&'static str> {
        None
    }

    fn features(&self) -> SupportedFeatures {
        SupportedFeatures {
            custom_routines: true,
            comments: true,
            properties: false,
            partitions: false,
            edit_partitions: false,
            backup: false,
            restore: false,
            cursors: false,
            interrupt: false,
        }
    }

    /// Oracle rejects a statement ending in `;` unless it is a PL/SQL block.
    fn wrap_literal(&self, fragment: &str) -> String {
        fragment.trim_end().trim_end_matches(';').to_string()
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn paginate(&self, offset: u64, limit: u64) -> String {
        format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, limit)
    }

    fn case_insensitive_like(&self, column: &str, pattern: &str) -> String {
        format!("UPPER({}) LIKE UPPER({})", column, pattern)
    }

    fn begin_transaction(&self) -> Option<&'static str> {
        None
    }

    fn version_sql(&self) -> &'static str {
        "SELECT banner AS version FROM v$version WHERE ROWNUM = 1"
    }

    fn databases_sql(&self) -> Option<String> {
        Some("SELECT SYS_CONTEXT('USERENV', 'DB_NAME') AS name FROM dual".to_string())
    }

    fn schemas_sql(&self, filter: &ListFilter) -> Option<String> {
        Some(format!(
            "SELECT username AS name FROM all_users WHERE 1 = 1{} ORDER BY username",
            self.name_filter("username", filter)
        ))
    }

    fn entities_sql(&self, kind: EntityType, filter: &ListFilter) -> Option<String> {
        let (view, column) = match kind {
            EntityType::Table => ("all_tables", "table_name"),
            EntityType::View => ("all_views", "view_name"),
            EntityType::MaterializedView => ("all_mviews", "mview_name"),
        };
        let extra = match kind {
            // Materialized views also show up in ALL_TABLES as container tables.
            EntityType::Table => {
                " AND (owner, table_name) NOT IN (SELECT owner, mview_name FROM all_mviews)"
            }
            _ => "",
        };
        Some(format!(
            "SELECT owner AS schema_name, {col} AS name FROM {view} \
             WHERE {}{}{} ORDER BY owner, {col}",
            self.owner_clause("owner", filter.schema.as_deref()),
            self.name_filter(column, filter),
            extra,
            col = column,
            view = view
        ))
    }

    fn columns_sql(&self, schema: Option<&str>, table: Option<&str>) -> String {
        let table_clause = table
            .map(|t| format!(" AND c.table_name = {}", self.escape_string(t, true)))
            .unwrap_or_default();
        format!(
            r#"SELECT
    c.column_id AS ordinal_position,
    c.owner AS schema_name,
    c.table_name AS table_name,
    c.column_name AS column_name,
    CASE
        WHEN c.data_type IN ('VARCHAR2', 'NVARCHAR2', 'CHAR', 'NCHAR', 'RAW')
            THEN c.data_type || '(' || c.data_length || ')'
        ELSE c.data_type
    END AS data_type,
    c.nullable AS nullable,
    c.data_default AS default_value,
    c.virtual_column AS generated
FROM all_tab_cols c
WHERE c.hidden_column = 'NO' AND {}{}
ORDER BY c.owner, c.table_name, c.column_id"#,
            self.owner_clause("c.owner", schema),
            table_clause
        )
    }

    fn primary_keys_sql(&self, schema: Option<&str>, table: &str) -> String {
        format!(
            r#"SELECT cc.column_name AS column_name, cc.position AS position
FROM all_constraints c
JOIN all_cons_columns cc ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name
WHERE c.constraint_type = 'P' AND {} AND c.table_name = {}
ORDER BY cc.position"#,
            self.owner_clause("c.owner", schema),
            self.escape_string(table, true)
        )
    }

    fn indexes_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(format!(
            r#"SELECT
    i.owner || '.' || i.index_name AS id,
    i.index_name AS name,
    i.table_owner AS schema_name,
    i.table_name AS table_name,
    CASE WHEN i.uniqueness = 'UNIQUE' THEN 'YES' ELSE 'NO' END AS is_unique,
    CASE WHEN c.constraint_name IS NOT NULL THEN 'YES' ELSE 'NO' END AS is_primary
FROM all_indexes i
LEFT JOIN all_constraints c
    ON c.owner = i.table_owner AND c.index_name = i.index_name AND c.constraint_type = 'P'
WHERE {} AND i.table_name = {}
ORDER BY i.index_name"#,
            self.owner_clause("i.table_owner", schema),
            self.escape_string(table, true)
        ))
    }

    fn index_columns_sql(&self, ids: &[String]) -> String {
        format!(
            r#"SELECT
    ic.index_owner || '.' || ic.index_name AS id,
    ic.column_name AS column_name,
    ic.descend AS direction
FROM all_ind_columns ic
WHERE ic.index_owner || '.' || ic.index_name IN {}
ORDER BY ic.index_owner, ic.index_name, ic.column_position"#,
            self.in_list(ids)
        )
    }

    fn foreign_keys_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(self.foreign_keys_where(format!(
            "{} AND c.table_name = {}",
            self.owner_clause("c.owner", schema),
            self.escape_string(table, true)
        )))
    }

    fn incoming_keys_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(self.foreign_keys_where(format!(
            "{} AND r.table_name = {}",
            self.owner_clause("r.owner", schema),
            self.escape_string(table, true)
        )))
    }

    fn foreign_key_columns_sql(&self, ids: &[String]) -> String {
        format!(
            r#"SELECT
    fc.owner || '.' || fc.constraint_name AS id,
    fc.column_name AS from_column,
    rc.column_name AS to_column
FROM all_cons_columns fc
JOIN all_constraints c ON c.owner = fc.owner AND c.constraint_name = fc.constraint_name
JOIN all_cons_columns rc
    ON rc.owner = c.r_owner
    AND rc.constraint_name = c.r_constraint_name
    AND rc.position = fc.position
WHERE fc.owner || '.' || fc.constraint_name IN {}
ORDER BY fc.owner, fc.constraint_name, fc.position"#,
            self.in_list(ids)
        )
    }

    fn triggers_sql(&self, schema: Option<&str>, table: &str) -> Option<String> {
        Some(format!(
            r#"SELECT
    t.trigger_name AS name,
    t.table_owner AS schema_name,
    t.table_name AS table_name,
    t.trigger_type AS timing,
    t.triggering_event AS manipulation,
    t.action_type AS action,
    t.when_clause AS condition
FROM all_triggers t
WHERE {} AND t.table_name = {}
ORDER BY t.trigger_name"#,
            self.owner_clause("t.table_owner", schema),
            self.escape_string(table, true)
        ))
    }

    fn routines_sql(&self, filter: &ListFilter) -> Option<String> {
        Some(format!(
            r#"SELECT
    o.owner || '.' || o.object_name AS id,
    o.owner AS schema_name,
    o.object_name AS name,
    o.object_type AS routine_type,
    NULL AS return_type
FROM all_objects o
WHERE o.object_type IN ('FUNCTION', 'PROCEDURE') AND {}{}
ORDER BY o.owner, o.object_name"#,
            self.owner_clause("o.owner", filter.schema.as_deref()),
            self.name_filter("o.object_name", filter)
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
    fn test_paginate_uses_offset_fetch() {
        assert_eq!(
            OracleDialect.paginate(0, 10),
            "OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_wrap_literal_strips_terminator() {
        assert_eq!(OracleDialect.wrap_literal("status = 'x';  "), "status = 'x'");
        assert_eq!(OracleDialect.wrap_literal("a = 1"), "a = 1");
    }

    #[test]
    fn test_booleans_render_as_numbers() {
        assert_eq!(OracleDialect.escape_value(&serde_json::json!(true)), "1");
        assert_eq!(OracleDialect.escape_value(&serde_json::json!(false)), "0");
    }

    #[test]
    fn test_unscoped_lookup_uses_current_schema() {
        let sql = OracleDialect.primary_keys_sql(None, "ORDERS");
        assert!(sql.contains("c.owner = SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA')"));
        assert!(sql.contains("c.table_name = 'ORDERS'"));
    }

    #[test]
    fn test_materialized_views_are_listed_from_mviews() {
        let sql = OracleDialect
            .entities_sql(EntityType::MaterializedView, &ListFilter::default())
            .unwrap();
        assert!(sql.contains("FROM all_mviews"));
        let tables = OracleDialect
            .entities_sql(EntityType::Table, &ListFilter::default())
            .unwrap();
        assert!(tables.contains("NOT IN (SELECT owner, mview_name FROM all_mviews)"));
    }

    #[test]
    fn test_no_server_cursor() {
        assert!(OracleDialect.declare_cursor("c", "SELECT 1 FROM dual").is_none());
        assert!(!OracleDialect.features().cursors);
    }

    #[test]
    fn test_ilike_is_emulated() {
        assert_eq!(
            OracleDialect.case_insensitive_like("\"NAME\"", "'%a%'"),
            "UPPER(\"NAME\") LIKE UPPER('%a%')"
        );
    }
}
