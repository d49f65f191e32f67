//! The uniform client contract over one configured connection.

use deadpool::managed::{Manager, Object};
use std::future::Future;
use tracing::{debug, info, info_span, Instrument, Span};

use super::changes::{build_change_script, TableChanges};
use super::connection::ConnectionConfig;
use super::cursor::{StreamCursor, StreamResults};
use super::error::{Error, Result, StructuredError};
use super::executor::{run_batch, run_statement, statements_of, CancelableQuery};
use super::pool::{ConnectionPool, ConnectionState, PoolStatus};
use super::postgres::PgManager;
use super::query::{Outcome, QueryResult};
use super::schema::{self, *};
use super::session::Session;
use crate::sql::{build_select, Dialect, SelectRequest, Statement, SupportedFeatures};

/// A pool manager that can be built from a connection configuration.
pub trait Connector: Manager<Error = Error> + Sized {
    fn connect_config(config: &ConnectionConfig) -> Result<Self>;
}

impl Connector for PgManager {
    fn connect_config(config: &ConnectionConfig) -> Result<Self> {
        PgManager::from_config(config)
    }
}

pub struct DbClient<M: Manager = PgManager> {
    config: ConnectionConfig,
    dialect: &'static dyn Dialect,
    pool: ConnectionPool<M>,
    span: Span,
}

impl<M: Manager> DbClient<M> {
    pub fn new(config: ConnectionConfig) -> Self {
        let span = info_span!("db", connection = %config.name, engine = %config.engine);
        Self {
            dialect: config.engine.dialect(),
            config,
            pool: ConnectionPool::new(),
            span,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect
    }

    pub fn state(&self) -> ConnectionState {
        self.pool.state()
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn supported_features(&self) -> SupportedFeatures {
        self.dialect.features()
    }

    /// SQL `select_top` would run, without running it.
    pub fn select_top_sql(&self, request: &SelectRequest) -> Result<String> {
        build_select(self.dialect, &self.scoped(request))
    }

    /// Schema of a single named table: the caller's, then the configured
    /// default, then the dialect's. Every lookup on one table resolves here so
    /// columns, keys and indexes describe the same relation.
    fn schema<'a>(&'a self, schema: Option<&'a str>) -> Option<&'a str> {
        schema
            .or(self.config.default_schema.as_deref())
            .or(self.dialect.default_schema())
    }

    fn scoped(&self, request: &SelectRequest) -> SelectRequest {
        let mut request = request.clone();
        if request.schema.is_none() {
            request.schema = self.schema(None).map(str::to_string);
        }
        request
    }

    /// Listings only take the configured default; without one they span
    /// every user schema.
    fn scoped_filter(&self, filter: &ListFilter) -> ListFilter {
        let mut filter = filter.clone();
        if filter.schema.is_none() {
            filter.schema = self.config.default_schema.clone();
        }
        filter
    }
}

impl<M> DbClient<M>
where
    M: Connector,
    M::Type: Session,
{
    /// Build a manager from the stored configuration and open the pool.
    pub async fn connect(&self) -> Result<()> {
        let manager = M::connect_config(&self.config)?;
        self.connect_with(manager).await
    }
}

impl<M> DbClient<M>
where
    M: Manager<Error = Error>,
    M::Type: Session,
{
    pub async fn connect_with(&self, manager: M) -> Result<()> {
        async {
            self.pool.connect(manager, &self.config.pool).await?;
            info!(server = %self.config.display_string(), "connected");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.pool.disconnect().instrument(self.span.clone()).await
    }

    async fn with_session<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Object<M>, &'static dyn Dialect) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        async {
            let session = self.pool.acquire().await?;
            debug!(op, "session acquired");
            f(session, self.dialect).await
        }
        .instrument(self.span.clone())
        .await
    }

    pub async fn version_string(&self) -> Result<String> {
        self.with_session("version", |s, d| async move {
            let raw = s.fetch(d.version_sql()).await?;
            Ok(raw
                .rows
                .first()
                .and_then(|row| row.first())
                .and_then(|v| v.as_text())
                .unwrap_or_default())
        })
        .await
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.with_session("list_databases", |s, d| async move {
            schema::list_databases(&*s, d).await
        })
        .await
    }

    pub async fn list_schemas(&self, filter: &ListFilter) -> Result<Vec<String>> {
        self.with_session("list_schemas", |s, d| async move {
            schema::list_schemas(&*s, d, filter).await
        })
        .await
    }

    async fn entities(&self, kind: EntityType, filter: &ListFilter) -> Result<Vec<TableOrView>> {
        let filter = self.scoped_filter(filter);
        self.with_session("list_entities", |s, d| async move {
            schema::list_entities(&*s, d, kind, &filter).await
        })
        .await
    }

    pub async fn list_tables(&self, filter: &ListFilter) -> Result<Vec<TableOrView>> {
        self.entities(EntityType::Table, filter).await
    }

    pub async fn list_views(&self, filter: &ListFilter) -> Result<Vec<TableOrView>> {
        self.entities(EntityType::View, filter).await
    }

    pub async fn list_materialized_views(&self, filter: &ListFilter) -> Result<Vec<TableOrView>> {
        self.entities(EntityType::MaterializedView, filter).await
    }

    /// Columns of `table`, or of every table in the schema when `table` is `None`.
    pub async fn list_columns(
        &self,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<Column>> {
        let schema = self.schema(schema);
        self.with_session("list_columns", |s, d| async move {
            schema::list_columns(&*s, d, schema, table).await
        })
        .await
    }

    pub async fn list_indexes(&self, schema: Option<&str>, table: &str) -> Result<Vec<Index>> {
        let schema = self.schema(schema);
        self.with_session("list_indexes", |s, d| async move {
            schema::list_indexes(&*s, d, schema, table).await
        })
        .await
    }

    pub async fn get_primary_keys(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<PrimaryKeyColumn>> {
        let schema = self.schema(schema);
        self.with_session("get_primary_keys", |s, d| async move {
            schema::get_primary_keys(&*s, d, schema, table).await
        })
        .await
    }

    /// The key column when the table has exactly one; `None` for composite
    /// or missing keys.
    pub async fn get_primary_key(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Option<String>> {
        let keys = self.get_primary_keys(schema, table).await?;
        Ok(single_primary_key(&keys))
    }

    pub async fn list_foreign_keys(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ForeignKeyRelation>> {
        let schema = self.schema(schema);
        self.with_session("list_foreign_keys", |s, d| async move {
            schema::list_foreign_keys(&*s, d, schema, table).await
        })
        .await
    }

    /// Foreign keys in other tables that point at `table`.
    pub async fn list_incoming_keys(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ForeignKeyRelation>> {
        let schema = self.schema(schema);
        self.with_session("list_incoming_keys", |s, d| async move {
            schema::list_incoming_keys(&*s, d, schema, table).await
        })
        .await
    }

    pub async fn list_triggers(&self, schema: Option<&str>, table: &str) -> Result<Vec<Trigger>> {
        let schema = self.schema(schema);
        self.with_session("list_triggers", |s, d| async move {
            schema::list_triggers(&*s, d, schema, table).await
        })
        .await
    }

    pub async fn list_routines(&self, filter: &ListFilter) -> Result<Vec<Routine>> {
        let filter = self.scoped_filter(filter);
        self.with_session("list_routines", |s, d| async move {
            schema::list_routines(&*s, d, &filter).await
        })
        .await
    }

    pub async fn get_table_properties(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<TableProperties> {
        let schema = self.schema(schema);
        self.with_session("get_table_properties", |s, d| async move {
            schema::get_table_properties(&*s, d, schema, table).await
        })
        .await
    }

    /// Exact row count.
    pub async fn get_table_length(&self, schema: Option<&str>, table: &str) -> Result<u64> {
        let request = SelectRequest::new(self.schema(schema), table).counting();
        self.with_session("get_table_length", |s, d| async move {
            count_rows(&*s, d, &request).await
        })
        .await
    }

    /// `CREATE TABLE` text rebuilt from the introspected columns and key.
    pub async fn get_table_ddl(&self, schema: Option<&str>, table: &str) -> Result<String> {
        let schema = self.schema(schema);
        self.with_session("get_table_ddl", |s, d| async move {
            let columns = schema::list_columns(&*s, d, schema, Some(table)).await?;
            let keys = schema::get_primary_keys(&*s, d, schema, table).await?;
            Ok(table_ddl(d, schema, table, &columns, &keys))
        })
        .await
    }

    // -----------------------------------------------------------------
    // Reads and ad hoc statements
    // -----------------------------------------------------------------

    pub async fn select_top(&self, request: &SelectRequest) -> Result<QueryResult> {
        let sql = self.select_top_sql(request)?;
        self.with_session("select_top", |s, d| async move {
            run_statement(&*s, d, &Statement::parse(sql, d)).await
        })
        .await
    }

    /// Stream a table through a cursor; `total_rows` comes from a count of
    /// the same filters.
    pub async fn select_top_stream(
        &self,
        request: &SelectRequest,
        chunk_size: usize,
    ) -> Result<StreamResults<M>> {
        let request = self.scoped(request);
        let sql = build_select(self.dialect, &request)?;
        async {
            if !self.dialect.features().cursors {
                return Err(Error::not_implemented(self.dialect.name(), "cursor streaming"));
            }
            let session = self.pool.acquire().await?;
            let total = count_rows(&*session, self.dialect, &request.counting()).await?;
            let (cursor, fields) =
                StreamCursor::open(session, self.dialect, &sql, chunk_size).await?;
            Ok(StreamResults {
                fields,
                total_rows: Some(total),
                cursor,
            })
        }
        .instrument(self.span.clone())
        .await
    }

    /// A cancelable run of `text`. Nothing executes until [`CancelableQuery::run`].
    pub fn query(&self, text: &str) -> Result<CancelableQuery<'_, M>> {
        Ok(CancelableQuery::new(
            &self.pool,
            self.dialect,
            statements_of(text, self.dialect)?,
        ))
    }

    pub async fn execute_query(&self, text: &str) -> Result<Outcome<Vec<QueryResult>>> {
        self.query(text)?.run().instrument(self.span.clone()).await
    }

    /// Run the first statement of `text`.
    pub async fn execute_single(&self, text: &str) -> Result<QueryResult> {
        let statement = statements_of(text, self.dialect)?.swap_remove(0);
        self.with_session("execute_single", |s, d| async move {
            run_statement(&*s, d, &statement).await
        })
        .await
    }

    /// Run every statement of `text` in order as one transaction.
    pub async fn execute_multiple(&self, text: &str) -> Result<Vec<QueryResult>> {
        let statements = statements_of(text, self.dialect)?;
        self.with_session("execute_multiple", |s, d| async move {
            run_batch(&*s, d, &statements).await
        })
        .await
    }

    /// Stream the first statement of `text` through a cursor. The total is unknown.
    pub async fn execute_stream(&self, text: &str, chunk_size: usize) -> Result<StreamResults<M>> {
        let statement = statements_of(text, self.dialect)?.swap_remove(0);
        async {
            if !self.dialect.features().cursors {
                return Err(Error::not_implemented(self.dialect.name(), "cursor streaming"));
            }
            let session = self.pool.acquire().await?;
            let (cursor, fields) =
                StreamCursor::open(session, self.dialect, statement.executable_text(), chunk_size)
                    .await?;
            Ok(StreamResults {
                fields,
                total_rows: None,
                cursor,
            })
        }
        .instrument(self.span.clone())
        .await
    }

    pub async fn query_stream(&self, text: &str, chunk_size: usize) -> Result<StreamResults<M>> {
        self.execute_stream(text, chunk_size).await
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Apply a change set atomically and return the re-read state of every
    /// updated row, in update order.
    pub async fn apply_changes(&self, changes: &TableChanges) -> Result<Vec<QueryResult>> {
        if changes.is_empty() {
            return Ok(vec![]);
        }
        let script = build_change_script(self.dialect, changes)?;
        self.with_session("apply_changes", |s, d| async move {
            let mut results = run_batch(&*s, d, &script.statements).await?;
            let first = results.len().saturating_sub(script.reselects);
            Ok(results.split_off(first))
        })
        .await
    }

    pub async fn truncate_table(&self, schema: Option<&str>, table: &str) -> Result<u64> {
        let sql = self.dialect.truncate_sql(self.schema(schema), table);
        self.with_session("truncate_table", |s, d| async move {
            s.execute(&sql).await.map_err(|e| d.rewrite_error(e))
        })
        .await
    }

    pub async fn drop_entity(
        &self,
        kind: EntityType,
        schema: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let Some(sql) = self.dialect.drop_sql(kind, self.schema(schema), name) else {
            return Err(Error::not_implemented(self.dialect.name(), "drop"));
        };
        self.with_session("drop_entity", |s, d| async move {
            s.execute(&sql).await.map_err(|e| d.rewrite_error(e))?;
            Ok(())
        })
        .await
    }
}

async fn count_rows<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    request: &SelectRequest,
) -> Result<u64> {
    let raw = session
        .fetch(&build_select(dialect, request)?)
        .await
        .map_err(|e| dialect.rewrite_error(e))?;
    let total = raw
        .readers()
        .next()
        .and_then(|r| r.int(dialect.count_alias()))
        .map(|n| n.max(0) as u64)
        .ok_or_else(|| {
            Error::Statement(StructuredError::from_string("count query returned no rows"))
        });
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::PoolSettings;
    use crate::db::query::{CellValue, ColumnInfo, RawResult};
    use crate::db::testing::{MockEngine, MockManager, MockReply};
    use crate::sql::{Engine, Filter, FilterOp, Filters, OrderBy};
    use serde_json::json;
    use std::sync::Arc;

    fn config(engine: Engine) -> ConnectionConfig {
        ConnectionConfig {
            name: "test".to_string(),
            engine,
            pool: PoolSettings {
                min: 0,
                max: 2,
                acquire_timeout_secs: None,
            },
            ..ConnectionConfig::default()
        }
    }

    fn rows(columns: &[&str], values: Vec<Vec<CellValue>>) -> MockReply {
        MockReply::Rows(RawResult {
            columns: columns.iter().map(|c| ColumnInfo::new(*c, "text")).collect(),
            rows: values,
        })
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    async fn client(engine: Engine, mock: Arc<MockEngine>) -> DbClient<MockManager> {
        let client = DbClient::new(config(engine));
        client.connect_with(MockManager::new(mock)).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_select_top_renders_and_runs() {
        let mock = MockEngine::new(|sql| {
            if sql.starts_with("SELECT") {
                Ok(rows(&["id", "status"], vec![vec![CellValue::Int32(9), text("paid")]]))
            } else {
                Ok(MockReply::Affected(0))
            }
        })
        .shared();
        let client = client(Engine::Postgres, mock.clone()).await;

        let mut request = SelectRequest::new(Some("public"), "orders").page(0, 10);
        request.order_by = vec![OrderBy::Spec {
            field: "id".to_string(),
            direction: SortDirection::Desc,
        }];
        request.filters = Some(Filters::all(vec![Filter::new(
            "status",
            FilterOp::Eq,
            json!("paid"),
        )]));

        let result = client.select_top(&request).await.unwrap();
        assert_eq!(
            result.command,
            "SELECT * FROM \"public\".\"orders\" WHERE \"status\" = 'paid' \
             ORDER BY \"id\" DESC LIMIT 10 OFFSET 0"
        );
        assert_eq!(result.fields[1].name, "status");
        assert_eq!(mock.statements(), vec![result.command.clone()]);
        assert_eq!(client.pool_status().available, client.pool_status().size);
    }

    #[tokio::test]
    async fn test_default_schema_fills_requests() {
        let mut config = config(Engine::Postgres);
        config.default_schema = Some("sales".to_string());
        let client: DbClient<MockManager> = DbClient::new(config);
        let sql = client.select_top_sql(&SelectRequest::new(None, "orders")).unwrap();
        assert_eq!(sql, "SELECT * FROM \"sales\".\"orders\"");
    }

    #[tokio::test]
    async fn test_unqualified_table_lookups_share_one_schema() {
        let mock = MockEngine::new(|sql| {
            if sql.contains("information_schema.columns") {
                Ok(rows(
                    &[
                        "ordinal_position",
                        "schema_name",
                        "table_name",
                        "column_name",
                        "data_type",
                        "nullable",
                        "default_value",
                        "generated",
                    ],
                    vec![vec![
                        CellValue::Int32(1),
                        text("public"),
                        text("orders"),
                        text("id"),
                        text("integer"),
                        CellValue::Bool(false),
                        CellValue::Null,
                        CellValue::Bool(false),
                    ]],
                ))
            } else {
                Ok(rows(
                    &["column_name", "position"],
                    vec![vec![text("id"), CellValue::Int32(1)]],
                ))
            }
        })
        .shared();
        let client = client(Engine::Postgres, mock.clone()).await;

        let ddl = client.get_table_ddl(None, "orders").await.unwrap();
        assert!(ddl.starts_with("CREATE TABLE \"public\".\"orders\""));
        let log = mock.statements();
        assert_eq!(log.len(), 2);
        assert!(log[0].contains("c.table_schema = 'public' AND c.table_name = 'orders'"));
        assert!(log[1].contains("n.nspname = 'public' AND t.relname = 'orders'"));
        assert_eq!(
            client.select_top_sql(&SelectRequest::new(None, "orders")).unwrap(),
            "SELECT * FROM \"public\".\"orders\""
        );
    }

    #[tokio::test]
    async fn test_composite_key_has_no_single_key() {
        let mock = MockEngine::new(|_| {
            Ok(rows(
                &["column_name", "position"],
                vec![
                    vec![text("order_id"), CellValue::Int32(1)],
                    vec![text("line_no"), CellValue::Int32(2)],
                ],
            ))
        })
        .shared();
        let client = client(Engine::Postgres, mock).await;

        let keys = client.get_primary_keys(Some("public"), "order_lines").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!((keys[0].position, keys[1].position), (1, 2));
        assert_eq!(client.get_primary_key(Some("public"), "order_lines").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_apply_changes_returns_reselects_only() {
        let mock = MockEngine::new(|sql| {
            if sql.starts_with("SELECT") {
                Ok(rows(&["id", "name"], vec![vec![CellValue::Int32(7), text("Carl")]]))
            } else {
                Ok(MockReply::Affected(1))
            }
        })
        .shared();
        let client = client(Engine::Postgres, mock.clone()).await;
        let changes: TableChanges = serde_json::from_value(json!({
            "inserts": [{"table": "people", "data": [{"name": "Ann"}]}],
            "updates": [{"table": "people", "primaryKeys": [{"column": "id", "value": 7}],
                         "changes": {"name": "Carl"}}],
            "deletes": [{"table": "people", "primaryKeys": [{"column": "id", "value": 9}]}]
        }))
        .unwrap();

        let results = client.apply_changes(&changes).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rows[0][1], text("Carl"));

        let log = mock.statements();
        assert_eq!(log.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(log.last().map(String::as_str), Some("COMMIT"));
        assert_eq!(log.len(), 6);
    }

    #[tokio::test]
    async fn test_apply_changes_failure_commits_nothing() {
        let mock = MockEngine::new(|sql| {
            if sql.starts_with("DELETE") {
                Err(Error::Statement(
                    StructuredError::from_string("violates foreign key constraint")
                        .with_code("23503"),
                ))
            } else {
                Ok(MockReply::Affected(1))
            }
        })
        .shared();
        let client = client(Engine::Postgres, mock.clone()).await;
        let changes: TableChanges = serde_json::from_value(json!({
            "inserts": [{"table": "people", "data": [{"name": "Ann"}]}],
            "deletes": [{"table": "people", "primaryKeys": [{"column": "id", "value": 1}]}]
        }))
        .unwrap();

        let err = client.apply_changes(&changes).await.unwrap_err();
        assert!(matches!(err, Error::Batch { index: 1, .. }));
        let log = mock.statements();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.iter().any(|s| s == "COMMIT"));
        assert_eq!(client.pool_status().available, client.pool_status().size);
    }

    #[tokio::test]
    async fn test_empty_change_set_touches_nothing() {
        let mock = MockEngine::new(|_| Ok(MockReply::Affected(0))).shared();
        let client: DbClient<MockManager> = DbClient::new(config(Engine::Postgres));
        // not even connected: the pool is never consulted
        assert!(client.apply_changes(&TableChanges::default()).await.unwrap().is_empty());
        assert!(mock.statements().is_empty());
    }

    #[tokio::test]
    async fn test_select_top_stream_counts_then_streams() {
        let mock = MockEngine::new(|sql| {
            if sql.starts_with("SELECT COUNT(*)") {
                Ok(MockReply::Rows(RawResult {
                    columns: vec![ColumnInfo::new("total", "int8")],
                    rows: vec![vec![CellValue::Int64(3)]],
                }))
            } else if sql.starts_with("FETCH FORWARD 0") {
                Ok(rows(&["id"], vec![]))
            } else if sql.starts_with("FETCH") {
                Ok(rows(&["id"], vec![vec![text("1")], vec![text("2")], vec![text("3")]]))
            } else {
                Ok(MockReply::Affected(0))
            }
        })
        .shared();
        let client = client(Engine::Postgres, mock.clone()).await;

        let mut stream = client
            .select_top_stream(&SelectRequest::new(Some("public"), "t"), 10)
            .await
            .unwrap();
        assert_eq!(stream.total_rows, Some(3));
        assert_eq!(stream.fields[0].id, "c0");
        // the cursor holds the only session
        assert_eq!(client.pool_status().size, 1);
        assert_eq!(client.pool_status().available, 0);
        assert_eq!(stream.cursor.fetch().await.unwrap().len(), 3);
        assert!(stream.cursor.is_closed());
        assert_eq!(client.pool_status().available, client.pool_status().size);
    }

    #[tokio::test]
    async fn test_oracle_stream_is_not_implemented() {
        let mock = MockEngine::new(|_| Ok(MockReply::Affected(0))).shared();
        let client = client(Engine::Oracle, mock.clone()).await;
        let err = client.execute_stream("SELECT 1 FROM dual", 100).await.err().unwrap();
        assert!(err.is_not_implemented());
        assert!(mock.statements().is_empty());
        assert!(!client.supported_features().cursors);
    }

    #[tokio::test]
    async fn test_execute_single_runs_first_statement() {
        let mock = MockEngine::new(|_| Ok(MockReply::Affected(2))).shared();
        let client = client(Engine::Postgres, mock.clone()).await;
        let result = client
            .execute_single("UPDATE a SET x = 1; UPDATE b SET y = 2;")
            .await
            .unwrap();
        assert_eq!(result.affected_rows, Some(2));
        assert_eq!(mock.statements(), vec!["UPDATE a SET x = 1"]);
    }

    #[tokio::test]
    async fn test_table_length_counts_rows() {
        let mock = MockEngine::new(|sql| {
            if sql.starts_with("SELECT COUNT(*)") {
                Ok(MockReply::Rows(RawResult {
                    columns: vec![ColumnInfo::new("total", "int8")],
                    rows: vec![vec![CellValue::Int64(42)]],
                }))
            } else {
                Ok(MockReply::Affected(0))
            }
        })
        .shared();
        let client = client(Engine::Postgres, mock.clone()).await;
        assert_eq!(client.get_table_length(Some("public"), "t").await.unwrap(), 42);
        assert_eq!(
            mock.statements()[0],
            "SELECT COUNT(*) AS total FROM \"public\".\"t\""
        );
    }

    #[tokio::test]
    async fn test_oracle_connect_is_not_implemented() {
        let client: DbClient = DbClient::new(config(Engine::Oracle));
        let err = client.connect().await.unwrap_err();
        assert!(err.is_not_implemented());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_then_operations_fail() {
        let mock = MockEngine::new(|_| Ok(MockReply::Affected(0))).shared();
        let client = client(Engine::Postgres, mock).await;
        client.disconnect().await.unwrap();
        let err = client.list_databases().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }
}
