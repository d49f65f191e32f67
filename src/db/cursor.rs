//! Server-side cursor streaming.
//!
//! The cursor owns its pooled session for its whole life. The session goes
//! back to the pool exactly once: when a short chunk ends the stream, when
//! the caller closes early, or when the cursor is dropped.

use deadpool::managed::{Manager, Object};
use tracing::{debug, warn};

use super::error::{Error, Result};
use super::query::{fields_from_columns, CellValue, Field};
use super::session::Session;
use crate::sql::Dialect;

const CURSOR_NAME: &str = "sqlbridge_cursor";

pub struct StreamResults<M: Manager> {
    pub fields: Vec<Field>,
    /// Known up front only for table streams, where it comes from a count query.
    pub total_rows: Option<u64>,
    pub cursor: StreamCursor<M>,
}

pub struct StreamCursor<M: Manager> {
    session: Option<Object<M>>,
    dialect: &'static dyn Dialect,
    chunk_size: usize,
    name: String,
}

impl<M> StreamCursor<M>
where
    M: Manager,
    M::Type: Session,
{
    /// Declare a cursor for `sql` on `session` and describe its columns
    /// without consuming a row.
    pub async fn open(
        session: Object<M>,
        dialect: &'static dyn Dialect,
        sql: &str,
        chunk_size: usize,
    ) -> Result<(Self, Vec<Field>)> {
        let Some(declare) = dialect.declare_cursor(CURSOR_NAME, sql) else {
            return Err(Error::not_implemented(dialect.name(), "cursor streaming"));
        };

        let mut cursor = Self {
            session: Some(session),
            dialect,
            chunk_size: chunk_size.max(1),
            name: CURSOR_NAME.to_string(),
        };

        let fields = match cursor.declare(&declare).await {
            Ok(fields) => fields,
            Err(e) => {
                cursor.abandon().await;
                return Err(e);
            }
        };
        debug!(chunk_size = cursor.chunk_size, "cursor opened");
        Ok((cursor, fields))
    }

    async fn declare(&self, declare: &str) -> Result<Vec<Field>> {
        let session = self.session()?;
        if let Some(begin) = self.dialect.begin_transaction() {
            session.execute(begin).await?;
        }
        session
            .execute(declare)
            .await
            .map_err(|e| self.dialect.rewrite_error(e))?;
        let described = session.fetch(&self.dialect.fetch_cursor(&self.name, 0)).await?;
        Ok(fields_from_columns(&described.columns))
    }

    fn session(&self) -> Result<&M::Type> {
        self.session.as_deref().ok_or(Error::CursorClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// Next chunk of rows. A chunk shorter than the chunk size is the last
    /// one and closes the cursor; fetching after that fails with
    /// [`Error::CursorClosed`].
    pub async fn fetch(&mut self) -> Result<Vec<Vec<CellValue>>> {
        let sql = self.dialect.fetch_cursor(&self.name, self.chunk_size);
        let result = self.session()?.fetch(&sql).await;
        match result {
            Ok(raw) => {
                if raw.rows.len() < self.chunk_size {
                    self.close().await?;
                }
                Ok(raw.rows)
            }
            Err(e) => {
                self.abandon().await;
                Err(self.dialect.rewrite_error(e))
            }
        }
    }

    /// Close the cursor, commit the read transaction and release the session.
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session.execute(&self.dialect.close_cursor(&self.name)).await?;
        session.execute(self.dialect.commit()).await?;
        debug!("cursor closed");
        Ok(())
    }

    /// Release after a failure: roll back whatever is open and drop the session.
    async fn abandon(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.execute(self.dialect.rollback()).await {
                warn!(error = %e, "rollback of failed cursor failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::PoolSettings;
    use crate::db::error::StructuredError;
    use crate::db::pool::ConnectionPool;
    use crate::db::query::{ColumnInfo, RawResult};
    use crate::db::testing::{MockEngine, MockManager, MockReply};
    use crate::sql::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TOTAL: usize = 10_000;

    /// A table of `TOTAL` integers served through FETCH FORWARD.
    fn numbers_engine() -> Arc<MockEngine> {
        let position = AtomicUsize::new(0);
        MockEngine::new(move |sql| {
            let columns = vec![ColumnInfo::new("n", "int4")];
            if let Some(rest) = sql.strip_prefix("FETCH FORWARD ") {
                let count: usize = rest
                    .split_whitespace()
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0);
                let start = position.load(Ordering::SeqCst);
                let end = (start + count).min(TOTAL);
                position.store(end, Ordering::SeqCst);
                let rows = (start..end).map(|i| vec![CellValue::Int64(i as i64)]).collect();
                return Ok(MockReply::Rows(RawResult { columns, rows }));
            }
            Ok(MockReply::Affected(0))
        })
        .shared()
    }

    async fn pool(engine: Arc<MockEngine>) -> ConnectionPool<MockManager> {
        let pool = ConnectionPool::new();
        let settings = PoolSettings {
            min: 0,
            max: 1,
            acquire_timeout_secs: None,
        };
        pool.connect(MockManager::new(engine), &settings).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_stream_ten_thousand_rows_in_chunks() {
        let engine = numbers_engine();
        let pool = pool(engine.clone()).await;
        let dialect = Engine::Postgres.dialect();

        let session = pool.acquire().await.unwrap();
        let (mut cursor, fields) =
            StreamCursor::open(session, dialect, "SELECT n FROM numbers", 500)
                .await
                .unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "n");

        let mut full_chunks = 0;
        let mut seen = 0;
        loop {
            let rows = cursor.fetch().await.unwrap();
            seen += rows.len();
            if rows.len() == 500 {
                full_chunks += 1;
            } else {
                assert!(rows.is_empty());
                break;
            }
        }
        assert_eq!(full_chunks, 20);
        assert_eq!(seen, TOTAL);
        assert!(cursor.is_closed());
        assert!(matches!(cursor.fetch().await, Err(Error::CursorClosed)));

        let log = engine.statements();
        assert_eq!(log[0], "BEGIN");
        assert!(log[1].starts_with("DECLARE \"sqlbridge_cursor\" NO SCROLL CURSOR FOR SELECT n"));
        assert_eq!(log[2], "FETCH FORWARD 0 FROM \"sqlbridge_cursor\"");
        assert_eq!(&log[log.len() - 2..], ["CLOSE \"sqlbridge_cursor\"", "COMMIT"]);

        // the single pooled session is free again
        assert_eq!(pool.status().available, 1);
        drop(pool.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_early_close_releases_session_once() {
        let pool = pool(numbers_engine()).await;
        let session = pool.acquire().await.unwrap();
        let dialect = Engine::Postgres.dialect();
        let (mut cursor, _) = StreamCursor::open(session, dialect, "SELECT n FROM numbers", 100)
            .await
            .unwrap();
        assert_eq!(cursor.fetch().await.unwrap().len(), 100);
        cursor.close().await.unwrap();
        cursor.close().await.unwrap();
        assert_eq!(pool.status().available, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_closes_cursor() {
        let engine = MockEngine::new(|sql| {
            if sql.starts_with("FETCH FORWARD 0") {
                Ok(MockReply::Rows(RawResult {
                    columns: vec![ColumnInfo::new("n", "int4")],
                    rows: vec![],
                }))
            } else if sql.starts_with("FETCH") {
                Err(Error::Statement(
                    StructuredError::from_string("division by zero").with_code("22012"),
                ))
            } else {
                Ok(MockReply::Affected(0))
            }
        })
        .shared();
        let pool = pool(engine.clone()).await;
        let session = pool.acquire().await.unwrap();
        let (mut cursor, _) =
            StreamCursor::open(session, Engine::Postgres.dialect(), "SELECT 1 / 0", 10)
                .await
                .unwrap();
        assert!(matches!(cursor.fetch().await, Err(Error::Statement(_))));
        assert!(cursor.is_closed());
        assert_eq!(engine.statements().last().map(String::as_str), Some("ROLLBACK"));
        assert_eq!(pool.status().available, 1);
    }

    #[tokio::test]
    async fn test_dialect_without_cursors() {
        let pool = pool(numbers_engine()).await;
        let session = pool.acquire().await.unwrap();
        let err = StreamCursor::open(session, Engine::Oracle.dialect(), "SELECT 1 FROM dual", 10)
            .await
            .err()
            .unwrap();
        assert!(err.is_not_implemented());
        assert_eq!(pool.status().available, 1);
    }
}
