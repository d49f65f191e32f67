//! Statement execution on a single session.

use deadpool::managed::{Manager, Object};
use std::time::Instant;
use tracing::{debug, warn};

use super::cancel::{race, CancelHandle};
use super::error::{Error, Result, StructuredError};
use super::pool::ConnectionPool;
use super::query::{Outcome, QueryResult};
use super::session::Session;
use crate::sql::{parse_script, Dialect, Statement};

/// Run one classified statement: row-returning statements are fetched,
/// everything else is executed for its affected-row count.
pub async fn run_statement<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    statement: &Statement,
) -> Result<QueryResult> {
    let sql = statement.executable_text();
    let start = Instant::now();
    debug!(kind = ?statement.kind, sql, "executing statement");

    if statement.returns_rows() {
        let raw = session
            .fetch(sql)
            .await
            .map_err(|e| locate(dialect.rewrite_error(e), sql))?;
        Ok(QueryResult::from_rows(sql, raw, start.elapsed()))
    } else {
        let affected = session
            .execute(sql)
            .await
            .map_err(|e| locate(dialect.rewrite_error(e), sql))?;
        Ok(QueryResult::from_command(sql, affected, start.elapsed()))
    }
}

fn locate(err: Error, sql: &str) -> Error {
    match err {
        Error::Statement(structured) => Error::Statement(structured.locate(sql)),
        other => other,
    }
}

/// Run statements in order inside one transaction.
///
/// The first failure rolls back and is returned wrapped with the index of
/// the failing statement; nothing is committed.
pub async fn run_batch<S: Session + ?Sized>(
    session: &S,
    dialect: &dyn Dialect,
    statements: &[Statement],
) -> Result<Vec<QueryResult>> {
    if let Some(begin) = dialect.begin_transaction() {
        session.execute(begin).await.map_err(|e| dialect.rewrite_error(e))?;
    }

    let mut results = Vec::with_capacity(statements.len());
    for (index, statement) in statements.iter().enumerate() {
        match run_statement(session, dialect, statement).await {
            Ok(result) => results.push(result),
            Err(source) => {
                if let Err(e) = session.execute(dialect.rollback()).await {
                    warn!(error = %e, "rollback after failed batch statement failed");
                }
                return Err(Error::Batch {
                    index,
                    source: Box::new(source),
                });
            }
        }
    }

    session
        .execute(dialect.commit())
        .await
        .map_err(|e| dialect.rewrite_error(e))?;
    Ok(results)
}

/// Parse `text`, returning an error for an empty script.
pub fn statements_of(text: &str, dialect: &dyn Dialect) -> Result<Vec<Statement>> {
    let statements = parse_script(text, dialect);
    if statements.is_empty() {
        return Err(Error::Statement(StructuredError::from_string(
            "no statement to execute",
        )));
    }
    Ok(statements)
}

/// A query that has not started yet, with a handle to cancel it.
///
/// A single statement runs on its own; several run as one transaction.
pub struct CancelableQuery<'a, M: Manager> {
    pool: &'a ConnectionPool<M>,
    dialect: &'static dyn Dialect,
    statements: Vec<Statement>,
    handle: CancelHandle,
}

impl<'a, M> CancelableQuery<'a, M>
where
    M: Manager<Error = Error>,
    M::Type: Session,
{
    pub fn new(
        pool: &'a ConnectionPool<M>,
        dialect: &'static dyn Dialect,
        statements: Vec<Statement>,
    ) -> Self {
        Self {
            pool,
            dialect,
            statements,
            handle: CancelHandle::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Cancel from the owner's side. See [`CancelHandle::cancel`].
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    pub async fn run(self) -> Result<Outcome<Vec<QueryResult>>> {
        if self.handle.is_canceled() {
            debug!("query canceled before start");
            return Ok(Outcome::Canceled);
        }

        // Waiting for a session claims nothing: a cancel here drops the
        // acquire, and only the statement race below may settle the handle.
        let session: Object<M> = tokio::select! {
            biased;
            _ = self.handle.canceled() => {
                debug!("query canceled while waiting for a session");
                return Ok(Outcome::Canceled);
            }
            session = self.pool.acquire() => session?,
        };

        let interrupt = session.interrupt_handle();
        let work = async {
            if self.statements.len() == 1 {
                run_statement(&*session, self.dialect, &self.statements[0])
                    .await
                    .map(|result| vec![result])
            } else {
                run_batch(&*session, self.dialect, &self.statements).await
            }
        };

        match race(work, &self.handle, interrupt.as_deref()).await {
            Outcome::Completed(result) => result.map(Outcome::Completed),
            Outcome::Canceled => Ok(Outcome::Canceled),
        }
    }
}
