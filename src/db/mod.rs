pub mod cancel;
pub mod changes;
pub mod client;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod pool;
pub mod postgres;
pub mod query;
pub mod schema;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::CancelHandle;
pub use changes::{RowDelete, RowInsert, RowUpdate, TableChanges};
pub use client::{Connector, DbClient};
pub use connection::{ConnectionConfig, PoolSettings, SslMode};
pub use cursor::{StreamCursor, StreamResults};
pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use executor::CancelableQuery;
pub use pool::{ConnectionPool, ConnectionState, PoolStatus};
pub use postgres::{PgManager, PgSession};
pub use query::{CellValue, Field, Outcome, QueryResult};
pub use schema::{
    Column, EntityType, ForeignKeyRelation, Index, IndexColumn, ListFilter, PrimaryKeyColumn,
    Routine, SortDirection, TableOrView, TableProperties, Trigger,
};
pub use session::{Interrupt, Session};
