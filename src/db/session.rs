//! The seam between the engine-neutral layer and a concrete driver.
//!
//! A [`Session`] is one live connection, exclusively held by whoever took it
//! out of the pool. Everything above this module (executor, cursors,
//! introspection, change sets) speaks only these two calls.

use async_trait::async_trait;

use super::error::Result;
use super::query::RawResult;

#[async_trait]
pub trait Session: Send + Sync {
    /// Run a statement that produces rows. Column descriptors are returned
    /// even when no row matches.
    async fn fetch(&self, sql: &str) -> Result<RawResult>;

    /// Run a statement for its side effect and return the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Out-of-band interrupt for the statement currently running on this
    /// session, when the engine offers one.
    fn interrupt_handle(&self) -> Option<Box<dyn Interrupt>>;
}

#[async_trait]
pub trait Interrupt: Send + Sync {
    async fn interrupt(&self) -> Result<()>;
}
