//! Capability interface consumed from an underlying database client.
//!
//! The handle only ever talks to a database through these three traits. An adapter maps its
//! client's failures onto [`DriverError`] kinds and reports transaction state through
//! [`TransactionStatus`]; everything the handle decides (reconnect, retry, surface) follows
//! from those two signals.

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::DriverError;
use crate::types::{RowValues, TransactionStatus};

/// What a driver is asked to connect with.
#[derive(Debug, Clone, Copy)]
pub enum ConnectTarget<'a> {
    /// The structured parameters, mapped field by field onto the client's own config type.
    Structured(&'a ConnectionConfig),
    /// A literal `key='value' ...` connection string. Only used after the structured form
    /// failed with [`crate::DriverErrorKind::BadSyntax`].
    KeywordDsn(&'a str),
}

#[async_trait]
pub trait Driver: Send + Sync {
    type Connection: PhysicalConnection;

    /// Open a new physical connection.
    ///
    /// Errors should be classified as `Auth`, `Unreachable`, `BadSyntax`, or `Other`.
    async fn connect(&self, target: ConnectTarget<'_>) -> Result<Self::Connection, DriverError>;
}

#[async_trait]
pub trait PhysicalConnection: Send {
    type Cursor: Cursor;

    /// Obtain a per-statement cursor. A closed or broken client reports
    /// `DriverErrorKind::InterfaceBroken` without touching the network.
    fn cursor(&mut self) -> Result<Self::Cursor, DriverError>;

    fn transaction_status(&self) -> TransactionStatus;

    async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Release the connection. Must be a no-op on an already closed connection.
    async fn close(&mut self);
}

#[async_trait]
pub trait Cursor: Send {
    async fn execute(&mut self, statement: &str, params: &[RowValues]) -> Result<(), DriverError>;

    async fn execute_many(
        &mut self,
        statement: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<(), DriverError>;

    /// Column names of the last executed statement, `None` when it produced no result columns.
    fn description(&self) -> Option<&[String]>;

    async fn fetch_all(&mut self) -> Result<Vec<Vec<RowValues>>, DriverError>;

    /// Transaction status of the connection this cursor was opened on.
    fn transaction_status(&self) -> TransactionStatus;

    fn close(&mut self);
}
