//! The self-healing connection handle.
//!
//! A [`ConnectionHandle`] owns exactly one physical connection and runs every operation
//! through the same cycle:
//!
//! 1. **Health check.** Ask the physical connection for a cursor. A loud failure
//!    (`InterfaceBroken`) triggers one reconnect and one more cursor request; a quiet one
//!    (cursor obtained but the transaction status reads `Unknown`) triggers a reconnect and a
//!    fresh cursor.
//! 2. **Execute** the statement on the verified cursor. `query` materializes every row;
//!    `execute`/`execute_many` commit before returning.
//! 3. **Classify failures** by the transaction status read after the failure. `Unknown` means
//!    the transport died mid-statement: reconnect and re-issue the whole operation while the
//!    retry budget lasts. Anything else goes back to the caller untouched.
//!
//! Reconnecting discards whatever the old connection had not committed.
//!
//! All operations take `&mut self`, so one handle serves one caller at a time. Wrap it in a
//! `tokio::sync::Mutex` to share it between tasks.

use std::fmt;

use crate::config::{ConnectionConfig, HandleOptions, RetryCounterPolicy};
use crate::driver::{ConnectTarget, Cursor, Driver, PhysicalConnection};
use crate::error::{DriverError, ResilientDbError};
use crate::results::{ResultSet, Row};
use crate::types::{RowValues, TransactionStatus};

/// Cursor type produced by a driver's physical connection.
pub type CursorOf<D> = <<D as Driver>::Connection as PhysicalConnection>::Cursor;

/// State of the physical link.
enum Link<C> {
    Connected(C),
    /// No live physical connection; the next operation reconnects.
    Disconnected,
    /// Closed by the caller; every further operation is a usage error.
    Closed,
}

impl<C> Link<C> {
    fn label(&self) -> &'static str {
        match self {
            Link::Connected(_) => "connected",
            Link::Disconnected => "disconnected",
            Link::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation<'a> {
    Query {
        statement: &'a str,
        params: &'a [RowValues],
    },
    Execute {
        statement: &'a str,
        params: &'a [RowValues],
    },
    ExecuteMany {
        statement: &'a str,
        param_sets: &'a [Vec<RowValues>],
    },
}

impl Operation<'_> {
    fn name(&self) -> &'static str {
        match self {
            Operation::Query { .. } => "query",
            Operation::Execute { .. } => "execute",
            Operation::ExecuteMany { .. } => "execute_many",
        }
    }
}

/// One physical database connection with health checks, reconnect, and bounded retry.
///
/// ```rust,no_run
/// use resilient_sql::prelude::*;
///
/// # async fn run() -> Result<(), ResilientDbError> {
/// let config = ConnectionConfig::new().host("db").user("app").dbname("shop");
/// let mut conn = ConnectionHandle::postgres(config).await?;
///
/// conn.execute("INSERT INTO t (id) VALUES ($1)", &[RowValues::Int(1)]).await?;
/// if let Some(row) = conn.get("SELECT id FROM t WHERE id = $1", &[RowValues::Int(1)]).await? {
///     assert_eq!(row.field("id")?, &RowValues::Int(1));
/// }
/// conn.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionHandle<D: Driver> {
    driver: D,
    config: ConnectionConfig,
    options: HandleOptions,
    link: Link<D::Connection>,
    retry_count: u32,
}

impl<D: Driver> fmt::Debug for ConnectionHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("config", &self.config)
            .field("options", &self.options)
            .field("link", &self.link.label())
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ConnectionHandle<D> {
    /// Open a handle with default options.
    ///
    /// # Errors
    /// Returns `ConfigError` for an unresolvable database name and `ConnectionError` when the
    /// first connect fails. Construction is never retried.
    pub async fn new(driver: D, config: ConnectionConfig) -> Result<Self, ResilientDbError> {
        Self::with_options(driver, config, HandleOptions::default()).await
    }

    /// Open a handle with explicit retry options.
    ///
    /// # Errors
    /// Same as [`ConnectionHandle::new`].
    pub async fn with_options(
        driver: D,
        config: ConnectionConfig,
        options: HandleOptions,
    ) -> Result<Self, ResilientDbError> {
        let mut handle = Self {
            driver,
            config,
            options,
            link: Link::Disconnected,
            retry_count: 0,
        };
        handle.reconnect().await?;
        Ok(handle)
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn options(&self) -> &HandleOptions {
        &self.options
    }

    /// Retries consumed so far under the configured [`RetryCounterPolicy`].
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.link, Link::Closed)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected(_))
    }

    /// Transaction status of the current physical connection, if there is one.
    #[must_use]
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        match &self.link {
            Link::Connected(conn) => Some(conn.transaction_status()),
            Link::Disconnected | Link::Closed => None,
        }
    }

    /// Replace the physical connection with a new one.
    ///
    /// Closing the old connection never fails, and reconnecting without one is fine.
    ///
    /// # Errors
    /// `Closed` after [`ConnectionHandle::close`]; otherwise `ConfigError` or
    /// `ConnectionError` from opening the new connection, which leaves the handle
    /// disconnected.
    pub async fn reconnect(&mut self) -> Result<(), ResilientDbError> {
        if self.is_closed() {
            return Err(ResilientDbError::Closed);
        }
        self.release().await;

        let mut conn = self.open().await?;
        if let Err(err) = conn.set_autocommit(true).await {
            conn.close().await;
            return Err(ResilientDbError::ConnectionError(err));
        }
        self.link = Link::Connected(conn);
        tracing::debug!(host = ?self.config.host, "physical connection established");
        Ok(())
    }

    /// Close the handle. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if let Link::Connected(mut conn) = std::mem::replace(&mut self.link, Link::Closed) {
            conn.close().await;
            tracing::debug!("connection handle closed");
        }
    }

    /// Run a statement and materialize its rows.
    ///
    /// Returns `None` when the statement produces no result columns (e.g. a plain `INSERT`).
    ///
    /// # Errors
    /// `StatementError` for anything the database rejects, `RetryExhausted` when the
    /// transport keeps breaking, `ConnectionError` when a reconnect fails, `Closed` after close.
    pub async fn query(
        &mut self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<Option<ResultSet>, ResilientDbError> {
        self.run(Operation::Query { statement, params }).await
    }

    /// Run a statement expected to produce at most one row.
    ///
    /// # Errors
    /// `MultipleRows` when more than one row comes back, plus everything
    /// [`ConnectionHandle::query`] can return.
    pub async fn get(
        &mut self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<Option<Row>, ResilientDbError> {
        match self.query(statement, params).await? {
            Some(result_set) => result_set.into_single(),
            None => Ok(None),
        }
    }

    /// Run one statement and commit.
    ///
    /// # Errors
    /// Same as [`ConnectionHandle::query`].
    pub async fn execute(
        &mut self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<(), ResilientDbError> {
        self.run(Operation::Execute { statement, params }).await?;
        Ok(())
    }

    /// Run one statement once per parameter set, then commit.
    ///
    /// # Errors
    /// Same as [`ConnectionHandle::query`].
    pub async fn execute_many(
        &mut self,
        statement: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<(), ResilientDbError> {
        self.run(Operation::ExecuteMany {
            statement,
            param_sets,
        })
        .await?;
        Ok(())
    }

    /// Hand out a verified cursor. The caller owns it and is responsible for closing it;
    /// nothing run on it is retried.
    ///
    /// # Errors
    /// `Closed` after close, `ConnectionError` when the health check cannot recover.
    pub async fn cursor(&mut self) -> Result<CursorOf<D>, ResilientDbError> {
        self.ensure_connected().await
    }

    /// Commit on the current physical connection.
    ///
    /// # Errors
    /// `Closed`, `NotConnected`, or the driver's failure.
    pub async fn commit(&mut self) -> Result<(), ResilientDbError> {
        match &mut self.link {
            Link::Connected(conn) => conn.commit().await.map_err(passthrough_error),
            Link::Disconnected => Err(ResilientDbError::NotConnected),
            Link::Closed => Err(ResilientDbError::Closed),
        }
    }

    /// Roll back on the current physical connection.
    ///
    /// # Errors
    /// `Closed`, `NotConnected`, or the driver's failure.
    pub async fn rollback(&mut self) -> Result<(), ResilientDbError> {
        match &mut self.link {
            Link::Connected(conn) => conn.rollback().await.map_err(passthrough_error),
            Link::Disconnected => Err(ResilientDbError::NotConnected),
            Link::Closed => Err(ResilientDbError::Closed),
        }
    }

    async fn run(&mut self, op: Operation<'_>) -> Result<Option<ResultSet>, ResilientDbError> {
        if self.is_closed() {
            return Err(ResilientDbError::Closed);
        }
        if self.options.retry_counter == RetryCounterPolicy::PerCall {
            self.retry_count = 0;
        }

        let max_retries = self.options.max_retry_count;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut cursor = self.ensure_connected().await?;
            let outcome = self.attempt(&mut cursor, op).await;
            let status = cursor.transaction_status();
            cursor.close();

            let err = match outcome {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };
            if !status.is_unknown() {
                return Err(ResilientDbError::StatementError(err));
            }

            self.retry_count = self.retry_count.saturating_add(1);
            if self.retry_count > max_retries {
                tracing::error!(
                    attempts,
                    max_retries,
                    error = %err,
                    "transport lost during {}, retry budget exhausted",
                    op.name()
                );
                return Err(ResilientDbError::RetryExhausted {
                    attempts,
                    max_retries,
                    last: err,
                });
            }
            tracing::warn!(
                retry = self.retry_count,
                max_retries,
                error = %err,
                "transport lost during {}, reconnecting",
                op.name()
            );
            self.reconnect().await?;
        }
    }

    async fn attempt(
        &mut self,
        cursor: &mut CursorOf<D>,
        op: Operation<'_>,
    ) -> Result<Option<ResultSet>, DriverError> {
        match op {
            Operation::Query { statement, params } => {
                cursor.execute(statement, params).await?;
                let Some(description) = cursor.description().map(<[String]>::to_vec) else {
                    return Ok(None);
                };
                let raw_rows = cursor.fetch_all().await?;
                Ok(Some(ResultSet::from_raw(&description, raw_rows)))
            }
            Operation::Execute { statement, params } => {
                cursor.execute(statement, params).await?;
                self.commit_physical().await?;
                Ok(None)
            }
            Operation::ExecuteMany {
                statement,
                param_sets,
            } => {
                cursor.execute_many(statement, param_sets).await?;
                self.commit_physical().await?;
                Ok(None)
            }
        }
    }

    async fn commit_physical(&mut self) -> Result<(), DriverError> {
        match &mut self.link {
            Link::Connected(conn) => conn.commit().await,
            Link::Disconnected | Link::Closed => Err(DriverError::interface_broken(
                "physical connection dropped before commit",
            )),
        }
    }

    /// Return a cursor on a connection that is known to be usable.
    async fn ensure_connected(&mut self) -> Result<CursorOf<D>, ResilientDbError> {
        let first = match &mut self.link {
            Link::Closed => return Err(ResilientDbError::Closed),
            Link::Disconnected => None,
            Link::Connected(conn) => Some(conn.cursor()),
        };

        let mut cursor = match first {
            Some(Ok(cursor)) => cursor,
            Some(Err(err)) if err.is_interface_broken() => {
                tracing::warn!(error = %err, "connection interface broken, reconnecting");
                self.reconnect().await?;
                self.fresh_cursor()?
            }
            Some(Err(err)) => return Err(ResilientDbError::ConnectionError(err)),
            None => {
                tracing::debug!("no physical connection, reconnecting");
                self.reconnect().await?;
                self.fresh_cursor()?
            }
        };

        if cursor.transaction_status().is_unknown() {
            tracing::warn!("transaction status unknown, reconnecting");
            cursor.close();
            self.reconnect().await?;
            cursor = self.fresh_cursor()?;
        }
        Ok(cursor)
    }

    /// Cursor from a connection that was just (re)opened; failure here is fatal.
    fn fresh_cursor(&mut self) -> Result<CursorOf<D>, ResilientDbError> {
        match &mut self.link {
            Link::Connected(conn) => conn.cursor().map_err(ResilientDbError::ConnectionError),
            Link::Disconnected => Err(ResilientDbError::NotConnected),
            Link::Closed => Err(ResilientDbError::Closed),
        }
    }

    /// Drop the current physical connection, if any, leaving the link disconnected.
    async fn release(&mut self) {
        if let Link::Connected(mut conn) = std::mem::replace(&mut self.link, Link::Disconnected) {
            conn.close().await;
            tracing::debug!("previous physical connection closed");
        }
    }

    async fn open(&self) -> Result<D::Connection, ResilientDbError> {
        let dbname = self.config.resolve_dbname()?;
        match self
            .driver
            .connect(ConnectTarget::Structured(&self.config))
            .await
        {
            Ok(conn) => Ok(conn),
            Err(err) if err.is_bad_syntax() => {
                tracing::debug!(
                    dbname,
                    error = %err,
                    "structured connect rejected, retrying with keyword connection string"
                );
                let dsn = self.config.to_keyword_dsn()?;
                self.driver
                    .connect(ConnectTarget::KeywordDsn(&dsn))
                    .await
                    .map_err(ResilientDbError::ConnectionError)
            }
            Err(err) => Err(ResilientDbError::ConnectionError(err)),
        }
    }
}

fn passthrough_error(err: DriverError) -> ResilientDbError {
    if err.is_interface_broken() {
        ResilientDbError::ConnectionError(err)
    } else {
        ResilientDbError::StatementError(err)
    }
}
