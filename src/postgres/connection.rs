use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};

use super::config::{build_pg_config, connect_error, execution_error, severs_connection};
use super::params::Params;
use super::query::{describe, rows_to_values};
use crate::driver::{ConnectTarget, Cursor, Driver, PhysicalConnection};
use crate::error::DriverError;
use crate::types::{RowValues, TransactionStatus};

/// `tokio_postgres` driver. Connections are plaintext (`NoTls`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

#[async_trait]
impl Driver for PgDriver {
    type Connection = PgConnection;

    async fn connect(&self, target: ConnectTarget<'_>) -> Result<PgConnection, DriverError> {
        let pg_config = build_pg_config(target)?;
        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| connect_error(&e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection task ended with error");
            }
        });

        Ok(PgConnection::new(client))
    }
}

/// Session state shared between a connection and its cursors.
#[derive(Debug, Default)]
struct Session {
    /// Set once the server reported it is dropping the session.
    severed: AtomicBool,
}

impl Session {
    /// `Unknown` once the client is closed or the server said it is going away.
    fn status(&self, client: &Client) -> TransactionStatus {
        if client.is_closed() || self.severed.load(Ordering::Acquire) {
            TransactionStatus::Unknown
        } else {
            TransactionStatus::Idle
        }
    }

    /// Record what a failure means for the session and map it to a `DriverError`.
    fn failure(&self, err: &tokio_postgres::Error) -> DriverError {
        if severs_connection(err) {
            self.severed.store(true, Ordering::Release);
        }
        execution_error(err)
    }
}

/// One `tokio_postgres` client plus the session health tracked alongside it.
pub struct PgConnection {
    client: Option<Arc<Client>>,
    session: Arc<Session>,
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("open", &self.client.is_some())
            .field("session", &self.session)
            .finish()
    }
}

impl PgConnection {
    fn new(client: Client) -> Self {
        Self {
            client: Some(Arc::new(client)),
            session: Arc::new(Session::default()),
        }
    }

    /// Send `COMMIT` or `ROLLBACK` as-is. Outside a transaction the server only warns.
    async fn finish(&mut self, command: &str) -> Result<(), DriverError> {
        let Some(client) = &self.client else {
            return Err(DriverError::interface_broken("connection already closed"));
        };
        if self.session.status(client).is_unknown() {
            return Err(DriverError::interface_broken(format!(
                "cannot {command}: connection to server lost"
            )));
        }
        client
            .batch_execute(command)
            .await
            .map_err(|e| self.session.failure(&e))
    }
}

#[async_trait]
impl PhysicalConnection for PgConnection {
    type Cursor = PgCursor;

    fn cursor(&mut self) -> Result<PgCursor, DriverError> {
        match &self.client {
            Some(client) if !client.is_closed() => Ok(PgCursor {
                client: Arc::clone(client),
                session: Arc::clone(&self.session),
                description: None,
                rows: Vec::new(),
                closed: false,
            }),
            Some(_) => Err(DriverError::interface_broken("connection to server was lost")),
            None => Err(DriverError::interface_broken("connection already closed")),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        match &self.client {
            Some(client) => self.session.status(client),
            None => TransactionStatus::Unknown,
        }
    }

    /// Statements always run in autocommit mode; explicit transactions are opened with
    /// `BEGIN` on a cursor and finished with `commit`/`rollback`.
    async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), DriverError> {
        if autocommit {
            Ok(())
        } else {
            Err(DriverError::other(
                "implicit transactions are not supported; issue BEGIN explicitly",
            ))
        }
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.finish("ROLLBACK").await
    }

    async fn close(&mut self) {
        // The spawned connection task ends once the last client reference is dropped.
        self.client = None;
    }
}

/// Per-statement cursor. Rows are buffered in full by `execute` and decoded by `fetch_all`.
pub struct PgCursor {
    client: Arc<Client>,
    session: Arc<Session>,
    description: Option<Vec<String>>,
    rows: Vec<tokio_postgres::Row>,
    closed: bool,
}

impl std::fmt::Debug for PgCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCursor")
            .field("description", &self.description)
            .field("buffered_rows", &self.rows.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PgCursor {
    fn check_open(&self) -> Result<(), DriverError> {
        if self.closed {
            Err(DriverError::interface_broken("cursor already closed"))
        } else {
            Ok(())
        }
    }

    async fn run_one(&mut self, statement: &str, params: &[RowValues]) -> Result<(), DriverError> {
        let prepared = self
            .client
            .prepare(statement)
            .await
            .map_err(|e| self.session.failure(&e))?;
        let converted = Params::convert(params);

        self.description = describe(&prepared);
        if self.description.is_some() {
            self.rows = self
                .client
                .query(&prepared, converted.as_refs())
                .await
                .map_err(|e| self.session.failure(&e))?;
        } else {
            self.client
                .execute(&prepared, converted.as_refs())
                .await
                .map_err(|e| self.session.failure(&e))?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.description = None;
        self.rows.clear();
    }
}

#[async_trait]
impl Cursor for PgCursor {
    async fn execute(&mut self, statement: &str, params: &[RowValues]) -> Result<(), DriverError> {
        self.check_open()?;
        self.reset();
        self.run_one(statement, params).await
    }

    async fn execute_many(
        &mut self,
        statement: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<(), DriverError> {
        self.check_open()?;
        self.reset();
        for params in param_sets {
            self.run_one(statement, params).await?;
        }
        // execute_many never yields rows
        self.reset();
        Ok(())
    }

    fn description(&self) -> Option<&[String]> {
        self.description.as_deref()
    }

    async fn fetch_all(&mut self) -> Result<Vec<Vec<RowValues>>, DriverError> {
        self.check_open()?;
        if self.description.is_none() {
            return Err(DriverError::other("no results to fetch"));
        }
        let rows = std::mem::take(&mut self.rows);
        rows_to_values(&rows)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.session.status(&self.client)
    }

    fn close(&mut self) {
        self.closed = true;
        self.reset();
    }
}
