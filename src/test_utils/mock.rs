use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::driver::{ConnectTarget, Cursor, Driver, PhysicalConnection};
use crate::error::{DriverError, DriverErrorKind};
use crate::types::{RowValues, TransactionStatus};

/// Message the mock uses when its transport "drops".
pub const LOST_CONNECTION_MESSAGE: &str = "server closed the connection unexpectedly";

/// What a scripted statement does when executed.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<RowValues>>,
    },
    /// Succeeds without result columns. Unscripted statements behave like this.
    NoColumns,
    /// The server rejects the statement and the connection is left in `status`.
    Fail {
        message: String,
        status: TransactionStatus,
    },
}

/// Counters recorded by a [`MockDriver`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connect_attempts: u32,
    /// Successful connects.
    pub connects: u32,
    pub structured_connects: u32,
    pub keyword_dsn_connects: u32,
    pub last_keyword_dsn: Option<String>,
    pub connection_closes: u32,
    pub cursors_opened: u32,
    pub cursors_closed: u32,
    pub commits: u32,
    pub rollbacks: u32,
    /// Statements in execution order; `execute_many` records one entry per parameter set.
    pub executed: Vec<String>,
}

impl MockStats {
    /// Connects after the first one.
    #[must_use]
    pub fn reconnects(&self) -> u32 {
        self.connects.saturating_sub(1)
    }
}

#[derive(Debug, Default)]
struct ConnRecord {
    status: TransactionStatus,
    broken: bool,
    closed: bool,
    autocommit: bool,
}

impl ConnRecord {
    fn status(&self) -> TransactionStatus {
        if self.broken || self.closed {
            TransactionStatus::Unknown
        } else {
            self.status
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<String, MockResponse>,
    connect_failures: VecDeque<DriverErrorKind>,
    structured_rejection: Option<DriverErrorKind>,
    keyword_dsn_rejection: Option<DriverErrorKind>,
    broken_cursors: u32,
    silent_losses: u32,
    transport_breaks: u32,
    transport_always_broken: bool,
    connections: Vec<ConnRecord>,
    stats: MockStats,
}

/// In-memory driver with scripted results and injectable faults.
///
/// Clones share state, so a test keeps one clone to script and inspect while the handle owns
/// another.
///
/// ```rust
/// use resilient_sql::prelude::*;
/// use resilient_sql::test_utils::MockDriver;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let driver = MockDriver::new();
/// driver.respond_rows("SELECT 1 AS one", &["one"], vec![vec![RowValues::Int(1)]]);
/// driver.break_transport(1);
///
/// let config = ConnectionConfig::new().dbname("test");
/// let mut conn = ConnectionHandle::new(driver.clone(), config).await.unwrap();
/// let row = conn.get("SELECT 1 AS one", &[]).await.unwrap().unwrap();
/// assert_eq!(row["one"], RowValues::Int(1));
/// assert_eq!(driver.stats().reconnects(), 1);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    pub fn respond(&self, statement: impl Into<String>, response: MockResponse) {
        self.lock().responses.insert(statement.into(), response);
    }

    pub fn respond_rows(
        &self,
        statement: impl Into<String>,
        columns: &[&str],
        rows: Vec<Vec<RowValues>>,
    ) {
        self.respond(
            statement,
            MockResponse::Rows {
                columns: columns.iter().map(|c| (*c).to_string()).collect(),
                rows,
            },
        );
    }

    pub fn respond_error(
        &self,
        statement: impl Into<String>,
        message: impl Into<String>,
        status: TransactionStatus,
    ) {
        self.respond(
            statement,
            MockResponse::Fail {
                message: message.into(),
                status,
            },
        );
    }

    /// The next `times` connect attempts fail with `kind`, on either path.
    pub fn fail_connects(&self, kind: DriverErrorKind, times: u32) {
        let mut state = self.lock();
        for _ in 0..times {
            state.connect_failures.push_back(kind);
        }
    }

    /// Every structured connect fails with `kind` until [`MockDriver::heal`].
    pub fn reject_structured(&self, kind: DriverErrorKind) {
        self.lock().structured_rejection = Some(kind);
    }

    /// Every keyword-string connect fails with `kind` until [`MockDriver::heal`].
    pub fn reject_keyword_dsn(&self, kind: DriverErrorKind) {
        self.lock().keyword_dsn_rejection = Some(kind);
    }

    /// The next `times` cursor requests report `InterfaceBroken` and leave their connection dead.
    pub fn break_next_cursor(&self, times: u32) {
        self.lock().broken_cursors += times;
    }

    /// The next `times` cursors come back fine but their connection reports `Unknown`.
    pub fn lose_status_silently(&self, times: u32) {
        self.lock().silent_losses += times;
    }

    /// The next `times` statement executions drop the transport mid-statement.
    pub fn break_transport(&self, times: u32) {
        self.lock().transport_breaks += times;
    }

    /// Every statement execution drops the transport until [`MockDriver::heal`].
    pub fn break_transport_always(&self) {
        self.lock().transport_always_broken = true;
    }

    /// Clear every pending fault. Scripted responses and counters are kept.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.connect_failures.clear();
        state.structured_rejection = None;
        state.keyword_dsn_rejection = None;
        state.broken_cursors = 0;
        state.silent_losses = 0;
        state.transport_breaks = 0;
        state.transport_always_broken = false;
    }

    #[must_use]
    pub fn stats(&self) -> MockStats {
        self.lock().stats.clone()
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Driver for MockDriver {
    type Connection = MockConnection;

    async fn connect(&self, target: ConnectTarget<'_>) -> Result<MockConnection, DriverError> {
        let mut state = self.lock();
        state.stats.connect_attempts += 1;

        let rejection = match target {
            ConnectTarget::Structured(_) => state.structured_rejection,
            ConnectTarget::KeywordDsn(dsn) => {
                state.stats.last_keyword_dsn = Some(dsn.to_string());
                state.keyword_dsn_rejection
            }
        };
        if let Some(kind) = state.connect_failures.pop_front().or(rejection) {
            return Err(DriverError::new(kind, format!("mock connect failure ({kind})")));
        }

        match target {
            ConnectTarget::Structured(_) => state.stats.structured_connects += 1,
            ConnectTarget::KeywordDsn(_) => state.stats.keyword_dsn_connects += 1,
        }
        state.stats.connects += 1;
        state.connections.push(ConnRecord::default());
        let id = state.connections.len() - 1;
        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
        })
    }
}

/// Physical connection handed out by [`MockDriver`].
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl PhysicalConnection for MockConnection {
    type Cursor = MockCursor;

    fn cursor(&mut self) -> Result<MockCursor, DriverError> {
        let mut state = lock(&self.state);
        let id = self.id;

        if state.connections[id].closed {
            return Err(DriverError::interface_broken("connection already closed"));
        }
        if state.broken_cursors > 0 {
            state.broken_cursors -= 1;
            state.connections[id].broken = true;
        }
        if state.connections[id].broken {
            return Err(DriverError::interface_broken("connection already closed"));
        }
        if state.silent_losses > 0 {
            state.silent_losses -= 1;
            state.connections[id].status = TransactionStatus::Unknown;
        }

        state.stats.cursors_opened += 1;
        Ok(MockCursor {
            conn_id: id,
            state: Arc::clone(&self.state),
            description: None,
            rows: Vec::new(),
            closed: false,
        })
    }

    fn transaction_status(&self) -> TransactionStatus {
        lock(&self.state).connections[self.id].status()
    }

    async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), DriverError> {
        lock(&self.state).connections[self.id].autocommit = autocommit;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let record = &mut state.connections[self.id];
        if record.broken || record.closed {
            return Err(DriverError::interface_broken(LOST_CONNECTION_MESSAGE));
        }
        record.status = TransactionStatus::Idle;
        state.stats.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let record = &mut state.connections[self.id];
        if record.broken || record.closed {
            return Err(DriverError::interface_broken(LOST_CONNECTION_MESSAGE));
        }
        record.status = TransactionStatus::Idle;
        state.stats.rollbacks += 1;
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = lock(&self.state);
        if !state.connections[self.id].closed {
            state.connections[self.id].closed = true;
            state.stats.connection_closes += 1;
        }
    }
}

/// Cursor handed out by [`MockConnection`].
#[derive(Debug)]
pub struct MockCursor {
    conn_id: usize,
    state: Arc<Mutex<MockState>>,
    description: Option<Vec<String>>,
    rows: Vec<Vec<RowValues>>,
    closed: bool,
}

impl MockCursor {
    fn run_one(&mut self, statement: &str) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let id = self.conn_id;
        state.stats.executed.push(statement.to_string());

        if state.connections[id].broken || state.connections[id].closed {
            return Err(DriverError::interface_broken(LOST_CONNECTION_MESSAGE));
        }
        if state.transport_always_broken || state.transport_breaks > 0 {
            state.transport_breaks = state.transport_breaks.saturating_sub(1);
            state.connections[id].broken = true;
            return Err(DriverError::other(LOST_CONNECTION_MESSAGE));
        }

        let response = state
            .responses
            .get(statement)
            .cloned()
            .unwrap_or(MockResponse::NoColumns);
        let record = &mut state.connections[id];
        match response {
            MockResponse::Rows { columns, rows } => {
                self.description = Some(columns);
                self.rows = rows;
            }
            MockResponse::NoColumns => {
                self.description = None;
                self.rows.clear();
            }
            MockResponse::Fail { message, status } => {
                record.status = status;
                return Err(DriverError::statement(message));
            }
        }
        if !record.autocommit && record.status == TransactionStatus::Idle {
            record.status = TransactionStatus::InTransaction;
        }
        Ok(())
    }

    fn check_open(&self) -> Result<(), DriverError> {
        if self.closed {
            Err(DriverError::interface_broken("cursor already closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Cursor for MockCursor {
    async fn execute(&mut self, statement: &str, _params: &[RowValues]) -> Result<(), DriverError> {
        self.check_open()?;
        self.run_one(statement)
    }

    async fn execute_many(
        &mut self,
        statement: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<(), DriverError> {
        self.check_open()?;
        for _ in param_sets {
            self.run_one(statement)?;
        }
        self.description = None;
        self.rows.clear();
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
        Ok(std::mem::take(&mut self.rows))
    }

    fn transaction_status(&self) -> TransactionStatus {
        lock(&self.state).connections[self.conn_id].status()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.state).stats.cursors_closed += 1;
        }
    }
}
