//! A single self-healing database connection.
//!
//! [`ConnectionHandle`] wraps one physical connection from a [`Driver`] and gives callers
//! `query`, `get`, `execute`, and `execute_many` that survive a dropped transport: every
//! operation health-checks the connection first, and a statement that dies with the
//! connection (transaction status `Unknown`) is re-run on a fresh one up to a bounded number
//! of times. Database-side failures are never retried.
//!
//! The PostgreSQL driver (feature `postgres`, on by default) sits on `tokio-postgres`.
//! Feature `test-utils` adds an in-memory [`test_utils::MockDriver`] with fault injection.

pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod prelude;
pub mod results;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConnectionConfig, DEFAULT_MAX_RETRY_COUNT, HandleOptions, RetryCounterPolicy};
pub use driver::{ConnectTarget, Cursor, Driver, PhysicalConnection};
pub use error::{DriverError, DriverErrorKind, ResilientDbError};
pub use handle::{ConnectionHandle, CursorOf};
pub use results::{ResultSet, Row};
pub use types::{RowValues, TransactionStatus};

#[cfg(feature = "postgres")]
pub use postgres::{PgConnectionHandle, PgDriver};
