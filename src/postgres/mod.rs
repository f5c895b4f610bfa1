// PostgreSQL driver over tokio-postgres.
//
// - config: structured/keyword connect parameters and error classification
// - connection: the driver, physical connection, and cursor
// - params: RowValues -> ToSql binding
// - query: row decoding

pub(crate) mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use connection::{PgConnection, PgCursor, PgDriver};
pub use params::Params;
pub use query::postgres_extract_value;

use crate::config::{ConnectionConfig, HandleOptions};
use crate::error::ResilientDbError;
use crate::handle::ConnectionHandle;

/// A connection handle backed by `tokio_postgres`.
pub type PgConnectionHandle = ConnectionHandle<PgDriver>;

impl ConnectionHandle<PgDriver> {
    /// Connect to PostgreSQL with default options.
    ///
    /// # Errors
    /// Same as [`ConnectionHandle::new`].
    pub async fn postgres(config: ConnectionConfig) -> Result<Self, ResilientDbError> {
        Self::new(PgDriver, config).await
    }

    /// Connect to PostgreSQL with explicit retry options.
    ///
    /// # Errors
    /// Same as [`ConnectionHandle::new`].
    pub async fn postgres_with_options(
        config: ConnectionConfig,
        options: HandleOptions,
    ) -> Result<Self, ResilientDbError> {
        Self::with_options(PgDriver, config, options).await
    }
}
