//! Convenient imports for common functionality.
//!
//! ```rust
//! use resilient_sql::prelude::*;
//! ```

pub use crate::config::{ConnectionConfig, HandleOptions, RetryCounterPolicy};
pub use crate::driver::{ConnectTarget, Cursor, Driver, PhysicalConnection};
pub use crate::error::{DriverError, DriverErrorKind, ResilientDbError};
pub use crate::handle::{ConnectionHandle, CursorOf};
pub use crate::results::{ResultSet, Row};
pub use crate::types::{RowValues, TransactionStatus};

#[cfg(feature = "postgres")]
pub use crate::postgres::{PgConnectionHandle, PgDriver};
