//! Test doubles for exercising a [`crate::ConnectionHandle`] without a database server.

mod mock;

pub use mock::{
    LOST_CONNECTION_MESSAGE, MockConnection, MockCursor, MockDriver, MockResponse, MockStats,
};
