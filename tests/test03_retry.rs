#![cfg(feature = "test-utils")]

use resilient_sql::prelude::*;
use resilient_sql::test_utils::{LOST_CONNECTION_MESSAGE, MockDriver};
use tokio::runtime::Runtime;

const SELECT_ALICE: &str = "SELECT id, name FROM users WHERE id = $1";
const INSERT_USER: &str = "INSERT INTO users (id, name) VALUES ($1, $2)";

fn config() -> ConnectionConfig {
    ConnectionConfig::new().host("db").dbname("shop")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn alice() -> Vec<Vec<RowValues>> {
    vec![vec![RowValues::Int(1), RowValues::Text("alice".into())]]
}

#[test]
fn test3_survives_transport_loss() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        driver.respond_rows(SELECT_ALICE, &["id", "name"], alice());
        let mut conn = ConnectionHandle::new(driver.clone(), config()).await?;

        conn.execute(
            INSERT_USER,
            &[RowValues::Int(1), RowValues::Text("alice".into())],
        )
        .await?;
        assert_eq!(driver.stats().commits, 1);

        let before = conn.get(SELECT_ALICE, &[RowValues::Int(1)]).await?;

        // the server drops the connection under the next statement
        driver.break_transport(1);
        let after = conn.get(SELECT_ALICE, &[RowValues::Int(1)]).await?;

        assert_eq!(before, after);
        assert_eq!(after.expect("row")["name"], RowValues::Text("alice".into()));

        let stats = driver.stats();
        assert_eq!(stats.reconnects(), 1);
        assert_eq!(
            stats.executed,
            [INSERT_USER, SELECT_ALICE, SELECT_ALICE, SELECT_ALICE]
        );
        assert_eq!(stats.cursors_opened, stats.cursors_closed);
        assert_eq!(conn.retry_count(), 1);
        Ok(())
    })
}

#[test]
fn test3_retry_ceiling() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let options = HandleOptions::default().max_retry_count(3);
        let mut conn = ConnectionHandle::with_options(driver.clone(), config(), options).await?;

        driver.break_transport_always();
        let err = conn.execute("DELETE FROM sessions", &[]).await.unwrap_err();

        match &err {
            ResilientDbError::RetryExhausted {
                attempts,
                max_retries,
                last,
            } => {
                assert_eq!(*attempts, 4);
                assert_eq!(*max_retries, 3);
                assert_eq!(last.message, LOST_CONNECTION_MESSAGE);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert!(err.is_retry_exhausted());

        let stats = driver.stats();
        // N retries: N reconnects and N + 1 executions
        assert_eq!(stats.reconnects(), 3);
        assert_eq!(stats.executed.len(), 4);
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.cursors_opened, stats.cursors_closed);
        Ok(())
    })
}

#[test]
fn test3_zero_retries_fails_first_time() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let options = HandleOptions::default().max_retry_count(0);
        let mut conn = ConnectionHandle::with_options(driver.clone(), config(), options).await?;

        driver.break_transport(1);
        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            ResilientDbError::RetryExhausted {
                attempts: 1,
                max_retries: 0,
                ..
            }
        ));

        let stats = driver.stats();
        assert_eq!(stats.reconnects(), 0);
        assert_eq!(stats.executed.len(), 1);
        Ok(())
    })
}

#[test]
fn test3_statement_errors_pass_through() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let message = "syntax error at or near \"SELEC\"";
        driver.respond_error("SELEC 1", message, TransactionStatus::InError);
        driver.respond_error(
            "INSERT INTO users (id) VALUES (1)",
            "duplicate key value violates unique constraint \"users_pkey\"",
            TransactionStatus::Idle,
        );
        let mut conn = ConnectionHandle::new(driver.clone(), config()).await?;

        let err = conn.query("SELEC 1", &[]).await.unwrap_err();
        match err {
            ResilientDbError::StatementError(e) => {
                assert_eq!(e.kind, DriverErrorKind::Statement);
                assert_eq!(e.message, message);
            }
            other => panic!("expected StatementError, got {other:?}"),
        }

        let err = conn
            .execute("INSERT INTO users (id) VALUES (1)", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ResilientDbError::StatementError(_)));

        let stats = driver.stats();
        assert_eq!(stats.reconnects(), 0);
        assert_eq!(stats.executed.len(), 2);
        assert_eq!(stats.commits, 0);
        assert_eq!(conn.retry_count(), 0);
        Ok(())
    })
}

#[test]
fn test3_unknown_after_server_error_is_retried() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        driver.respond_error(
            "SELECT pg_sleep(60)",
            "terminating connection due to administrator command",
            TransactionStatus::Unknown,
        );
        let options = HandleOptions::default().max_retry_count(2);
        let mut conn = ConnectionHandle::with_options(driver.clone(), config(), options).await?;

        let err = conn.query("SELECT pg_sleep(60)", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            ResilientDbError::RetryExhausted {
                attempts: 3,
                max_retries: 2,
                ..
            }
        ));
        assert_eq!(driver.stats().reconnects(), 2);
        Ok(())
    })
}

#[test]
fn test3_reconnect_failure_during_retry_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let mut conn = ConnectionHandle::new(driver.clone(), config()).await?;

        driver.break_transport(1);
        driver.fail_connects(DriverErrorKind::Unreachable, 1);
        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            ResilientDbError::ConnectionError(ref e) if e.kind == DriverErrorKind::Unreachable
        ));
        assert!(!conn.is_connected());

        // the server is back; the next call reconnects by itself
        conn.query("SELECT 1", &[]).await?;
        assert!(conn.is_connected());
        Ok(())
    })
}

#[test]
fn test3_per_call_counter_resets() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let options = HandleOptions::default().max_retry_count(2);
        let mut conn = ConnectionHandle::with_options(driver.clone(), config(), options).await?;

        driver.break_transport(2);
        conn.execute("UPDATE counters SET n = n + 1", &[]).await?;
        assert_eq!(conn.retry_count(), 2);

        driver.break_transport(1);
        conn.execute("UPDATE counters SET n = n + 1", &[]).await?;
        assert_eq!(conn.retry_count(), 1);
        assert_eq!(driver.stats().reconnects(), 3);
        Ok(())
    })
}

#[test]
fn test3_lifetime_counter_accumulates() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let options = HandleOptions::default()
            .max_retry_count(2)
            .retry_counter(RetryCounterPolicy::Lifetime);
        let mut conn = ConnectionHandle::with_options(driver.clone(), config(), options).await?;

        driver.break_transport(2);
        conn.execute("UPDATE counters SET n = n + 1", &[]).await?;
        assert_eq!(conn.retry_count(), 2);

        driver.break_transport(1);
        let err = conn
            .execute("UPDATE counters SET n = n + 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResilientDbError::RetryExhausted {
                attempts: 1,
                max_retries: 2,
                ..
            }
        ));
        assert_eq!(driver.stats().reconnects(), 2);
        Ok(())
    })
}
