#![cfg(feature = "test-utils")]

use resilient_sql::prelude::*;
use resilient_sql::test_utils::MockDriver;
use tokio::runtime::Runtime;

fn config() -> ConnectionConfig {
    ConnectionConfig::new().host("db").dbname("shop")
}

#[test]
fn test4_interface_broken_reconnects_once() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        driver.respond_rows("SELECT 1 AS one", &["one"], vec![vec![RowValues::Int(1)]]);
        let mut conn = ConnectionHandle::new(driver.clone(), config()).await?;

        driver.break_next_cursor(1);
        let row = conn.get("SELECT 1 AS one", &[]).await?.expect("row");
        assert_eq!(row["one"], RowValues::Int(1));

        let stats = driver.stats();
        assert_eq!(stats.reconnects(), 1);
        assert_eq!(stats.executed.len(), 1);
        // health-check reconnects do not spend the retry budget
        assert_eq!(conn.retry_count(), 0);
        Ok(())
    })
}

#[test]
fn test4_second_interface_failure_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let mut conn = ConnectionHandle::new(driver.clone(), config()).await?;

        driver.break_next_cursor(2);
        let err = conn.execute("DELETE FROM t", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            ResilientDbError::ConnectionError(ref e) if e.kind == DriverErrorKind::InterfaceBroken
        ));

        let stats = driver.stats();
        assert_eq!(stats.reconnects(), 1);
        assert!(stats.executed.is_empty());
        Ok(())
    })
}

#[test]
fn test4_unknown_status_reconnects_silently() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let mut conn = ConnectionHandle::new(driver.clone(), config()).await?;

        driver.lose_status_silently(1);
        assert_eq!(conn.transaction_status(), Some(TransactionStatus::Idle));
        conn.execute("UPDATE t SET n = 1", &[]).await?;

        let stats = driver.stats();
        assert_eq!(stats.reconnects(), 1);
        assert_eq!(stats.executed.len(), 1);
        assert_eq!(stats.cursors_opened, 2);
        assert_eq!(stats.cursors_closed, 2);
        assert_eq!(conn.retry_count(), 0);
        Ok(())
    })
}

#[test]
fn test4_healthy_connection_is_reused() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let mut conn = ConnectionHandle::new(driver.clone(), config()).await?;

        for _ in 0..5 {
            conn.query("SELECT 1", &[]).await?;
        }
        let stats = driver.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.cursors_opened, 5);
        assert_eq!(stats.cursors_closed, 5);
        Ok(())
    })
}

#[test]
fn test4_commit_and_rollback_pass_through() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let driver = MockDriver::new();
        let options = HandleOptions::default().max_retry_count(0);
        let mut conn = ConnectionHandle::with_options(driver.clone(), config(), options).await?;

        conn.commit().await?;
        conn.rollback().await?;
        let stats = driver.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.rollbacks, 1);

        // leave the connection dead: no budget to recover inside the call
        driver.break_transport(1);
        assert!(conn.query("SELECT 1", &[]).await.is_err());
        assert_eq!(conn.transaction_status(), Some(TransactionStatus::Unknown));

        // commit is not retried and does not reconnect
        let err = conn.commit().await.unwrap_err();
        assert!(matches!(
            err,
            ResilientDbError::ConnectionError(ref e) if e.kind == DriverErrorKind::InterfaceBroken
        ));
        assert_eq!(driver.stats().reconnects(), 0);

        // the next operation's health check replaces the connection
        conn.query("SELECT 1", &[]).await?;
        assert_eq!(driver.stats().reconnects(), 1);
        assert_eq!(conn.transaction_status(), Some(TransactionStatus::Idle));
        Ok(())
    })
}
