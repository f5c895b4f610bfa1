use std::time::Duration;

use tokio_postgres::Config as PgConfig;
use tokio_postgres::config::{SslMode, TargetSessionAttrs};

use crate::config::ConnectionConfig;
use crate::driver::ConnectTarget;
use crate::error::{DriverError, DriverErrorKind};

/// Build a `tokio_postgres` config for either connect path.
///
/// # Errors
/// Returns `DriverErrorKind::BadSyntax` when a structured option is unknown or has a bad value,
/// or when the keyword connection string does not parse.
pub(crate) fn build_pg_config(target: ConnectTarget<'_>) -> Result<PgConfig, DriverError> {
    match target {
        ConnectTarget::Structured(config) => from_structured(config),
        ConnectTarget::KeywordDsn(dsn) => dsn.parse::<PgConfig>().map_err(|e| {
            DriverError::new(
                DriverErrorKind::BadSyntax,
                format!("invalid connection string: {e}"),
            )
        }),
    }
}

fn from_structured(config: &ConnectionConfig) -> Result<PgConfig, DriverError> {
    let dbname = config
        .resolve_dbname()
        .map_err(|e| DriverError::new(DriverErrorKind::BadSyntax, e.to_string()))?;

    let mut pg = PgConfig::new();
    if let Some(host) = &config.host {
        pg.host(host.as_str());
    }
    if let Some(port) = config.port {
        pg.port(port);
    }
    if let Some(user) = &config.user {
        pg.user(user.as_str());
    }
    if let Some(password) = &config.password {
        pg.password(password.as_str());
    }
    if let Some(secs) = config.connect_timeout_secs {
        pg.connect_timeout(Duration::from_secs(secs));
    }
    pg.dbname(dbname);

    for (key, value) in config.extra_options() {
        apply_option(&mut pg, key, value)?;
    }
    Ok(pg)
}

/// Options the structured path understands. Anything else is left to the keyword parser.
fn apply_option(pg: &mut PgConfig, key: &str, value: &str) -> Result<(), DriverError> {
    let bad_value = || {
        DriverError::new(
            DriverErrorKind::BadSyntax,
            format!("invalid value for {key}: {value:?}"),
        )
    };

    match key {
        "application_name" => {
            pg.application_name(value);
        }
        "options" => {
            pg.options(value);
        }
        "sslmode" => {
            let mode = match value {
                "disable" => SslMode::Disable,
                "prefer" => SslMode::Prefer,
                "require" => SslMode::Require,
                _ => return Err(bad_value()),
            };
            pg.ssl_mode(mode);
        }
        "connect_timeout" => {
            let secs = value.parse::<u64>().map_err(|_| bad_value())?;
            pg.connect_timeout(Duration::from_secs(secs));
        }
        "keepalives" => {
            let on = match value {
                "1" | "true" | "on" => true,
                "0" | "false" | "off" => false,
                _ => return Err(bad_value()),
            };
            pg.keepalives(on);
        }
        "target_session_attrs" => {
            let attrs = match value {
                "any" => TargetSessionAttrs::Any,
                "read-write" => TargetSessionAttrs::ReadWrite,
                _ => return Err(bad_value()),
            };
            pg.target_session_attrs(attrs);
        }
        _ => {
            return Err(DriverError::new(
                DriverErrorKind::BadSyntax,
                format!("unrecognized connection option {key:?}"),
            ));
        }
    }
    Ok(())
}

/// Classify a failed connect.
pub(crate) fn connect_error(err: &tokio_postgres::Error) -> DriverError {
    let kind = if let Some(db) = err.as_db_error() {
        // SQLSTATE class 28: invalid authorization specification
        if db.code().code().starts_with("28") {
            DriverErrorKind::Auth
        } else {
            DriverErrorKind::Other
        }
    } else if has_io_source(err) {
        DriverErrorKind::Unreachable
    } else {
        DriverErrorKind::Other
    };
    DriverError::new(kind, error_message(err))
}

/// Classify a failure after the connection was up.
pub(crate) fn execution_error(err: &tokio_postgres::Error) -> DriverError {
    if err.is_closed() {
        DriverError::interface_broken(error_message(err))
    } else if severs_connection(err) {
        DriverError::other(error_message(err))
    } else if err.as_db_error().is_some() {
        DriverError::statement(error_message(err))
    } else {
        DriverError::other(error_message(err))
    }
}

/// True when the server is about to drop (or already dropped) the session.
pub(crate) fn severs_connection(err: &tokio_postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }
    err.as_db_error()
        .is_some_and(|db| is_fatal_report(db.severity(), db.code().code()))
}

/// FATAL/PANIC reports, connection exceptions (class 08), and shutdown codes 57P01..57P03.
fn is_fatal_report(severity: &str, code: &str) -> bool {
    matches!(severity, "FATAL" | "PANIC")
        || code.starts_with("08")
        || matches!(code, "57P01" | "57P02" | "57P03")
}

/// The server's own report when there is one; `tokio_postgres::Error` alone prints "db error".
fn error_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => format!("{db} (SQLSTATE {})", db.code().code()),
        None => err.to_string(),
    }
}

fn has_io_source(err: &tokio_postgres::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return true;
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_maps_fields() {
        let config = ConnectionConfig::new()
            .host("db")
            .port(6543)
            .user("app")
            .database("shop")
            .connect_timeout_secs(3)
            .option("application_name", "billing");
        let pg = build_pg_config(ConnectTarget::Structured(&config)).unwrap();
        assert_eq!(pg.get_dbname(), Some("shop"));
        assert_eq!(pg.get_user(), Some("app"));
        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_application_name(), Some("billing"));
        assert_eq!(pg.get_connect_timeout(), Some(&Duration::from_secs(3)));
    }

    #[test]
    fn test_unknown_option_is_bad_syntax() {
        let config = ConnectionConfig::new()
            .dbname("shop")
            .option("keepalives_idle", "30");
        let err = build_pg_config(ConnectTarget::Structured(&config)).unwrap_err();
        assert!(err.is_bad_syntax());
        assert!(err.message.contains("keepalives_idle"));
    }

    #[test]
    fn test_bad_option_value_is_bad_syntax() {
        let config = ConnectionConfig::new().dbname("shop").option("sslmode", "sometimes");
        let err = build_pg_config(ConnectTarget::Structured(&config)).unwrap_err();
        assert!(err.is_bad_syntax());
    }

    #[test]
    fn test_keyword_dsn_parses_what_structured_rejects() {
        let config = ConnectionConfig::new()
            .host("db")
            .dbname("shop")
            .option("keepalives_idle", "30");
        let dsn = config.to_keyword_dsn().unwrap();
        let pg = build_pg_config(ConnectTarget::KeywordDsn(&dsn)).unwrap();
        assert_eq!(pg.get_dbname(), Some("shop"));
        assert_eq!(pg.get_keepalives_idle(), Duration::from_secs(30));
    }

    #[test]
    fn test_fatal_reports_sever_the_connection() {
        assert!(is_fatal_report("FATAL", "57P01"));
        assert!(is_fatal_report("ERROR", "57P01"));
        assert!(is_fatal_report("ERROR", "08006"));
        assert!(is_fatal_report("PANIC", "XX000"));
        assert!(!is_fatal_report("ERROR", "42601"));
        assert!(!is_fatal_report("ERROR", "23505"));
        assert!(!is_fatal_report("ERROR", "57014"));
    }

    #[test]
    fn test_keyword_dsn_garbage_is_bad_syntax() {
        let err = build_pg_config(ConnectTarget::KeywordDsn("host='db")).unwrap_err();
        assert!(err.is_bad_syntax());
    }
}
