//! Connection parameters and handle options.
//!
//! A [`ConnectionConfig`] is supplied once when a handle is built and reused verbatim for every
//! reconnect. Validation (exactly one database name) runs each time a physical connection is
//! opened, so a config that is wrong never produces a connection.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ResilientDbError;

/// Option keys that name the database; only one source may be set.
const DBNAME_KEYS: [&str; 2] = ["dbname", "database"];

/// Default ceiling for reconnect-and-retry cycles per logical operation.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 5;

/// Connection parameters for one physical connection.
///
/// ```rust
/// use resilient_sql::prelude::*;
///
/// let config = ConnectionConfig::new()
///     .host("db")
///     .port(5432)
///     .user("app")
///     .dbname("shop")
///     .option("application_name", "billing");
/// assert_eq!(config.resolve_dbname().unwrap(), "shop");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub dbname: Option<String>,
    /// Alternate spelling of `dbname`; setting both is a configuration error.
    pub database: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    /// Driver-specific keyword options, passed through as-is.
    pub options: BTreeMap<String, String>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dbname", &self.dbname)
            .field("database", &self.database)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("options", &self.options)
            .finish()
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Build a config from the libpq environment variables
    /// (`PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD`, `PGDATABASE`, `PGCONNECT_TIMEOUT`).
    ///
    /// # Errors
    /// Returns `ResilientDbError::ConfigError` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ResilientDbError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConnectionConfig::from_env`] but reading variables through `lookup`.
    ///
    /// # Errors
    /// Returns `ResilientDbError::ConfigError` if a numeric variable does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ResilientDbError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("PGPORT")
            .map(|p| {
                p.parse::<u16>().map_err(|e| {
                    ResilientDbError::ConfigError(format!("PGPORT is not a valid port: {e}"))
                })
            })
            .transpose()?;
        let connect_timeout_secs = lookup("PGCONNECT_TIMEOUT")
            .map(|t| {
                t.parse::<u64>().map_err(|e| {
                    ResilientDbError::ConfigError(format!("PGCONNECT_TIMEOUT is not a number: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            host: lookup("PGHOST"),
            port,
            user: lookup("PGUSER"),
            password: lookup("PGPASSWORD"),
            dbname: lookup("PGDATABASE"),
            database: None,
            connect_timeout_secs,
            options: BTreeMap::new(),
        })
    }

    /// Resolve the single database name this config points at.
    ///
    /// Candidates are `dbname`, `database`, and the `dbname`/`database` keys of `options`.
    /// Empty strings count as unset.
    ///
    /// # Errors
    /// Returns `ResilientDbError::ConfigError` when no candidate or more than one is set.
    pub fn resolve_dbname(&self) -> Result<&str, ResilientDbError> {
        let candidates: Vec<(&str, &str)> = [
            ("dbname", self.dbname.as_deref()),
            ("database", self.database.as_deref()),
            ("options.dbname", self.options.get("dbname").map(String::as_str)),
            ("options.database", self.options.get("database").map(String::as_str)),
        ]
        .into_iter()
        .filter_map(|(source, value)| value.filter(|v| !v.is_empty()).map(|v| (source, v)))
        .collect();

        match candidates.as_slice() {
            [(_, name)] => Ok(*name),
            [] => Err(ResilientDbError::ConfigError(
                "no database name supplied (set exactly one of dbname or database)".to_string(),
            )),
            many => {
                let sources: Vec<&str> = many.iter().map(|(source, _)| *source).collect();
                Err(ResilientDbError::ConfigError(format!(
                    "ambiguous database name: set in {}",
                    sources.join(", ")
                )))
            }
        }
    }

    /// Extra options with the database-name keys removed.
    pub fn extra_options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options
            .iter()
            .filter(|(k, _)| !DBNAME_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render the literal keyword/value connection string used when the structured connect
    /// path rejects the parameters, e.g. `host='db' port='5432' dbname='shop'`.
    ///
    /// `dbname` is always the last pair. Quotes and backslashes inside values are escaped.
    ///
    /// # Errors
    /// Returns `ResilientDbError::ConfigError` if the database name does not resolve.
    pub fn to_keyword_dsn(&self) -> Result<String, ResilientDbError> {
        let dbname = self.resolve_dbname()?;
        let port = self.port.map(|p| p.to_string());
        let timeout = self.connect_timeout_secs.map(|t| t.to_string());

        let mut pairs: Vec<(&str, &str)> = Vec::new();
        let fixed = [
            ("host", self.host.as_deref()),
            ("port", port.as_deref()),
            ("user", self.user.as_deref()),
            ("password", self.password.as_deref()),
            ("connect_timeout", timeout.as_deref()),
        ];
        for (key, value) in fixed {
            if let Some(value) = value {
                pairs.push((key, value));
            }
        }
        pairs.extend(self.extra_options());
        pairs.push(("dbname", dbname));

        Ok(pairs
            .iter()
            .map(|(k, v)| format!("{k}='{}'", escape_dsn_value(v)))
            .collect::<Vec<_>>()
            .join(" "))
    }
}

fn escape_dsn_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// When the per-handle retry counter goes back to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCounterPolicy {
    /// Reset at the start of every externally initiated operation.
    #[default]
    PerCall,
    /// Never reset; the budget is shared by the handle's whole lifetime.
    Lifetime,
}

/// Behavior knobs for a [`crate::ConnectionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleOptions {
    /// Maximum reconnect-and-retry cycles before `RetryExhausted`.
    pub max_retry_count: u32,
    pub retry_counter: RetryCounterPolicy,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            retry_counter: RetryCounterPolicy::PerCall,
        }
    }
}

impl HandleOptions {
    #[must_use]
    pub fn max_retry_count(mut self, max: u32) -> Self {
        self.max_retry_count = max;
        self
    }

    #[must_use]
    pub fn retry_counter(mut self, policy: RetryCounterPolicy) -> Self {
        self.retry_counter = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_resolve_dbname_from_either_field() {
        let a = ConnectionConfig::new().dbname("shop");
        assert_eq!(a.resolve_dbname().unwrap(), "shop");

        let b = ConnectionConfig::new().database("shop");
        assert_eq!(b.resolve_dbname().unwrap(), "shop");

        let c = ConnectionConfig::new().option("dbname", "shop");
        assert_eq!(c.resolve_dbname().unwrap(), "shop");
    }

    #[test]
    fn test_resolve_dbname_rejects_two_names() {
        let cfg = ConnectionConfig::new().dbname("shop").database("warehouse");
        match cfg.resolve_dbname() {
            Err(ResilientDbError::ConfigError(msg)) => {
                assert!(msg.contains("ambiguous"));
                assert!(msg.contains("dbname"));
                assert!(msg.contains("database"));
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }

        // same value twice is still two sources
        let cfg = ConnectionConfig::new().dbname("shop").option("database", "shop");
        assert!(matches!(
            cfg.resolve_dbname(),
            Err(ResilientDbError::ConfigError(_))
        ));
    }

    #[test]
    fn test_resolve_dbname_rejects_none() {
        let cfg = ConnectionConfig::new().host("db").dbname("");
        assert!(matches!(
            cfg.resolve_dbname(),
            Err(ResilientDbError::ConfigError(msg)) if msg.contains("no database name")
        ));
    }

    #[test]
    fn test_keyword_dsn_puts_dbname_last() {
        let cfg = ConnectionConfig::new()
            .host("db")
            .port(5433)
            .user("app")
            .database("商店")
            .option("application_name", "billing");
        assert_eq!(
            cfg.to_keyword_dsn().unwrap(),
            "host='db' port='5433' user='app' application_name='billing' dbname='商店'"
        );
    }

    #[test]
    fn test_keyword_dsn_escapes_quotes() {
        let cfg = ConnectionConfig::new()
            .password(r"it's\secret")
            .dbname("shop");
        assert_eq!(
            cfg.to_keyword_dsn().unwrap(),
            r"password='it\'s\\secret' dbname='shop'"
        );
    }

    #[test]
    fn test_keyword_dsn_skips_dbname_option_keys() {
        let cfg = ConnectionConfig::new().option("database", "shop");
        assert_eq!(cfg.to_keyword_dsn().unwrap(), "dbname='shop'");
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("PGHOST", "db"),
            ("PGPORT", "6543"),
            ("PGDATABASE", "shop"),
            ("PGCONNECT_TIMEOUT", "3"),
        ]
        .into_iter()
        .collect();
        let cfg = ConnectionConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(cfg.host.as_deref(), Some("db"));
        assert_eq!(cfg.port, Some(6543));
        assert_eq!(cfg.connect_timeout_secs, Some(3));
        assert_eq!(cfg.resolve_dbname().unwrap(), "shop");
        assert!(cfg.password.is_none());
    }

    #[test]
    fn test_from_lookup_bad_port() {
        let err = ConnectionConfig::from_lookup(|k| (k == "PGPORT").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(matches!(err, ResilientDbError::ConfigError(msg) if msg.contains("PGPORT")));
    }

    #[test]
    fn test_json_round_trip_drops_password() {
        let cfg: ConnectionConfig = serde_json::from_str(
            r#"{"host":"db","dbname":"shop","password":"pw","options":{"sslmode":"disable"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.password.as_deref(), Some("pw"));
        assert_eq!(cfg.options.get("sslmode").map(String::as_str), Some("disable"));

        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("pw"));
        assert!(!format!("{cfg:?}").contains("\"pw\""));
    }

    #[test]
    fn test_handle_options_defaults() {
        let opts = HandleOptions::default();
        assert_eq!(opts.max_retry_count, 5);
        assert_eq!(opts.retry_counter, RetryCounterPolicy::PerCall);

        let opts: HandleOptions = serde_json::from_str(r#"{"retry_counter":"lifetime"}"#).unwrap();
        assert_eq!(opts.max_retry_count, 5);
        assert_eq!(opts.retry_counter, RetryCounterPolicy::Lifetime);
    }
}
