use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

use crate::engine::DEFAULT_RETENTION_DAYS;
use crate::identity::{IdentityError, UserDirectory};

pub const WAL_FILE_NAME: &str = "reservations.wal";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("SLOTBOOK_USERS: {0}")]
    Users(#[from] IdentityError),
    #[error("both SLOTBOOK_TLS_CERT and SLOTBOOK_TLS_KEY must be set, or neither")]
    TlsPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Server settings, read from `SLOTBOOK_*` environment variables.
#[derive(Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub users: UserDirectory,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub retention: TimeDelta,
    /// `None` disables the background sweep; listings still sweep.
    pub sweep_interval: Option<Duration>,
    pub tls: Option<TlsFiles>,
    pub metrics_port: Option<u16>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Unset variables take their defaults; set but malformed ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        let users_spec = get("SLOTBOOK_USERS").ok_or(ConfigError::Missing("SLOTBOOK_USERS"))?;
        let users = UserDirectory::from_spec(&users_spec)?;
        if users.is_empty() {
            return Err(ConfigError::Missing("SLOTBOOK_USERS"));
        }

        let retention_days: i64 =
            parse_or("SLOTBOOK_RETENTION_DAYS", get("SLOTBOOK_RETENTION_DAYS"), DEFAULT_RETENTION_DAYS)?;
        let retention = TimeDelta::try_days(retention_days)
            .filter(|_| retention_days > 0)
            .ok_or_else(|| invalid("SLOTBOOK_RETENTION_DAYS", retention_days, "must be a positive day count"))?;

        let sweep_secs: u64 =
            parse_or("SLOTBOOK_SWEEP_INTERVAL_SECS", get("SLOTBOOK_SWEEP_INTERVAL_SECS"), 3600)?;

        let max_connections: usize =
            parse_or("SLOTBOOK_MAX_CONNECTIONS", get("SLOTBOOK_MAX_CONNECTIONS"), 256)?;
        if max_connections == 0 {
            return Err(invalid("SLOTBOOK_MAX_CONNECTIONS", 0, "must be at least 1"));
        }

        let tls = match (get("SLOTBOOK_TLS_CERT"), get("SLOTBOOK_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::TlsPair),
        };

        let metrics_port = get("SLOTBOOK_METRICS_PORT")
            .map(|raw| parse("SLOTBOOK_METRICS_PORT", &raw))
            .transpose()?;

        Ok(Self {
            bind: get("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("SLOTBOOK_PORT", get("SLOTBOOK_PORT"), 5433)?,
            data_dir: get("SLOTBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            users,
            max_connections,
            compact_threshold: parse_or(
                "SLOTBOOK_COMPACT_THRESHOLD",
                get("SLOTBOOK_COMPACT_THRESHOLD"),
                1000,
            )?,
            retention,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            tls,
            metrics_port,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn invalid(var: &'static str, value: impl Display, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e| invalid(var, raw, e))
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.map_or(Ok(default), |raw| parse(var, &raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|var| env.get(var).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("SLOTBOOK_USERS", "alice:pw")]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data").join(WAL_FILE_NAME));
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.retention, TimeDelta::days(7));
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(3600)));
        assert_eq!(config.tls, None);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.users.len(), 1);
    }

    #[test]
    fn overrides_apply() {
        let config = load(&[
            ("SLOTBOOK_USERS", "alice:pw,bob:pw2"),
            ("SLOTBOOK_BIND", "127.0.0.1"),
            ("SLOTBOOK_PORT", "6543"),
            ("SLOTBOOK_DATA_DIR", "/var/lib/slotbook"),
            ("SLOTBOOK_RETENTION_DAYS", "30"),
            ("SLOTBOOK_SWEEP_INTERVAL_SECS", "0"),
            ("SLOTBOOK_METRICS_PORT", "9090"),
            ("SLOTBOOK_TLS_CERT", "/etc/cert.pem"),
            ("SLOTBOOK_TLS_KEY", "/etc/key.pem"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6543");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/slotbook/reservations.wal"));
        assert_eq!(config.retention, TimeDelta::days(30));
        assert_eq!(config.sweep_interval, None);
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(
            config.tls,
            Some(TlsFiles {
                cert: "/etc/cert.pem".into(),
                key: "/etc/key.pem".into(),
            })
        );
        assert_eq!(config.users.len(), 2);
    }

    #[test]
    fn users_are_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("SLOTBOOK_USERS"))));
        assert!(matches!(
            load(&[("SLOTBOOK_USERS", " , ")]),
            Err(ConfigError::Missing("SLOTBOOK_USERS"))
        ));
        let err = load(&[]).err().expect("users are required");
        assert_eq!(err.to_string(), "SLOTBOOK_USERS must be set");
    }

    #[test]
    fn bad_users_spec_errors() {
        assert!(matches!(
            load(&[("SLOTBOOK_USERS", "alice")]),
            Err(ConfigError::Users(IdentityError::Malformed(_)))
        ));
        assert!(matches!(
            load(&[("SLOTBOOK_USERS", "alice:a,ALICE:b")]),
            Err(ConfigError::Users(IdentityError::Duplicate(_)))
        ));
    }

    #[test]
    fn malformed_numbers_are_errors() {
        for var in [
            "SLOTBOOK_PORT",
            "SLOTBOOK_MAX_CONNECTIONS",
            "SLOTBOOK_COMPACT_THRESHOLD",
            "SLOTBOOK_RETENTION_DAYS",
            "SLOTBOOK_SWEEP_INTERVAL_SECS",
            "SLOTBOOK_METRICS_PORT",
        ] {
            let err = load(&[("SLOTBOOK_USERS", "alice:pw"), (var, "lots")]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { var: v, .. } if v == var), "{var}");
        }
    }

    #[test]
    fn non_positive_retention_rejected() {
        let err = load(&[("SLOTBOOK_USERS", "alice:pw"), ("SLOTBOOK_RETENTION_DAYS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SLOTBOOK_RETENTION_DAYS", .. }));
    }

    #[test]
    fn half_tls_pair_rejected() {
        let err = load(&[("SLOTBOOK_USERS", "alice:pw"), ("SLOTBOOK_TLS_CERT", "/etc/cert.pem")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::TlsPair));
    }
}
