//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Runtime configuration for the console server and the import job.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Address the HTTP/WS server binds to.
    pub bind: SocketAddr,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Capacity of the dashboard event broadcast channel.
    pub broadcast_capacity: usize,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Directory scanned by the import job.
    pub import_dir: PathBuf,
    /// Only files whose name contains this string are imported.
    pub import_filter: String,
    /// Write a daily rolling log file here when set.
    pub log_dir: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            db_path: PathBuf::from("./data/support-console.db"),
            broadcast_capacity: 256,
            busy_timeout: Duration::from_millis(5000),
            import_dir: PathBuf::from("."),
            import_filter: "MessageData".to_string(),
            log_dir: None,
        }
    }
}

impl ConsoleConfig {
    /// Build from `SUPPORT_CONSOLE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind = match lookup("SUPPORT_CONSOLE_BIND") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "SUPPORT_CONSOLE_BIND".into(),
                message: format!("{raw:?}: {e}"),
            })?,
            None => defaults.bind,
        };

        let broadcast_capacity = parse_number(
            &lookup,
            "SUPPORT_CONSOLE_BROADCAST_CAPACITY",
            defaults.broadcast_capacity,
        )?;
        if broadcast_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SUPPORT_CONSOLE_BROADCAST_CAPACITY".into(),
                message: "must be greater than zero".into(),
            });
        }

        let busy_timeout_ms: u64 = parse_number(
            &lookup,
            "SUPPORT_CONSOLE_BUSY_TIMEOUT_MS",
            defaults.busy_timeout.as_millis() as u64,
        )?;

        Ok(Self {
            bind,
            db_path: lookup("SUPPORT_CONSOLE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            broadcast_capacity,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            import_dir: lookup("SUPPORT_CONSOLE_IMPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.import_dir),
            import_filter: lookup("SUPPORT_CONSOLE_IMPORT_FILTER").unwrap_or(defaults.import_filter),
            log_dir: lookup("SUPPORT_CONSOLE_LOG_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_is_empty() {
        let config = ConsoleConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind.port(), 5000);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.import_filter, "MessageData");
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = ConsoleConfig::from_lookup(lookup_from(&[
            ("SUPPORT_CONSOLE_BIND", "127.0.0.1:8081"),
            ("SUPPORT_CONSOLE_DB_PATH", "/tmp/console.db"),
            ("SUPPORT_CONSOLE_BUSY_TIMEOUT_MS", "250"),
            ("SUPPORT_CONSOLE_LOG_DIR", "/var/log/console"),
        ]))
        .unwrap();
        assert_eq!(config.bind.to_string(), "127.0.0.1:8081");
        assert_eq!(config.db_path, PathBuf::from("/tmp/console.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/console")));
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = ConsoleConfig::from_lookup(lookup_from(&[(
            "SUPPORT_CONSOLE_BROADCAST_CAPACITY",
            "lots",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SUPPORT_CONSOLE_BROADCAST_CAPACITY"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = ConsoleConfig::from_lookup(lookup_from(&[(
            "SUPPORT_CONSOLE_BROADCAST_CAPACITY",
            "0",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
