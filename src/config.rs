//! Command-line configuration.
//!
//! Every flag has a default, so running with no arguments listens on
//! `127.0.0.1:6379` and persists to `data.txt` / `expiry.txt` once a second.

use crate::persistence::PersistenceConfig;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Persisted files and sync interval
    pub persistence: PersistenceConfig,
    /// Track deadlines in a heap and sweep expired keys in the background
    pub active_expiry: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            persistence: PersistenceConfig::default(),
            active_expiry: false,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(Config),
    Help,
    Version,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

impl Config {
    /// Parses configuration from command-line arguments, program name excluded.
    pub fn parse<I, S>(args: I) -> Result<Invocation, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => {
                    config.host = required(&arg, args.next())?;
                }
                "--port" | "-p" => {
                    let value = required(&arg, args.next())?;
                    config.port = parse_value(&arg, value)?;
                }
                "--data-file" => {
                    config.persistence.data_path = PathBuf::from(required(&arg, args.next())?);
                }
                "--expiry-file" => {
                    config.persistence.expiry_path = PathBuf::from(required(&arg, args.next())?);
                }
                "--sync-interval-ms" => {
                    let value = required(&arg, args.next())?;
                    let millis: u64 = parse_value(&arg, value.clone())?;
                    if millis == 0 {
                        return Err(ConfigError::InvalidValue { flag: arg, value });
                    }
                    config.persistence.interval = Duration::from_millis(millis);
                }
                "--active-expiry" => config.active_expiry = true,
                "--help" => return Ok(Invocation::Help),
                "--version" | "-v" => return Ok(Invocation::Version),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(Invocation::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

pub fn help_text() -> String {
    format!(
        r#"
ttlkv - An in-memory key-value server with TTLs and file persistence

USAGE:
    ttlkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>             Host to bind to (default: {host})
    -p, --port <PORT>             Port to listen on (default: {port})
        --data-file <PATH>        File holding key:value lines (default: {data})
        --expiry-file <PATH>      File holding key:unix_seconds lines (default: {expiry})
        --sync-interval-ms <MS>   Time between dumps to disk (default: {interval})
        --active-expiry           Sweep expired keys in the background
    -v, --version                 Print version information
        --help                    Print this help message

EXAMPLES:
    ttlkv                                   # Start on 127.0.0.1:6379
    ttlkv --port 6380                       # Start on port 6380
    ttlkv --data-file /var/lib/ttlkv/d.txt  # Persist somewhere else

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET session token PX 60000
    OK
    127.0.0.1:6379> GET session
    "token"
"#,
        host = crate::DEFAULT_HOST,
        port = crate::DEFAULT_PORT,
        data = crate::DEFAULT_DATA_FILE,
        expiry = crate::DEFAULT_EXPIRY_FILE,
        interval = crate::DEFAULT_SYNC_INTERVAL.as_millis(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config(args: &[&str]) -> Config {
        match Config::parse(args.iter().copied()) {
            Ok(Invocation::Run(config)) => config,
            other => panic!("expected a run configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = run_config(&[]);

        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.persistence.data_path, PathBuf::from("data.txt"));
        assert_eq!(config.persistence.expiry_path, PathBuf::from("expiry.txt"));
        assert_eq!(config.persistence.interval, Duration::from_secs(1));
        assert!(!config.active_expiry);
    }

    #[test]
    fn test_all_flags() {
        let config = run_config(&[
            "-h",
            "0.0.0.0",
            "--port",
            "6380",
            "--data-file",
            "/tmp/d.txt",
            "--expiry-file",
            "/tmp/e.txt",
            "--sync-interval-ms",
            "250",
            "--active-expiry",
        ]);

        assert_eq!(config.bind_address(), "0.0.0.0:6380");
        assert_eq!(config.persistence.data_path, PathBuf::from("/tmp/d.txt"));
        assert_eq!(config.persistence.expiry_path, PathBuf::from("/tmp/e.txt"));
        assert_eq!(config.persistence.interval, Duration::from_millis(250));
        assert!(config.active_expiry);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(Config::parse(["--help"]), Ok(Invocation::Help));
        assert_eq!(Config::parse(["-v"]), Ok(Invocation::Version));
        assert_eq!(Config::parse(["-p", "1", "--version"]), Ok(Invocation::Version));
    }

    #[test]
    fn test_missing_value() {
        assert_eq!(
            Config::parse(["--port"]),
            Err(ConfigError::MissingValue("--port".to_string()))
        );
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            Config::parse(["-p", "99999"]),
            Err(ConfigError::InvalidValue {
                flag: "-p".to_string(),
                value: "99999".to_string(),
            })
        );
        assert!(matches!(
            Config::parse(["--sync-interval-ms", "0"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            Config::parse(["--sync-interval-ms", "soon"]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_unknown_argument() {
        assert_eq!(
            Config::parse(["--bogus"]),
            Err(ConfigError::UnknownArgument("--bogus".to_string()))
        );
    }
}
