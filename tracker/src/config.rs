//! Configuration module for the Heartbeat Tracker.
//!
//! This module handles parsing configuration from environment variables.
//! Every variable is optional; unset variables fall back to the defaults
//! below.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HEARTBEAT_TRANSPORT` | `http` | `http` (POST to collector) or `cli` (spawn collector CLI) |
//! | `HEARTBEAT_COLLECTOR_HOST` | `localhost` | Collector host |
//! | `HEARTBEAT_COLLECTOR_PORT` | 5600 | Collector port |
//! | `HEARTBEAT_CLI_PATH` | `aw-heartbeat` | Collector CLI program |
//! | `HEARTBEAT_FLUSH_INTERVAL_SECS` | 30 | Seconds between scheduled flushes |
//! | `HEARTBEAT_DEBOUNCE_SECS` | 120 | Debounce window for repeated non-write activity |
//! | `HEARTBEAT_QUEUE_CAPACITY` | (unbounded) | Maximum pending heartbeats, oldest evicted first |
//! | `HEARTBEAT_SHUTDOWN_TIMEOUT_SECS` | 5 | Bound on the final flush at shutdown |
//! | `HEARTBEAT_IGNORE` | - | Comma-separated entity substrings to ignore |
//! | `HEARTBEAT_API_KEY` | - | Opaque key passed to the collector |
//! | `HEARTBEAT_SOURCE_ID` | hostname | Machine identifier sent with heartbeats |
//! | `HEARTBEAT_DEBUG` | `false` | Verbose logging, including collector output |
//!
//! # Example
//!
//! ```no_run
//! use heartbeat_tracker::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Collector: {}", config.collector_url());
//! ```

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::debounce::DEFAULT_DEBOUNCE_SECS;
use crate::flusher::{DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS};
use crate::privacy::ApiKey;

/// Default collector host.
const DEFAULT_COLLECTOR_HOST: &str = "localhost";

/// Default collector port.
pub const DEFAULT_COLLECTOR_PORT: u16 = 5600;

/// Default collector CLI program.
const DEFAULT_CLI_PATH: &str = "aw-heartbeat";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// How batches reach the collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// POST to the collector's HTTP endpoint.
    #[default]
    Http,
    /// Spawn the collector CLI.
    Cli,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "cli" => Ok(Self::Cli),
            other => Err(format!("expected 'http' or 'cli', got '{other}'")),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Cli => f.write_str("cli"),
        }
    }
}

/// Configuration for the Heartbeat Tracker.
///
/// `Debug` output is safe to log: the API key is obfuscated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport used to reach the collector.
    pub transport: TransportKind,

    /// Collector host for the HTTP transport.
    pub collector_host: String,

    /// Collector port for the HTTP transport.
    pub collector_port: u16,

    /// Collector CLI program for the CLI transport.
    pub cli_path: PathBuf,

    /// Interval between scheduled flushes.
    pub flush_interval: Duration,

    /// Window during which repeated non-write activity on one entity is
    /// suppressed.
    pub debounce_window: Duration,

    /// Maximum pending heartbeats. `None` means unbounded.
    pub queue_capacity: Option<usize>,

    /// Bound on the final flush at shutdown.
    pub shutdown_timeout: Duration,

    /// Extra entity substrings that never produce heartbeats.
    pub ignore_patterns: Vec<String>,

    /// Opaque key passed to the collector.
    pub api_key: Option<ApiKey>,

    /// Machine identifier sent with heartbeats.
    pub source_id: String,

    /// Verbose mode.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            collector_host: DEFAULT_COLLECTOR_HOST.to_string(),
            collector_port: DEFAULT_COLLECTOR_PORT,
            cli_path: PathBuf::from(DEFAULT_CLI_PATH),
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            debounce_window: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
            queue_capacity: None,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ignore_patterns: Vec::new(),
            api_key: None,
            source_id: get_hostname(),
            debug: false,
        }
    }
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if any variable is set to a value that cannot
    /// be parsed or is out of range (zero intervals, zero capacity, port 0).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let transport = parse_var::<TransportKind>("HEARTBEAT_TRANSPORT")?
            .unwrap_or(defaults.transport);

        let collector_host = non_empty_var("HEARTBEAT_COLLECTOR_HOST")
            .unwrap_or(defaults.collector_host);

        let collector_port = match parse_var::<u16>("HEARTBEAT_COLLECTOR_PORT")? {
            Some(0) => {
                return Err(invalid("HEARTBEAT_COLLECTOR_PORT", "port must be between 1 and 65535"))
            }
            Some(port) => port,
            None => defaults.collector_port,
        };

        let cli_path = non_empty_var("HEARTBEAT_CLI_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.cli_path);

        let flush_interval = positive_secs("HEARTBEAT_FLUSH_INTERVAL_SECS")?
            .unwrap_or(defaults.flush_interval);

        // A zero debounce window is allowed: it disables debouncing.
        let debounce_window = parse_var::<u64>("HEARTBEAT_DEBOUNCE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.debounce_window);

        let queue_capacity = match parse_var::<usize>("HEARTBEAT_QUEUE_CAPACITY")? {
            Some(0) => {
                return Err(invalid(
                    "HEARTBEAT_QUEUE_CAPACITY",
                    "queue capacity must be greater than 0",
                ))
            }
            capacity => capacity,
        };

        let shutdown_timeout = positive_secs("HEARTBEAT_SHUTDOWN_TIMEOUT_SECS")?
            .unwrap_or(defaults.shutdown_timeout);

        let ignore_patterns = env::var("HEARTBEAT_IGNORE")
            .map(|val| {
                val.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let api_key = non_empty_var("HEARTBEAT_API_KEY").map(ApiKey::new);

        let source_id = non_empty_var("HEARTBEAT_SOURCE_ID").unwrap_or(defaults.source_id);

        let debug = match env::var("HEARTBEAT_DEBUG") {
            Ok(val) => parse_bool(&val).ok_or_else(|| {
                invalid(
                    "HEARTBEAT_DEBUG",
                    &format!("expected true/false, got '{val}'"),
                )
            })?,
            Err(_) => defaults.debug,
        };

        Ok(Self {
            transport,
            collector_host,
            collector_port,
            cli_path,
            flush_interval,
            debounce_window,
            queue_capacity,
            shutdown_timeout,
            ignore_patterns,
            api_key,
            source_id,
            debug,
        })
    }

    /// Returns the collector base URL (e.g., `http://localhost:5600`).
    #[must_use]
    pub fn collector_url(&self) -> String {
        format!("http://{}:{}", self.collector_host, self.collector_port)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Reads a variable, treating unset and blank values alike.
fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses a variable with `FromStr`, `Ok(None)` when unset.
fn parse_var<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match non_empty_var(key) {
        Some(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &format!("{e} (got '{val}')"))),
        None => Ok(None),
    }
}

/// Parses a whole number of seconds that must be at least 1.
fn positive_secs(key: &str) -> Result<Option<Duration>, ConfigError> {
    match parse_var::<u64>(key)? {
        Some(0) => Err(invalid(key, "must be at least 1 second")),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Gets the system hostname, falling back to "unknown" if it cannot be determined.
fn get_hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown".to_string())
}
