//! Heartbeat Tracker - editor activity heartbeat host.
//!
//! This binary reads activity signals from an editor adapter as
//! newline-delimited JSON on stdin and forwards debounced heartbeats to the
//! local collector.
//!
//! # Commands
//!
//! - `heartbeat-tracker run`: Start tracking, reading activity from stdin
//! - `heartbeat-tracker config`: Print the effective configuration
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::pin::pin;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use heartbeat_tracker::config::Config;
use heartbeat_tracker::flusher::FlushOutcome;
use heartbeat_tracker::tracker::Tracker;
use heartbeat_tracker::transport::{CollectorTransport, Transport};
use heartbeat_tracker::types::{ActivityKind, ActivitySignal};

/// Heartbeat Tracker - editor activity heartbeat host.
///
/// Reads activity signals as JSON lines on stdin and forwards debounced
/// heartbeats to the local collector.
#[derive(Parser, Debug)]
#[command(name = "heartbeat-tracker")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    HEARTBEAT_TRANSPORT              http or cli (default: http)
    HEARTBEAT_COLLECTOR_HOST         Collector host (default: localhost)
    HEARTBEAT_COLLECTOR_PORT         Collector port (default: 5600)
    HEARTBEAT_CLI_PATH               Collector CLI (default: aw-heartbeat)
    HEARTBEAT_FLUSH_INTERVAL_SECS    Flush interval (default: 30)
    HEARTBEAT_DEBOUNCE_SECS          Debounce window (default: 120)
    HEARTBEAT_QUEUE_CAPACITY         Pending heartbeat limit (default: unbounded)
    HEARTBEAT_SHUTDOWN_TIMEOUT_SECS  Final flush bound (default: 5)
    HEARTBEAT_IGNORE                 Comma-separated entity substrings to ignore
    HEARTBEAT_API_KEY                Key passed to the collector
    HEARTBEAT_SOURCE_ID              Machine identifier (default: hostname)
    HEARTBEAT_DEBUG                  Verbose logging (default: false)

INPUT FORMAT (one JSON object per line):
    {\"entity\": \"/src/main.rs\", \"project\": \"demo\", \"kind\": \"saved\"}

    kind is one of saved, changed, clicked, scrolled (default: changed)

EXAMPLES:
    # Track activity piped from an editor adapter
    editor-adapter | heartbeat-tracker run

    # Show the effective configuration
    heartbeat-tracker config
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start tracking.
    ///
    /// Reads activity from stdin until EOF, Ctrl+C or SIGTERM, then performs
    /// a final flush.
    Run {
        /// Enable debug logging (overrides HEARTBEAT_DEBUG).
        #[arg(short, long)]
        debug: bool,
    },

    /// Print the effective configuration with the API key obfuscated.
    Config,
}

/// One line of adapter input.
#[derive(Debug, Deserialize)]
struct ActivityLine {
    entity: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default = "default_kind")]
    kind: ActivityKind,
    #[serde(default)]
    language: Option<String>,
}

fn default_kind() -> ActivityKind {
    ActivityKind::DocumentChanged
}

impl ActivityLine {
    fn into_signal(self) -> ActivitySignal {
        ActivitySignal::now(self.entity, self.kind.is_write())
            .with_project(self.project.as_deref())
            .with_language(self.language.as_deref())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Config => print_config(),
        Command::Run { debug } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_tracker(debug))
        }
    }
}

/// Prints the effective configuration.
fn print_config() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    println!("transport:        {}", config.transport);
    println!("collector:        {}", config.collector_url());
    println!("cli path:         {}", config.cli_path.display());
    println!("flush interval:   {}s", config.flush_interval.as_secs());
    println!("debounce window:  {}s", config.debounce_window.as_secs());
    match config.queue_capacity {
        Some(capacity) => println!("queue capacity:   {capacity}"),
        None => println!("queue capacity:   unbounded"),
    }
    println!("shutdown timeout: {}s", config.shutdown_timeout.as_secs());
    println!("ignore patterns:  {}", config.ignore_patterns.join(", "));
    match &config.api_key {
        Some(key) => println!("api key:          {}", key.obfuscated()),
        None => println!("api key:          (none)"),
    }
    println!("source id:        {}", config.source_id);
    println!("debug:            {}", config.debug);

    Ok(())
}

async fn run_tracker(debug_flag: bool) -> Result<()> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    config.debug |= debug_flag;

    init_logging(config.debug);

    info!("Starting Heartbeat Tracker");
    info!(
        transport = %config.transport,
        collector = %config.collector_url(),
        source_id = %config.source_id,
        "Configuration loaded"
    );

    let transport =
        CollectorTransport::from_config(&config).context("Failed to create collector transport")?;
    let tracker = Tracker::start(&config, transport).context("Failed to start tracker")?;

    info!("Tracker running. Reading activity from stdin, press Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shutdown = pin!(wait_for_shutdown());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }

            line = lines.next_line() => match line {
                Ok(Some(line)) => process_line(&tracker, &line),
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read activity input");
                    break;
                }
            }
        }
    }

    info!("Shutting down...");

    match tracker.shutdown().await {
        FlushOutcome::Failed { count } => {
            error!(unflushed_events = count, "Some heartbeats could not be sent");
        }
        FlushOutcome::TimedOut => {
            error!("Final flush did not complete, pending heartbeats may be lost");
        }
        FlushOutcome::Empty | FlushOutcome::Delivered { .. } => {}
    }

    info!("Tracker stopped");
    Ok(())
}

/// Parses one input line and records it.
fn process_line<T: Transport>(tracker: &Tracker<T>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<ActivityLine>(line) {
        Ok(activity) => {
            let entity = activity.entity.clone();
            if !tracker.record(activity.into_signal()) {
                debug!(entity = %entity, "Activity filtered");
            }
        }
        Err(e) => warn!(error = %e, "Skipping malformed activity line"),
    }
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows the debug flag.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_line_defaults_to_change() {
        let line: ActivityLine = serde_json::from_str(r#"{"entity": "/a.py"}"#).unwrap();
        assert_eq!(line.kind, ActivityKind::DocumentChanged);
        assert!(line.project.is_none());

        let signal = line.into_signal();
        assert_eq!(signal.entity, "/a.py");
        assert!(!signal.is_write);
    }

    #[test]
    fn activity_line_saved_is_write() {
        let line: ActivityLine = serde_json::from_str(
            r#"{"entity": "/a.py", "project": "demo", "kind": "saved", "language": "python"}"#,
        )
        .unwrap();

        let signal = line.into_signal();
        assert!(signal.is_write);
        assert_eq!(signal.project.as_deref(), Some("demo"));
        assert_eq!(signal.language.as_deref(), Some("python"));
    }

    #[test]
    fn activity_line_requires_entity() {
        assert!(serde_json::from_str::<ActivityLine>(r#"{"kind": "saved"}"#).is_err());
    }

    #[test]
    fn cli_parses_run_with_debug() {
        let cli = Cli::try_parse_from(["heartbeat-tracker", "run", "--debug"]).unwrap();
        assert!(matches!(cli.command, Command::Run { debug: true }));

        let cli = Cli::try_parse_from(["heartbeat-tracker", "config"]).unwrap();
        assert!(matches!(cli.command, Command::Config));
    }
}
