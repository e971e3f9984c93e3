//! Collector CLI transport.
//!
//! The collector CLI takes one heartbeat on its command line. The first
//! heartbeat of a batch becomes the arguments:
//!
//! ```text
//! <program> [program args] --entity <path> --time <timestamp> [--write]
//!           [--project <name>] [--language <tag>] [--key <key>]
//!           [--hostname <source id>] --plugin <name/version> [--extra-heartbeats]
//! ```
//!
//! When the batch holds more heartbeats, `--extra-heartbeats` is passed and
//! the remainder is written to the child's stdin as one JSON array followed
//! by a newline, after which stdin is closed.
//!
//! The key is never logged: the command line is passed through
//! [`redact_args`] first. In verbose mode the child's stdout and stderr are
//! captured while stdin is being written, and logged line by line once it
//! exits. A collector that runs past the timeout is killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Transport, TransportError, PLUGIN_ID};
use crate::privacy::{redact_args, ApiKey, KEY_FLAG};
use crate::serializer::serialize;
use crate::types::Heartbeat;

/// Default bound on one collector invocation in seconds.
pub const DEFAULT_CLI_TIMEOUT_SECS: u64 = 10;

/// Sends batches by invoking the collector CLI.
#[derive(Debug, Clone)]
pub struct CliTransport {
    program: PathBuf,
    program_args: Vec<String>,
    api_key: Option<ApiKey>,
    source_id: Option<String>,
    verbose: bool,
    timeout: Duration,
}

impl CliTransport {
    /// Creates a transport invoking `program`.
    #[must_use]
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            program_args: Vec::new(),
            api_key: None,
            source_id: None,
            verbose: false,
            timeout: Duration::from_secs(DEFAULT_CLI_TIMEOUT_SECS),
        }
    }

    /// Sets arguments placed before the heartbeat arguments, for collectors
    /// run through an interpreter (e.g., `python3 collector.py`).
    #[must_use]
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    /// Sets the API key passed with `--key`.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<ApiKey>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Sets the source identifier passed with `--hostname`.
    #[must_use]
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Enables logging of the collector's output.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets how long one invocation may run before the collector is killed.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the full argument list for `primary`.
    #[must_use]
    pub fn build_args(&self, primary: &Heartbeat, has_extra: bool) -> Vec<String> {
        let mut args = self.program_args.clone();

        args.push("--entity".to_string());
        args.push(primary.entity.clone());
        args.push("--time".to_string());
        args.push(primary.timestamp.to_string());

        if primary.is_write {
            args.push("--write".to_string());
        }
        if let Some(project) = &primary.project {
            args.push("--project".to_string());
            args.push(project.clone());
        }
        if let Some(language) = &primary.language {
            args.push("--language".to_string());
            args.push(language.clone());
        }
        if let Some(key) = &self.api_key {
            args.push(KEY_FLAG.to_string());
            args.push(key.expose().to_string());
        }
        if let Some(source_id) = &self.source_id {
            args.push("--hostname".to_string());
            args.push(source_id.clone());
        }

        args.push("--plugin".to_string());
        args.push(PLUGIN_ID.to_string());

        if has_extra {
            args.push("--extra-heartbeats".to_string());
        }

        args
    }

    /// Returns the command line as it may appear in logs.
    fn loggable_command(&self, args: &[String]) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(redact_args(args, self.api_key.as_ref()));
        parts.join(" ")
    }

    fn output_stdio(&self) -> Stdio {
        if self.verbose {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    }
}

impl Transport for CliTransport {
    async fn dispatch(&self, batch: &[Heartbeat]) -> Result<(), TransportError> {
        let (primary, remainder) = batch.split_first().ok_or(TransportError::EmptyBatch)?;
        let args = self.build_args(primary, !remainder.is_empty());

        let payload = if remainder.is_empty() {
            None
        } else {
            let mut payload = serialize(remainder)?;
            payload.push('\n');
            Some(payload)
        };

        debug!(
            command = %self.loggable_command(&args),
            extra_heartbeats = remainder.len(),
            "Invoking collector CLI"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(self.output_stdio())
            .stderr(self.output_stdio())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let run = async move {
            // Feed stdin while the child's output is drained so neither side
            // can block on a full pipe.
            let feed = async move {
                if let (Some(mut stdin), Some(payload)) = (stdin, payload) {
                    stdin.write_all(payload.as_bytes()).await?;
                    stdin.shutdown().await?;
                }
                Ok::<(), std::io::Error>(())
            };
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            Ok::<_, TransportError>((fed, output?))
        };

        // Dropping `run` on timeout drops the child, which kills it.
        let (fed, output) = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| TransportError::TimedOut(self.timeout))??;

        if self.verbose {
            log_lines("stdout", &output.stdout);
            log_lines("stderr", &output.stderr);
        }

        if !output.status.success() {
            return Err(TransportError::ExitStatus {
                status: output.status,
            });
        }
        fed?;

        info!(events = batch.len(), "Heartbeats handed to collector CLI");
        Ok(())
    }
}

fn log_lines(stream: &'static str, bytes: &[u8]) {
    for line in String::from_utf8_lossy(bytes).lines() {
        debug!(stream, line, "Collector output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn heartbeat() -> Heartbeat {
        Heartbeat {
            entity: "/src/main.rs".to_string(),
            timestamp: Timestamp::from_units(17_000_000_001_234),
            is_write: true,
            project: Some("demo".to_string()),
            language: Some("rs".to_string()),
        }
    }

    #[test]
    fn args_carry_primary_fields() {
        let transport = CliTransport::new("aw-heartbeat").with_source_id("workstation");
        let args = transport.build_args(&heartbeat(), false);

        assert_eq!(
            args,
            vec![
                "--entity",
                "/src/main.rs",
                "--time",
                "1700000000.1234",
                "--write",
                "--project",
                "demo",
                "--language",
                "rs",
                "--hostname",
                "workstation",
                "--plugin",
                PLUGIN_ID,
            ]
        );
    }

    #[test]
    fn optional_args_are_skipped() {
        let mut hb = heartbeat();
        hb.is_write = false;
        hb.project = None;
        hb.language = None;

        let args = CliTransport::new("aw-heartbeat").build_args(&hb, true);

        assert!(!args.contains(&"--write".to_string()));
        assert!(!args.contains(&"--project".to_string()));
        assert!(!args.contains(&"--language".to_string()));
        assert!(!args.contains(&KEY_FLAG.to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--extra-heartbeats"));
    }

    #[test]
    fn program_args_come_first() {
        let transport = CliTransport::new("python3")
            .with_program_args(vec!["collector.py".to_string()]);
        let args = transport.build_args(&heartbeat(), false);
        assert_eq!(args[0], "collector.py");
        assert_eq!(args[1], "--entity");
    }

    #[test]
    fn logged_command_hides_key() {
        let key = ApiKey::new("0123456789abcdef-secret");
        let transport = CliTransport::new("aw-heartbeat").with_api_key(Some(key.clone()));
        let args = transport.build_args(&heartbeat(), false);

        assert!(args.contains(&key.expose().to_string()));

        let logged = transport.loggable_command(&args);
        assert!(logged.starts_with("aw-heartbeat --entity"));
        assert!(!logged.contains(key.expose()));
        assert!(logged.contains(&key.obfuscated()));
    }

    #[test]
    fn default_timeout_is_bounded() {
        let transport = CliTransport::new("aw-heartbeat");
        assert_eq!(transport.timeout, Duration::from_secs(DEFAULT_CLI_TIMEOUT_SECS));

        let transport = transport.with_timeout(Duration::from_millis(250));
        assert_eq!(transport.timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn empty_batch_is_refused() {
        let transport = CliTransport::new("aw-heartbeat");
        assert!(matches!(
            transport.dispatch(&[]).await,
            Err(TransportError::EmptyBatch)
        ));
    }
}
