//! Delivery of heartbeat batches to the collector.
//!
//! A [`Transport`] takes one batch and reports whether the collector accepted
//! it. Two implementations ship with the crate:
//!
//! - [`HttpTransport`]: POSTs the whole batch to the local collector (port
//!   5600 by default)
//! - [`CliTransport`]: spawns the collector CLI with the first heartbeat as
//!   arguments and the remaining heartbeats as JSON on stdin
//!
//! [`CollectorTransport`] selects one of them from [`Config`].
//!
//! Failures are reported to the caller and never retried here; the flusher
//! logs them and drops the batch.

pub mod cli;
pub mod http;

use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{Config, TransportKind};
use crate::types::Heartbeat;

pub use cli::CliTransport;
pub use http::HttpTransport;

/// Identifies this tracker to the collector (`name/version`).
pub const PLUGIN_ID: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while delivering a batch.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The batch contained no heartbeats.
    #[error("cannot dispatch an empty batch")]
    EmptyBatch,

    /// The collector process could not be started.
    #[error("failed to spawn collector `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Writing to or reading from the collector process failed.
    #[error("collector I/O error: {0}")]
    Io(#[from] io::Error),

    /// The collector process exited unsuccessfully.
    #[error("collector exited unsuccessfully ({status})")]
    ExitStatus { status: ExitStatus },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("collector rejected batch: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The batch could not be encoded.
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The collector did not finish in time.
    #[error("collector did not finish within {0:?}")]
    TimedOut(Duration),

    /// A header value (source id or key) contains invalid characters.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// Delivers heartbeat batches to a collector.
///
/// Implementations are called from the flusher task only, one batch at a
/// time. The batch is never empty and is in queue order.
pub trait Transport: Send + Sync + 'static {
    /// Sends `batch` to the collector.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when the collector could not be reached or
    /// did not accept the batch.
    fn dispatch(&self, batch: &[Heartbeat])
        -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn dispatch(
        &self,
        batch: &[Heartbeat],
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).dispatch(batch)
    }
}

/// The transport selected by configuration.
#[derive(Debug)]
pub enum CollectorTransport {
    /// POST to the local collector endpoint.
    Http(HttpTransport),
    /// Invoke the collector CLI.
    Cli(CliTransport),
}

impl CollectorTransport {
    /// Builds the transport described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the HTTP client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        match config.transport {
            TransportKind::Http => Ok(Self::Http(
                HttpTransport::new(&config.collector_url())?
                    .with_api_key(config.api_key.clone())
                    .with_source_id(config.source_id.clone()),
            )),
            TransportKind::Cli => Ok(Self::Cli(
                CliTransport::new(&config.cli_path)
                    .with_api_key(config.api_key.clone())
                    .with_source_id(config.source_id.clone())
                    .with_verbose(config.debug),
            )),
        }
    }
}

impl Transport for CollectorTransport {
    async fn dispatch(&self, batch: &[Heartbeat]) -> Result<(), TransportError> {
        match self {
            Self::Http(transport) => transport.dispatch(batch).await,
            Self::Cli(transport) => transport.dispatch(batch).await,
        }
    }
}
