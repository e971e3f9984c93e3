//! Heartbeat Tracker - editor activity heartbeats for a local collector.
//!
//! This crate turns a stream of editor activity signals (saves, edits,
//! clicks, scrolling) into debounced heartbeats and delivers them in batches
//! to a local activity collector.
//!
//! # Overview
//!
//! Editor adapters report activity through a [`Recorder`]. Each signal is
//! timestamped on arrival, checked against the ignore list and the debounce
//! window, and queued. A background flusher drains the queue on a fixed
//! interval and once more at shutdown, handing each batch to a
//! [`Transport`](transport::Transport): either an HTTP POST to the collector
//! or an invocation of the collector CLI.
//!
//! Delivery is best-effort. Failed batches are logged and dropped, and
//! nothing survives a process restart.
//!
//! # Modules
//!
//! - [`types`]: Timestamps, activity signals and heartbeats
//! - [`debounce`]: Ignore rules and the debounce filter
//! - [`queue`]: Thread-safe pending heartbeat queue
//! - [`serializer`]: JSON wire format for batches
//! - [`flusher`]: Scheduled and final batch flushing
//! - [`transport`]: HTTP and CLI delivery to the collector
//! - [`tracker`]: Facade wiring everything together
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for tracker operations
//! - [`privacy`]: API key handling and log redaction

pub mod config;
pub mod debounce;
pub mod error;
pub mod flusher;
pub mod privacy;
pub mod queue;
pub mod serializer;
pub mod tracker;
pub mod transport;
pub mod types;

pub use config::{Config, ConfigError, TransportKind};
pub use debounce::{DebounceFilter, IgnoreList, DEFAULT_DEBOUNCE_SECS};
pub use error::{Result, TrackerError};
pub use flusher::{BatchFlusher, FlushOutcome, FlusherHandle};
pub use privacy::ApiKey;
pub use queue::HeartbeatQueue;
pub use tracker::{Recorder, Tracker};
pub use transport::{CliTransport, CollectorTransport, HttpTransport, Transport, TransportError};
pub use types::{ActivityKind, ActivitySignal, Heartbeat, HeartbeatError, Timestamp};
