//! Batch flusher: drains the queue and hands batches to the transport.
//!
//! # Design
//!
//! - **Single consumer**: one flush runs at a time. Scheduled ticks and
//!   explicit [`BatchFlusher::flush_now`] calls serialize on an async mutex.
//!
//! - **Fire-and-forget**: a failed delivery is logged and the batch is
//!   dropped. Nothing is requeued and nothing propagates to producers.
//!
//! - **Schedule**: [`BatchFlusher::spawn`] starts a task that flushes every
//!   interval, first tick one interval after start. [`FlusherHandle::shutdown`]
//!   stops the schedule, waits for a flush already in flight, then performs a
//!   final flush. The whole sequence shares one deadline: a scheduled flush
//!   still running at the deadline is aborted. No scheduled flush can start
//!   once shutdown has begun.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use heartbeat_tracker::flusher::BatchFlusher;
//! use heartbeat_tracker::queue::HeartbeatQueue;
//! use heartbeat_tracker::transport::HttpTransport;
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = Arc::new(HeartbeatQueue::unbounded());
//!     let transport = HttpTransport::new("http://localhost:5600").unwrap();
//!
//!     let handle = BatchFlusher::new(Arc::clone(&queue), transport)
//!         .spawn(Duration::from_secs(30), Duration::from_secs(5));
//!
//!     // ... producers enqueue into `queue` ...
//!
//!     let outcome = handle.shutdown().await;
//!     println!("final flush: {outcome:?}");
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::queue::HeartbeatQueue;
use crate::serializer::sanitize_batch;
use crate::transport::Transport;

/// Default interval between scheduled flushes in seconds.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;

/// Default bound on shutdown, final flush included, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Shortest schedule period; `interval_at` rejects zero.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Result of a single flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending (or nothing survived validation).
    Empty,
    /// The transport accepted the batch.
    Delivered { count: usize },
    /// The transport failed; the batch was dropped.
    Failed { count: usize },
    /// Shutdown did not finish within the shutdown timeout.
    TimedOut,
}

/// Drains the heartbeat queue and dispatches batches.
pub struct BatchFlusher<T> {
    queue: Arc<HeartbeatQueue>,
    transport: T,
    in_flight: Mutex<()>,
}

impl<T: Transport> BatchFlusher<T> {
    /// Creates a flusher over `queue` delivering through `transport`.
    #[must_use]
    pub fn new(queue: Arc<HeartbeatQueue>, transport: T) -> Self {
        Self {
            queue,
            transport,
            in_flight: Mutex::new(()),
        }
    }

    /// Drains everything pending and dispatches it as one batch.
    ///
    /// Waits for any flush already running to finish first.
    pub async fn flush_now(&self) -> FlushOutcome {
        let _guard = self.in_flight.lock().await;

        let drained = self.queue.drain_all();
        if drained.is_empty() {
            return FlushOutcome::Empty;
        }

        let batch = sanitize_batch(drained);
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        debug!(events = count, "Flushing heartbeat batch");

        match self.transport.dispatch(&batch).await {
            Ok(()) => FlushOutcome::Delivered { count },
            Err(e) => {
                warn!(error = %e, events = count, "Failed to deliver heartbeats, dropping batch");
                FlushOutcome::Failed { count }
            }
        }
    }

    /// Starts flushing every `interval` on a background task.
    ///
    /// A zero `interval` is raised to one millisecond. Must be called from
    /// within a Tokio runtime.
    #[must_use]
    pub fn spawn(self, interval: Duration, shutdown_timeout: Duration) -> FlusherHandle<T> {
        let interval = interval.max(MIN_FLUSH_INTERVAL);
        let flusher = Arc::new(self);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task_flusher = Arc::clone(&flusher);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = &mut stop_rx => break,

                    _ = ticker.tick() => {
                        task_flusher.flush_now().await;
                    }
                }
            }

            debug!("Flush schedule stopped");
        });

        info!(
            interval_secs = interval.as_secs_f64(),
            "Heartbeat flusher started"
        );

        FlusherHandle {
            flusher,
            stop_tx: Some(stop_tx),
            task,
            shutdown_timeout,
        }
    }
}

/// Handle to a running flush schedule.
pub struct FlusherHandle<T> {
    flusher: Arc<BatchFlusher<T>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl<T: Transport> FlusherHandle<T> {
    /// Flushes immediately, outside the schedule.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.flusher.flush_now().await
    }

    /// Stops the schedule and performs the final flush, all within the
    /// shutdown timeout.
    ///
    /// Heartbeats enqueued after the final flush has drained the queue are
    /// lost.
    pub async fn shutdown(self) -> FlushOutcome {
        let deadline = Instant::now() + self.shutdown_timeout;
        self.shutdown_by(deadline).await
    }

    /// Like [`shutdown`](Self::shutdown), against an explicit deadline.
    pub async fn shutdown_by(mut self, deadline: Instant) -> FlushOutcome {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already be gone; either way it no longer ticks.
            let _ = stop_tx.send(());
        }

        match timeout_at(deadline, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Flush schedule task failed"),
            Err(_) => {
                warn!("Scheduled flush still running at shutdown deadline, aborting it");
                self.task.abort();
                return self.timed_out();
            }
        }

        info!(pending = self.flusher.queue.len(), "Performing final heartbeat flush");

        match timeout_at(deadline, self.flusher.flush_now()).await {
            Ok(outcome) => outcome,
            Err(_) => self.timed_out(),
        }
    }

    fn timed_out(&self) -> FlushOutcome {
        error!(
            timeout_secs = self.shutdown_timeout.as_secs_f64(),
            pending = self.flusher.queue.len(),
            "Timed out during heartbeat shutdown"
        );
        FlushOutcome::TimedOut
    }
}
