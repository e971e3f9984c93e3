//! The tracker facade wiring filter, queue and flusher together.
//!
//! Editor adapters talk to a [`Recorder`], a cheap cloneable handle that can
//! be called from any thread. Recording never blocks on I/O and never
//! returns an error: the signal is timestamped immediately, then filtered
//! and enqueued on the runtime. Shutdown waits for those pending record
//! tasks before the final flush, so activity reported before shutdown
//! began is part of the final batch.
//!
//! ```no_run
//! use heartbeat_tracker::config::Config;
//! use heartbeat_tracker::tracker::Tracker;
//! use heartbeat_tracker::transport::CollectorTransport;
//!
//! #[tokio::main]
//! async fn main() -> heartbeat_tracker::Result<()> {
//!     let config = Config::from_env()?;
//!     let transport = CollectorTransport::from_config(&config)?;
//!     let tracker = Tracker::start(&config, transport)?;
//!
//!     let recorder = tracker.recorder();
//!     std::thread::spawn(move || {
//!         recorder.notify_activity("/src/main.rs", Some("demo"), false);
//!     });
//!
//!     tracker.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::{Config, ConfigError};
use crate::debounce::{DebounceFilter, IgnoreList};
use crate::error::TrackerError;
use crate::flusher::{BatchFlusher, FlushOutcome, FlusherHandle};
use crate::queue::HeartbeatQueue;
use crate::transport::Transport;
use crate::types::{ActivityKind, ActivitySignal, Heartbeat};

struct TrackerInner {
    filter: DebounceFilter,
    queue: Arc<HeartbeatQueue>,
    accepting: AtomicBool,
    /// Record tasks spawned by `notify_activity`. `None` once shutdown has
    /// taken them over.
    pending_records: Mutex<Option<JoinSet<()>>>,
}

impl TrackerInner {
    fn record(&self, signal: ActivitySignal) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            trace!(entity = %signal.entity, "Tracker stopped, dropping signal");
            return false;
        }
        self.record_accepted(signal)
    }

    /// Filters and enqueues a signal that was admitted before shutdown.
    fn record_accepted(&self, signal: ActivitySignal) -> bool {
        if !self.filter.accept(&signal) {
            return false;
        }

        match Heartbeat::from_signal(signal) {
            Ok(heartbeat) => {
                debug!(
                    entity = %heartbeat.entity,
                    is_write = heartbeat.is_write,
                    "Heartbeat queued"
                );
                self.queue.enqueue(heartbeat);
                true
            }
            Err(e) => {
                warn!(error = %e, "Discarding invalid activity signal");
                false
            }
        }
    }
}

/// Cloneable entry point for editor adapters.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<TrackerInner>,
    runtime: Handle,
}

impl Recorder {
    /// Reports activity on `resource_id`.
    ///
    /// The timestamp is taken now; filtering and enqueueing happen on the
    /// runtime. Safe to call from any thread, including ones outside the
    /// runtime.
    pub fn notify_activity(&self, resource_id: &str, project: Option<&str>, is_write: bool) {
        let signal = ActivitySignal::now(resource_id, is_write).with_project(project);

        let mut pending = self
            .inner
            .pending_records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(tasks) = pending.as_mut() else {
            trace!(entity = %signal.entity, "Tracker stopped, dropping signal");
            return;
        };

        // Reap finished tasks so the set only holds in-flight records.
        while tasks.try_join_next().is_some() {}

        let inner = Arc::clone(&self.inner);
        tasks.spawn_on(
            async move {
                inner.record_accepted(signal);
            },
            &self.runtime,
        );
    }

    /// Reports an editor interaction of the given kind.
    pub fn notify(&self, kind: ActivityKind, resource_id: &str, project: Option<&str>) {
        self.notify_activity(resource_id, project, kind.is_write());
    }

    /// Filters and enqueues `signal` on the calling thread.
    ///
    /// Returns `true` if a heartbeat was queued.
    pub fn record(&self, signal: ActivitySignal) -> bool {
        self.inner.record(signal)
    }
}

/// A running heartbeat tracker.
pub struct Tracker<T> {
    recorder: Recorder,
    flusher: FlusherHandle<T>,
    shutdown_timeout: Duration,
}

impl<T: Transport> Tracker<T> {
    /// Starts the tracker: builds the filter and queue from `config` and
    /// schedules the flusher.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NoRuntime`] when called outside a Tokio
    /// runtime, and [`TrackerError::Config`] for a zero flush interval.
    pub fn start(config: &Config, transport: T) -> Result<Self, TrackerError> {
        if config.flush_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "flush_interval".to_string(),
                message: "must be greater than zero".to_string(),
            }
            .into());
        }

        let runtime = Handle::try_current().map_err(|_| TrackerError::NoRuntime)?;

        let queue = Arc::new(HeartbeatQueue::with_capacity(config.queue_capacity));
        let filter = DebounceFilter::new(
            config.debounce_window,
            IgnoreList::new(config.ignore_patterns.clone()),
        );

        let inner = Arc::new(TrackerInner {
            filter,
            queue: Arc::clone(&queue),
            accepting: AtomicBool::new(true),
            pending_records: Mutex::new(Some(JoinSet::new())),
        });

        let flusher = BatchFlusher::new(queue, transport)
            .spawn(config.flush_interval, config.shutdown_timeout);

        info!(
            debounce_secs = config.debounce_window.as_secs(),
            queue_capacity = ?config.queue_capacity,
            "Heartbeat tracker started"
        );

        Ok(Self {
            recorder: Recorder { inner, runtime },
            flusher,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Returns a handle for reporting activity.
    #[must_use]
    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    /// See [`Recorder::notify_activity`].
    pub fn notify_activity(&self, resource_id: &str, project: Option<&str>, is_write: bool) {
        self.recorder.notify_activity(resource_id, project, is_write);
    }

    /// See [`Recorder::notify`].
    pub fn notify(&self, kind: ActivityKind, resource_id: &str, project: Option<&str>) {
        self.recorder.notify(kind, resource_id, project);
    }

    /// See [`Recorder::record`].
    pub fn record(&self, signal: ActivitySignal) -> bool {
        self.recorder.record(signal)
    }

    /// Number of heartbeats waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.recorder.inner.queue.len()
    }

    /// Flushes immediately, outside the schedule.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.flusher.flush_now().await
    }

    /// Stops accepting activity, waits for activity already reported,
    /// cancels the schedule and performs the final flush.
    ///
    /// The whole sequence is bounded by the configured shutdown timeout.
    /// Recorders still held by adapters become no-ops.
    pub async fn shutdown(self) -> FlushOutcome {
        let deadline = Instant::now() + self.shutdown_timeout;
        let inner = &self.recorder.inner;

        let pending = {
            let mut slot = inner
                .pending_records
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            inner.accepting.store(false, Ordering::Release);
            slot.take()
        };

        if let Some(mut tasks) = pending {
            let drained = timeout_at(deadline, async {
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        warn!(error = %e, "Record task failed");
                    }
                }
            })
            .await;
            if drained.is_err() {
                warn!(
                    unrecorded = tasks.len(),
                    "Timed out waiting for reported activity, dropping it"
                );
            }
        }

        let outcome = self.flusher.shutdown_by(deadline).await;
        info!(?outcome, "Heartbeat tracker stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use crate::types::Timestamp;

    #[derive(Default)]
    struct Recording {
        batches: Mutex<Vec<Vec<Heartbeat>>>,
    }

    impl Transport for Recording {
        async fn dispatch(&self, batch: &[Heartbeat]) -> Result<(), TransportError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    fn config() -> Config {
        Config {
            flush_interval: Duration::from_secs(3600),
            ..Config::default()
        }
    }

    fn signal(entity: &str, is_write: bool, secs: u64) -> ActivitySignal {
        ActivitySignal::new(entity, is_write, Timestamp::from_secs(secs))
    }

    #[test]
    fn start_outside_runtime_fails() {
        let result = Tracker::start(&config(), Recording::default());
        assert!(matches!(result, Err(TrackerError::NoRuntime)));
    }

    #[tokio::test]
    async fn record_applies_debounce() {
        let tracker = Tracker::start(&config(), Recording::default()).unwrap();

        assert!(tracker.record(signal("/a.py", false, 0)));
        assert!(!tracker.record(signal("/a.py", false, 5)));
        assert!(tracker.record(signal("/a.py", true, 6)));
        assert_eq!(tracker.pending(), 2);

        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn heartbeat_gets_language_from_extension() {
        let transport = Arc::new(Recording::default());
        let tracker = Tracker::start(&config(), Arc::clone(&transport)).unwrap();

        tracker.record(signal("/src/lib.RS", false, 0).with_project(Some("demo")));
        tracker.shutdown().await;

        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches[0][0].language.as_deref(), Some("rs"));
        assert_eq!(batches[0][0].project.as_deref(), Some("demo"));
    }

    #[tokio::test]
    async fn recorder_is_inert_after_shutdown() {
        let tracker = Tracker::start(&config(), Recording::default()).unwrap();
        let recorder = tracker.recorder();

        tracker.shutdown().await;

        assert!(!recorder.record(signal("/late.rs", true, 1)));
    }

    #[tokio::test]
    async fn notify_enqueues_eventually() {
        let tracker = Tracker::start(&config(), Recording::default()).unwrap();

        tracker.notify(ActivityKind::DocumentSaved, "/a.rs", None);

        for _ in 0..100 {
            if tracker.pending() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tracker.pending(), 1);

        tracker.shutdown().await;
    }

    #[test]
    fn start_rejects_zero_flush_interval() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let config = Config {
            flush_interval: Duration::ZERO,
            ..Config::default()
        };
        let result = Tracker::start(&config, Recording::default());
        assert!(matches!(
            result,
            Err(TrackerError::Config(ConfigError::InvalidValue { ref key, .. })) if key == "flush_interval"
        ));
    }

    #[tokio::test]
    async fn notified_activity_is_in_final_batch() {
        let transport = Arc::new(Recording::default());
        let tracker = Tracker::start(&config(), Arc::clone(&transport)).unwrap();

        tracker.notify_activity("/a.py", None, true);
        tracker.notify_activity("/b.py", None, true);
        tracker.notify_activity("/c.py", None, true);

        assert_eq!(
            tracker.shutdown().await,
            FlushOutcome::Delivered { count: 3 }
        );
        assert_eq!(transport.batches.lock().unwrap()[0].len(), 3);
    }

    #[tokio::test]
    async fn notify_after_shutdown_is_dropped() {
        let tracker = Tracker::start(&config(), Recording::default()).unwrap();
        let recorder = tracker.recorder();
        tracker.shutdown().await;

        recorder.notify_activity("/late.rs", None, true);
        assert!(recorder
            .inner
            .pending_records
            .lock()
            .unwrap()
            .is_none());
        assert_eq!(recorder.inner.queue.len(), 0);
    }
}
