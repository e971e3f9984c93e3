//! Debounce filter for activity signals.
//!
//! Continuous editing of one file would otherwise produce a heartbeat per
//! keystroke. The filter keeps the last accepted `(entity, timestamp)` pair
//! and drops non-write signals for the same entity until the debounce window
//! has elapsed. Writes are always significant and are never debounced.
//!
//! Before any timing decision, signals for ignored resources (IDE workspace
//! metadata, virtual `mock://` documents, user-configured patterns) are
//! rejected without touching the debounce state.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use heartbeat_tracker::debounce::{DebounceFilter, IgnoreList};
//! use heartbeat_tracker::types::{ActivitySignal, Timestamp};
//!
//! let filter = DebounceFilter::new(Duration::from_secs(120), IgnoreList::default());
//!
//! let first = ActivitySignal::new("/a.py", false, Timestamp::from_secs(0));
//! let again = ActivitySignal::new("/a.py", false, Timestamp::from_secs(5));
//! let saved = ActivitySignal::new("/a.py", true, Timestamp::from_secs(6));
//!
//! assert!(filter.accept(&first));
//! assert!(!filter.accept(&again));
//! assert!(filter.accept(&saved));
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::types::{ActivitySignal, Timestamp};

/// Default debounce window in seconds.
pub const DEFAULT_DEBOUNCE_SECS: u64 = 120;

/// URL prefixes of virtual documents that never represent real files.
const IGNORED_PREFIXES: &[&str] = &["mock://"];

/// Paths ignored on exact match.
const IGNORED_PATHS: &[&str] = &["atlassian-ide-plugin.xml"];

/// Path fragments ignored wherever they appear.
const IGNORED_FRAGMENTS: &[&str] = &["/.idea/workspace.xml"];

/// Static predicate over entities that must never produce heartbeats.
///
/// The built-in rules cover IDE metadata and virtual documents; additional
/// substrings can be supplied through configuration.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    extra_patterns: Vec<String>,
}

impl IgnoreList {
    /// Creates an ignore list with extra substring patterns on top of the
    /// built-in rules. Blank patterns are discarded.
    #[must_use]
    pub fn new(extra_patterns: Vec<String>) -> Self {
        let extra_patterns = extra_patterns
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { extra_patterns }
    }

    /// Returns `true` if `entity` must not produce heartbeats.
    ///
    /// Empty entities are always ignored.
    #[must_use]
    pub fn is_ignored(&self, entity: &str) -> bool {
        entity.is_empty()
            || IGNORED_PREFIXES.iter().any(|p| entity.starts_with(p))
            || IGNORED_PATHS.contains(&entity)
            || IGNORED_FRAGMENTS.iter().any(|f| entity.contains(f))
            || self.extra_patterns.iter().any(|p| entity.contains(p.as_str()))
    }
}

#[derive(Debug, Default)]
struct DebounceState {
    last_entity: Option<String>,
    last_timestamp: Timestamp,
}

/// Decides whether an activity signal is worth recording.
///
/// The state is a single `(entity, timestamp)` snapshot behind a mutex.
/// Concurrent producers may occasionally both pass the check for the same
/// entity; heartbeats are best-effort, so a rare duplicate is acceptable.
#[derive(Debug)]
pub struct DebounceFilter {
    window: Duration,
    ignore: IgnoreList,
    state: Mutex<DebounceState>,
}

impl DebounceFilter {
    /// Creates a filter with the given debounce window and ignore list.
    #[must_use]
    pub fn new(window: Duration, ignore: IgnoreList) -> Self {
        Self {
            window,
            ignore,
            state: Mutex::new(DebounceState::default()),
        }
    }

    /// Creates a filter with the default 120 second window.
    #[must_use]
    pub fn with_default_window(ignore: IgnoreList) -> Self {
        Self::new(Duration::from_secs(DEFAULT_DEBOUNCE_SECS), ignore)
    }

    /// Returns the debounce window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` if the signal should become a heartbeat.
    ///
    /// Accepted signals replace the debounce state; rejected signals leave it
    /// untouched.
    pub fn accept(&self, signal: &ActivitySignal) -> bool {
        if self.ignore.is_ignored(&signal.entity) {
            trace!(entity = %signal.entity, "Ignoring signal for excluded entity");
            return false;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if !signal.is_write {
            let same_entity = state.last_entity.as_deref() == Some(signal.entity.as_str());
            let elapsed = signal.timestamp.elapsed_since(state.last_timestamp);

            if same_entity && elapsed < self.window {
                trace!(
                    entity = %signal.entity,
                    elapsed_ms = elapsed.as_millis(),
                    "Debounced signal"
                );
                return false;
            }
        }

        state.last_entity = Some(signal.entity.clone());
        state.last_timestamp = signal.timestamp;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DebounceFilter {
        DebounceFilter::with_default_window(IgnoreList::default())
    }

    fn read(entity: &str, secs: u64) -> ActivitySignal {
        ActivitySignal::new(entity, false, Timestamp::from_secs(secs))
    }

    fn write(entity: &str, secs: u64) -> ActivitySignal {
        ActivitySignal::new(entity, true, Timestamp::from_secs(secs))
    }

    #[test]
    fn same_entity_within_window_is_rejected() {
        let filter = filter();
        assert!(filter.accept(&read("/a.py", 0)));
        assert!(!filter.accept(&read("/a.py", 5)));
        assert!(!filter.accept(&read("/a.py", 119)));
    }

    #[test]
    fn same_entity_after_window_is_accepted() {
        let filter = filter();
        assert!(filter.accept(&read("/a.py", 0)));
        assert!(filter.accept(&read("/a.py", 120)));
        assert!(!filter.accept(&read("/a.py", 200)));
        assert!(filter.accept(&read("/a.py", 240)));
    }

    #[test]
    fn different_entity_bypasses_window() {
        let filter = filter();
        assert!(filter.accept(&read("/a.py", 0)));
        assert!(filter.accept(&read("/b.py", 1)));
        assert!(filter.accept(&read("/a.py", 2)));
    }

    #[test]
    fn writes_are_never_debounced() {
        let filter = filter();
        for secs in 0..10 {
            assert!(filter.accept(&write("/a.py", secs)));
        }
    }

    #[test]
    fn write_resets_window_for_following_reads() {
        let filter = filter();
        assert!(filter.accept(&read("/a.py", 0)));
        assert!(filter.accept(&write("/a.py", 100)));
        // Window now counts from the write at t=100.
        assert!(!filter.accept(&read("/a.py", 150)));
        assert!(filter.accept(&read("/a.py", 220)));
    }

    #[test]
    fn rejected_signal_does_not_extend_window() {
        let filter = filter();
        assert!(filter.accept(&read("/a.py", 0)));
        assert!(!filter.accept(&read("/a.py", 100)));
        assert!(filter.accept(&read("/a.py", 121)));
    }

    #[test]
    fn ignored_entities_never_pass() {
        let filter = filter();
        for entity in [
            "mock://virtual/file.py",
            "atlassian-ide-plugin.xml",
            "/home/user/project/.idea/workspace.xml",
            "",
        ] {
            assert!(!filter.accept(&read(entity, 0)), "read {entity:?}");
            assert!(!filter.accept(&write(entity, 1000)), "write {entity:?}");
        }
    }

    #[test]
    fn ignored_signal_leaves_state_untouched() {
        let filter = filter();
        assert!(filter.accept(&read("/a.py", 0)));
        assert!(!filter.accept(&write("mock://x", 1)));
        assert!(!filter.accept(&read("/a.py", 2)));
    }

    #[test]
    fn extra_patterns_extend_builtin_rules() {
        let ignore = IgnoreList::new(vec!["/node_modules/".to_string(), "  ".to_string()]);
        assert!(ignore.is_ignored("/p/node_modules/lib/index.js"));
        assert!(ignore.is_ignored("mock://anything"));
        assert!(!ignore.is_ignored("/p/src/index.js"));
    }

    #[test]
    fn nested_idea_directory_names_are_not_ignored() {
        let ignore = IgnoreList::default();
        assert!(!ignore.is_ignored("/home/user/project/.idea/misc.xml"));
        assert!(!ignore.is_ignored("/home/user/docs/atlassian-ide-plugin.xml"));
    }

    #[test]
    fn custom_window_is_respected() {
        let filter = DebounceFilter::new(Duration::from_secs(2), IgnoreList::default());
        assert_eq!(filter.window(), Duration::from_secs(2));
        assert!(filter.accept(&read("/a.py", 0)));
        assert!(!filter.accept(&read("/a.py", 1)));
        assert!(filter.accept(&read("/a.py", 2)));
    }

    #[test]
    fn concurrent_producers_share_state() {
        use std::sync::Arc;
        use std::thread;

        let filter = Arc::new(filter());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let filter = Arc::clone(&filter);
                thread::spawn(move || filter.accept(&read("/shared.rs", 10)))
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|accepted| *accepted)
            .count();

        assert_eq!(accepted, 1);
    }
}
