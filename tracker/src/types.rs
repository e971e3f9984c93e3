//! Heartbeat types for editor activity tracking.
//!
//! This module defines the records that flow through the tracker: the raw
//! [`ActivitySignal`] an editor adapter reports, and the immutable
//! [`Heartbeat`] that is queued and eventually delivered to the collector.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use thiserror::Error;

/// Number of timestamp units per second (four fractional digits).
const UNITS_PER_SEC: u64 = 10_000;

/// Microseconds per timestamp unit.
const MICROS_PER_UNIT: i64 = 100;

/// Errors raised when a heartbeat would violate its invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatError {
    /// The entity identifier is empty.
    #[error("heartbeat entity must not be empty")]
    EmptyEntity,
}

/// Seconds since the Unix epoch with exactly four fractional digits.
///
/// Stored as an integer count of ten-thousandths of a second so that the
/// wire representation never picks up floating point noise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch.
    pub const ZERO: Self = Self(0);

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Converts a UTC datetime, rounding half-up to four fractional digits.
    ///
    /// Instants before the epoch clamp to [`Timestamp::ZERO`].
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use heartbeat_tracker::types::Timestamp;
    ///
    /// let dt = Utc.timestamp_opt(1_700_000_000, 123_450_000).unwrap();
    /// assert_eq!(Timestamp::from_datetime(dt).to_string(), "1700000000.1235");
    /// ```
    #[must_use]
    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        let micros = datetime.timestamp_micros().max(0);
        let units = (micros + MICROS_PER_UNIT / 2) / MICROS_PER_UNIT;
        Self(units as u64)
    }

    /// Creates a timestamp from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(UNITS_PER_SEC))
    }

    /// Creates a timestamp from ten-thousandths of a second.
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Returns the raw count of ten-thousandths of a second.
    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future.
    #[must_use]
    pub fn elapsed_since(self, earlier: Timestamp) -> Duration {
        let units = self.0.saturating_sub(earlier.0);
        Duration::from_micros(units.saturating_mul(MICROS_PER_UNIT as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:04}",
            self.0 / UNITS_PER_SEC,
            self.0 % UNITS_PER_SEC
        )
    }
}

/// Serializes as a bare JSON number with exactly four fractional digits
/// (`1700000000.1234`), never through `f64`.
impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawValue::from_string(self.to_string())
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

/// The kind of editor interaction that produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A document was saved to disk.
    #[serde(alias = "saved", alias = "save")]
    DocumentSaved,
    /// A document's contents changed.
    #[serde(alias = "changed", alias = "edit")]
    DocumentChanged,
    /// The mouse was pressed inside an editor.
    #[serde(alias = "clicked", alias = "click")]
    DocumentClicked,
    /// The visible area of an editor changed (scrolling, resizing).
    #[serde(alias = "scrolled", alias = "scroll")]
    VisibleAreaChanged,
}

impl ActivityKind {
    /// Returns `true` for interactions that write the resource.
    ///
    /// Only saves count as writes; writes bypass debouncing.
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::DocumentSaved)
    }
}

/// A raw activity signal reported by an editor adapter.
///
/// Signals are candidates: the debounce filter decides whether one becomes a
/// [`Heartbeat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySignal {
    /// The touched resource, usually a file path.
    pub entity: String,

    /// Project the resource belongs to, if known.
    pub project: Option<String>,

    /// Language tag supplied by the adapter. Derived from the file
    /// extension when `None`.
    pub language: Option<String>,

    /// Whether the interaction wrote the resource.
    pub is_write: bool,

    /// When the interaction happened.
    pub timestamp: Timestamp,
}

impl ActivitySignal {
    /// Creates a signal with no project or language.
    #[must_use]
    pub fn new(entity: impl Into<String>, is_write: bool, timestamp: Timestamp) -> Self {
        Self {
            entity: entity.into(),
            project: None,
            language: None,
            is_write,
            timestamp,
        }
    }

    /// Creates a signal stamped with the current time.
    #[must_use]
    pub fn now(entity: impl Into<String>, is_write: bool) -> Self {
        Self::new(entity, is_write, Timestamp::now())
    }

    /// Sets the project name. Blank names are treated as absent.
    #[must_use]
    pub fn with_project(mut self, project: Option<&str>) -> Self {
        self.project = non_blank(project);
        self
    }

    /// Sets an explicit language tag. Blank tags are treated as absent.
    #[must_use]
    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = non_blank(language);
        self
    }
}

/// An accepted activity record awaiting delivery to the collector.
///
/// Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heartbeat {
    /// The touched resource identifier. Never empty.
    pub entity: String,

    /// When the activity happened.
    pub timestamp: Timestamp,

    /// Whether the activity wrote the resource.
    pub is_write: bool,

    /// Project name, omitted from the wire format when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Language tag, omitted from the wire format when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Heartbeat {
    /// Builds a heartbeat from an accepted signal.
    ///
    /// When the signal carries no language tag, one is derived from the
    /// entity's file extension.
    ///
    /// # Errors
    ///
    /// Returns [`HeartbeatError::EmptyEntity`] if the signal has no entity.
    ///
    /// # Examples
    ///
    /// ```
    /// use heartbeat_tracker::types::{ActivitySignal, Heartbeat, Timestamp};
    ///
    /// let signal = ActivitySignal::new("/src/main.rs", true, Timestamp::from_secs(10))
    ///     .with_project(Some("demo"));
    /// let heartbeat = Heartbeat::from_signal(signal).unwrap();
    ///
    /// assert_eq!(heartbeat.language.as_deref(), Some("rs"));
    /// assert_eq!(heartbeat.project.as_deref(), Some("demo"));
    /// ```
    pub fn from_signal(signal: ActivitySignal) -> Result<Self, HeartbeatError> {
        let language = signal
            .language
            .or_else(|| language_for(&signal.entity));

        let heartbeat = Self {
            entity: signal.entity,
            timestamp: signal.timestamp,
            is_write: signal.is_write,
            project: signal.project,
            language,
        };
        heartbeat.validate()?;
        Ok(heartbeat)
    }

    /// Checks the heartbeat invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HeartbeatError::EmptyEntity`] if the entity is empty.
    pub fn validate(&self) -> Result<(), HeartbeatError> {
        if self.entity.is_empty() {
            return Err(HeartbeatError::EmptyEntity);
        }
        Ok(())
    }
}

/// Derives a language tag from an entity's file extension.
///
/// Returns the lowercased extension, or `None` if the entity has none.
#[must_use]
pub fn language_for(entity: &str) -> Option<String> {
    Path::new(entity)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
