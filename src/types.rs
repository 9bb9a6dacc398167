//! Core value types shared by the parsers, the aggregator and the query layer.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Metric Identity
// ----------------------------------------------------------------------------

/// Dot-delimited metric identifier, e.g. `cpu.0.percentage` or `memory.memFree`.
pub type MetricKey = CompactString;

/// A flat, deterministic mapping of metric key to value for one instant.
pub type MetricMap = BTreeMap<MetricKey, f64>;

/// Build a metric key from its segments. Dots in the instance (VLAN
/// interfaces such as `eth0.100`) become `_` so the instance stays a single
/// segment.
#[inline]
pub fn metric_key(subsystem: &str, instance: Option<&str>, field: &str) -> MetricKey {
    match instance {
        Some(instance) if instance.contains('.') => {
            compact_str::format_compact!("{}.{}.{}", subsystem, instance.replace('.', "_"), field)
        }
        Some(instance) => compact_str::format_compact!("{}.{}.{}", subsystem, instance, field),
        None => compact_str::format_compact!("{}.{}", subsystem, field),
    }
}

// ----------------------------------------------------------------------------
// Timestamp - Nanosecond Precision Time Handling
// ----------------------------------------------------------------------------

/// Wall-clock timestamp in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Zero timestamp (Unix epoch)
    pub const EPOCH: Timestamp = Timestamp(0);

    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Current wall-clock time.
    #[inline]
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    /// Duration elapsed since `earlier`, saturating at zero.
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let nanos = self.0.saturating_sub(earlier.0);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    #[inline]
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_nanos() as i64))
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }
}

impl Default for Timestamp {
    #[inline]
    fn default() -> Self {
        Self::now()
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(st: SystemTime) -> Self {
        let duration = st.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_nanos_opt().unwrap_or(0))
    }
}
