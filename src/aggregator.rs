// ============================================================================
// WINDOWED AGGREGATOR
// ============================================================================
// Per-key running statistics over the values folded since the last reset,
// plus the last raw observation of every diffed counter. `reset` moves the
// live set into an immutable `ClosedWindow` that readers load lock-free.
//
// Locking: the live accumulators and the raw cache share one RwLock so a
// batch fold and a rotation never interleave within a key. The closed
// window lives in an ArcSwap and is only replaced while that lock is held.
//
// A raw sample is pruned at the reset closing the `STALE_KEY_WINDOWS`th
// consecutive window without an observation of its counter.
// ============================================================================

use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::registry::{Aggregation, MetricDefinition};
use crate::types::{MetricKey, Timestamp};
use crate::STALE_KEY_WINDOWS;

// ----------------------------------------------------------------------------
// Accumulator
// ----------------------------------------------------------------------------

/// Running statistic for one key within one window.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    sum: f64,
    mean: f64,
    min: f64,
    max: f64,
    /// Last raw value passed in, before any diffing
    value: f64,
    last_update: Timestamp,
    aggregation: Option<Aggregation>,
}

impl Accumulator {
    fn new(aggregation: Option<Aggregation>) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            mean: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            value: 0.0,
            last_update: Timestamp::EPOCH,
            aggregation,
        }
    }

    #[inline]
    fn fold(&mut self, ts: Timestamp, raw: f64, folded: f64) {
        self.count += 1;
        self.sum += folded;
        self.mean += (folded - self.mean) / self.count as f64;
        self.min = self.min.min(folded);
        self.max = self.max.max(folded);
        self.value = raw;
        self.last_update = ts;
    }

    fn stats(&self, name: &MetricKey) -> MetricStats {
        MetricStats {
            name: name.clone(),
            count: self.count,
            sum: self.sum,
            mean: self.mean,
            min: self.min,
            max: self.max,
            value: self.value,
            aggregation: self.aggregation,
            last_update: self.last_update,
        }
    }
}

/// Last raw observation of a diffed counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub value: f64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy)]
struct RawEntry {
    sample: RawSample,
    /// Sequence number of the window the sample was taken in
    window: u64,
}

// ----------------------------------------------------------------------------
// Public Readings
// ----------------------------------------------------------------------------

/// Statistics of one key over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub name: MetricKey,
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Last raw value folded (not the delta, for diffed counters)
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    pub last_update: Timestamp,
}

impl MetricStats {
    /// The figure this key's aggregation reports: the sum for `sum` keys,
    /// the mean for `mean` keys, the last raw value otherwise.
    pub fn aggregate(&self) -> f64 {
        match self.aggregation {
            Some(Aggregation::Sum) => self.sum,
            Some(Aggregation::Mean) => self.mean,
            None => self.value,
        }
    }
}

/// Result of a point lookup. Unknown keys are an explicit no-data reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Data(MetricStats),
    NoData { name: MetricKey, err: String },
}

impl Reading {
    fn no_data(name: &str) -> Self {
        Reading::NoData {
            name: MetricKey::from(name),
            err: format!("no metrics object for {name}"),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Reading::Data(_))
    }

    pub fn stats(&self) -> Option<&MetricStats> {
        match self {
            Reading::Data(stats) => Some(stats),
            Reading::NoData { .. } => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Reading::Data(stats) => &stats.name,
            Reading::NoData { name, .. } => name,
        }
    }

    pub fn count(&self) -> u64 {
        self.stats().map_or(0, |s| s.count)
    }

    pub fn sum(&self) -> f64 {
        self.stats().map_or(0.0, |s| s.sum)
    }

    pub fn mean(&self) -> f64 {
        self.stats().map_or(0.0, |s| s.mean)
    }
}

// ----------------------------------------------------------------------------
// Closed Window
// ----------------------------------------------------------------------------

/// Immutable snapshot captured by one `reset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedWindow {
    /// 0 until the first rotation
    pub seq: u64,
    pub opened_at: Timestamp,
    pub rotated_at: Timestamp,
    pub entries: BTreeMap<MetricKey, MetricStats>,
}

impl ClosedWindow {
    fn empty(now: Timestamp) -> Self {
        Self {
            seq: 0,
            opened_at: now,
            rotated_at: now,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetricStats> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Aggregator
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct LiveState {
    accumulators: AHashMap<MetricKey, Accumulator>,
    /// Survives rotation so the first delta of a window is against the
    /// previous window's last observation.
    raw: AHashMap<MetricKey, RawEntry>,
    /// Sequence number the live window gets when it is closed
    seq: u64,
    /// Previous rotation, or construction for the first window
    opened_at: Timestamp,
}

impl LiveState {
    fn new(now: Timestamp) -> Self {
        Self {
            accumulators: AHashMap::new(),
            raw: AHashMap::new(),
            seq: 1,
            opened_at: now,
        }
    }

    fn apply(&mut self, ts: Timestamp, key: &str, value: f64, calc_diff: bool, aggregation: Option<Aggregation>) -> bool {
        if !value.is_finite() {
            trace!(key, value, "Dropping non-numeric value");
            return false;
        }

        let folded = if calc_diff {
            let entry = RawEntry {
                sample: RawSample { value, timestamp: ts },
                window: self.seq,
            };
            match self.raw.get_mut(key) {
                Some(prev) => value - mem::replace(prev, entry).sample.value,
                None => {
                    self.raw.insert(MetricKey::from(key), entry);
                    0.0
                }
            }
        } else {
            value
        };

        let acc = self
            .accumulators
            .entry(MetricKey::from(key))
            .or_insert_with(|| Accumulator::new(aggregation));
        if aggregation.is_some() {
            acc.aggregation = aggregation;
        }
        acc.fold(ts, value, folded);
        true
    }
}

/// Process-wide accumulator set, raw-sample cache and closed window.
#[derive(Debug)]
pub struct Aggregator {
    live: RwLock<LiveState>,
    closed: ArcSwap<ClosedWindow>,
    updates: AtomicU64,
    dropped: AtomicU64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        let now = Timestamp::now();
        Self {
            live: RwLock::new(LiveState::new(now)),
            closed: ArcSwap::from_pointee(ClosedWindow::empty(now)),
            updates: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Fold one observation. Non-finite values are ignored. With `calc_diff`
    /// the first observation of a key folds 0 and later ones fold the change
    /// since the previous observation.
    pub fn update(&self, ts: Timestamp, key: &str, value: f64, calc_diff: bool) {
        let applied = self.live.write().apply(ts, key, value, calc_diff, None);
        self.count(applied);
    }

    /// `update` driven by a resolved definition, which also tags the
    /// accumulator with its aggregation kind.
    pub fn fold(&self, ts: Timestamp, key: &str, value: f64, definition: &MetricDefinition) {
        let applied = self
            .live
            .write()
            .apply(ts, key, value, definition.calc_diff, Some(definition.aggregation));
        self.count(applied);
    }

    /// Fold a whole cycle under one lock acquisition. Returns the number of
    /// values folded.
    pub fn fold_batch<'a, I>(&self, ts: Timestamp, items: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, f64, &'a MetricDefinition)>,
    {
        let mut folded = 0;
        let mut dropped = 0;
        {
            let mut live = self.live.write();
            for (key, value, definition) in items {
                if live.apply(ts, key, value, definition.calc_diff, Some(definition.aggregation)) {
                    folded += 1;
                } else {
                    dropped += 1;
                }
            }
        }
        self.updates.fetch_add(folded as u64, AtomicOrdering::Relaxed);
        self.dropped.fetch_add(dropped, AtomicOrdering::Relaxed);
        folded
    }

    #[inline]
    fn count(&self, applied: bool) {
        if applied {
            self.updates.fetch_add(1, AtomicOrdering::Relaxed);
        } else {
            self.dropped.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Statistics of the live (still open) window.
    pub fn get(&self, key: &str) -> Reading {
        let live = self.live.read();
        match live.accumulators.get_key_value(key) {
            Some((name, acc)) => Reading::Data(acc.stats(name)),
            None => Reading::no_data(key),
        }
    }

    /// Close the live window: it becomes the queryable closed window and a
    /// fresh, empty window starts. Accumulators are not carried forward; raw
    /// samples are, unless their counter went unseen for `STALE_KEY_WINDOWS`
    /// consecutive windows.
    pub fn reset(&self) -> Arc<ClosedWindow> {
        let now = Timestamp::now();
        let mut live = self.live.write();

        let accumulators = mem::take(&mut live.accumulators);
        let opened_at = mem::replace(&mut live.opened_at, now);
        let seq = live.seq;
        live.seq += 1;

        let raw_before = live.raw.len();
        live.raw.retain(|_, entry| entry.window + STALE_KEY_WINDOWS > seq);
        let pruned = raw_before - live.raw.len();

        let window = Arc::new(ClosedWindow {
            seq,
            opened_at,
            rotated_at: now,
            entries: accumulators
                .iter()
                .map(|(name, acc)| (name.clone(), acc.stats(name)))
                .collect(),
        });
        self.closed.store(Arc::clone(&window));
        drop(live);

        debug!(
            seq = window.seq,
            keys = window.len(),
            pruned_counters = pruned,
            "Window rotated"
        );
        window
    }

    /// The window captured by the most recent `reset`.
    pub fn closed_window(&self) -> Arc<ClosedWindow> {
        self.closed.load_full()
    }

    /// Last raw observation of a diffed counter.
    pub fn raw_sample(&self, key: &str) -> Option<RawSample> {
        self.live.read().raw.get(key).map(|entry| entry.sample)
    }

    /// Number of diffed counters with a cached raw sample.
    pub fn tracked_counters(&self) -> usize {
        self.live.read().raw.len()
    }

    /// Keys with at least one value in the live window.
    pub fn live_keys(&self) -> usize {
        self.live.read().accumulators.len()
    }

    pub fn total_updates(&self) -> u64 {
        self.updates.load(AtomicOrdering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.load(AtomicOrdering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DefinitionSpec;
    use proptest::prelude::*;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn test_unknown_key_is_explicit_no_data() {
        let agg = Aggregator::new();
        let reading = agg.get("cpu.0.percentage");
        assert!(!reading.is_data());
        assert_eq!(reading.count(), 0);
        assert_eq!(reading.sum(), 0.0);
        assert_eq!(reading.mean(), 0.0);
        assert_eq!(reading.name(), "cpu.0.percentage");
    }

    #[test]
    fn test_mean_and_last_value() {
        let agg = Aggregator::new();
        for (i, v) in [10.0, 20.0, 60.0].into_iter().enumerate() {
            agg.update(ts(i as i64), "memory.memFree", v, false);
        }
        let stats = agg.get("memory.memFree").stats().cloned().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.sum, 90.0);
        assert_eq!(stats.mean, 30.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 60.0);
        assert_eq!(stats.value, 60.0);
        assert_eq!(stats.last_update, ts(2));
    }

    #[test]
    fn test_diff_folds_zero_then_deltas() {
        let agg = Aggregator::new();
        agg.update(ts(0), "net.eth0.rxBytes", 1000.0, true);
        agg.update(ts(1), "net.eth0.rxBytes", 1500.0, true);
        agg.update(ts(2), "net.eth0.rxBytes", 1700.0, true);

        let stats = agg.get("net.eth0.rxBytes").stats().cloned().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.sum, 700.0);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.value, 1700.0);
        assert_eq!(
            agg.raw_sample("net.eth0.rxBytes"),
            Some(RawSample {
                value: 1700.0,
                timestamp: ts(2)
            })
        );
    }

    #[test]
    fn test_negative_deltas_fold_as_is() {
        let agg = Aggregator::new();
        agg.update(ts(0), "disk.sda.currentIoCount", 5.0, true);
        agg.update(ts(1), "disk.sda.currentIoCount", 2.0, true);
        assert_eq!(agg.get("disk.sda.currentIoCount").sum(), -3.0);
    }

    #[test]
    fn test_non_finite_values_are_dropped() {
        let agg = Aggregator::new();
        agg.update(ts(0), "memory.cached", f64::NAN, false);
        agg.update(ts(0), "memory.cached", f64::INFINITY, false);
        assert!(!agg.get("memory.cached").is_data());
        assert_eq!(agg.total_dropped(), 2);

        agg.update(ts(1), "net.eth0.rxBytes", 10.0, true);
        agg.update(ts(2), "net.eth0.rxBytes", f64::NAN, true);
        agg.update(ts(3), "net.eth0.rxBytes", 15.0, true);
        assert_eq!(agg.get("net.eth0.rxBytes").sum(), 5.0);
    }

    #[test]
    fn test_reset_moves_live_into_closed_window() {
        let agg = Aggregator::new();
        assert_eq!(agg.closed_window().seq, 0);
        assert!(agg.closed_window().is_empty());

        agg.update(ts(0), "memory.memFree", 4.0, false);
        let window = agg.reset();

        assert_eq!(window.seq, 1);
        assert_eq!(window.get("memory.memFree").unwrap().count, 1);
        assert_eq!(agg.closed_window().seq, 1);
        assert!(!agg.get("memory.memFree").is_data());
        assert_eq!(agg.live_keys(), 0);

        assert_eq!(agg.reset().seq, 2);
        assert!(agg.closed_window().is_empty());
    }

    #[test]
    fn test_raw_cache_survives_reset() {
        let agg = Aggregator::new();
        agg.update(ts(0), "disk.sda.reads", 100.0, true);
        agg.reset();
        agg.update(ts(1), "disk.sda.reads", 130.0, true);

        let stats = agg.get("disk.sda.reads").stats().cloned().unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.sum, 30.0);
    }

    #[test]
    fn test_vanished_counters_are_pruned() {
        let agg = Aggregator::new();
        for i in 0..10_000 {
            agg.update(ts(0), &format!("net.cali{i}.rxBytes"), 1.0, true);
        }
        agg.update(ts(0), "net.eth0.rxBytes", 1.0, true);
        assert_eq!(agg.tracked_counters(), 10_001);

        for secs in 1..=STALE_KEY_WINDOWS as i64 + 1 {
            agg.reset();
            agg.update(ts(secs), "net.eth0.rxBytes", 1.0 + secs as f64, true);
        }
        assert_eq!(agg.tracked_counters(), 1);
        assert!(agg.raw_sample("net.cali0.rxBytes").is_none());

        for _ in 0..5 {
            agg.reset();
        }
        assert_eq!(agg.tracked_counters(), 0);
    }

    #[test]
    fn test_counter_missing_for_one_window_keeps_its_baseline() {
        let agg = Aggregator::new();
        agg.update(ts(0), "disk.sdb.reads", 100.0, true);
        agg.reset();
        agg.reset();
        agg.update(ts(2), "disk.sdb.reads", 160.0, true);
        assert_eq!(agg.get("disk.sdb.reads").sum(), 60.0);
    }

    #[test]
    fn test_window_opens_at_previous_rotation() {
        let agg = Aggregator::new();
        let initial = agg.closed_window();
        assert_eq!(initial.opened_at, initial.rotated_at);

        let first = agg.reset();
        assert_eq!(first.opened_at, initial.rotated_at);

        agg.update(ts(0), "memory.memFree", 1.0, false);
        let second = agg.reset();
        assert_eq!(second.opened_at, first.rotated_at);
        assert!(second.rotated_at >= second.opened_at);

        let empty = agg.reset();
        assert_eq!(empty.opened_at, second.rotated_at);
    }

    #[test]
    fn test_fold_records_aggregation() {
        let agg = Aggregator::new();
        let def = MetricDefinition::compile(&DefinitionSpec::new("net.*.txBytes", Aggregation::Sum, true)).unwrap();
        agg.fold(ts(0), "net.eth0.txBytes", 10.0, &def);
        agg.fold(ts(1), "net.eth0.txBytes", 25.0, &def);

        let stats = agg.get("net.eth0.txBytes").stats().cloned().unwrap();
        assert_eq!(stats.aggregation, Some(Aggregation::Sum));
        assert_eq!(stats.aggregate(), 15.0);
    }

    #[test]
    fn test_fold_batch_counts_folded_values() {
        let agg = Aggregator::new();
        let def = MetricDefinition::compile(&DefinitionSpec::new("cpu.*.idle", Aggregation::Mean, false)).unwrap();
        let folded = agg.fold_batch(ts(0), [("cpu.0.idle", 1.0, &def), ("cpu.1.idle", f64::NAN, &def)]);
        assert_eq!(folded, 1);
        assert_eq!(agg.total_updates(), 1);
        assert_eq!(agg.total_dropped(), 1);
    }

    #[test]
    fn test_no_data_serializes_with_error() {
        let json = serde_json::to_value(Reading::no_data("x.y")).unwrap();
        assert_eq!(json["name"], "x.y");
        assert_eq!(json["err"], "no metrics object for x.y");
    }

    #[test]
    fn test_reset_is_atomic_per_key_under_concurrent_updates() {
        let agg = Arc::new(Aggregator::new());
        let writer = {
            let agg = Arc::clone(&agg);
            std::thread::spawn(move || {
                for i in 0..20_000i64 {
                    // Every value is 7, so any consistent snapshot has mean 7
                    // and sum == 7 * count.
                    agg.update(ts(i), "cpu.0.idle", 7.0, false);
                }
            })
        };

        let mut windows = Vec::new();
        for _ in 0..200 {
            windows.push(agg.reset());
            let live = agg.get("cpu.0.idle");
            if let Some(stats) = live.stats() {
                assert_eq!(stats.sum, 7.0 * stats.count as f64);
            }
        }
        writer.join().unwrap();
        windows.push(agg.reset());

        let mut total = 0;
        let mut last_seq = 0;
        for window in &windows {
            assert!(window.seq > last_seq);
            last_seq = window.seq;
            if let Some(stats) = window.get("cpu.0.idle") {
                assert_eq!(stats.mean, 7.0);
                assert_eq!(stats.sum, 7.0 * stats.count as f64);
                total += stats.count;
            }
        }
        assert_eq!(total, 20_000);
    }

    proptest! {
        #[test]
        fn prop_mean_matches_arithmetic_mean(values in prop::collection::vec(-1e6f64..1e6, 1..200)) {
            let agg = Aggregator::new();
            for v in &values {
                agg.update(ts(0), "memory.memAvailable", *v, false);
            }
            let stats = agg.get("memory.memAvailable").stats().cloned().unwrap();
            let expected = values.iter().sum::<f64>() / values.len() as f64;
            prop_assert_eq!(stats.count, values.len() as u64);
            prop_assert!((stats.mean - expected).abs() <= 1e-6 * (1.0 + expected.abs()));
        }

        #[test]
        fn prop_diff_sums_telescope(values in prop::collection::vec(0u32..1_000_000, 1..100)) {
            let agg = Aggregator::new();
            for (i, v) in values.iter().enumerate() {
                agg.update(ts(i as i64), "net.eth0.txPackets", *v as f64, true);
            }
            let stats = agg.get("net.eth0.txPackets").stats().cloned().unwrap();
            let expected = *values.last().unwrap() as f64 - values[0] as f64;
            prop_assert_eq!(stats.sum, expected);
            prop_assert_eq!(stats.value, *values.last().unwrap() as f64);
        }
    }
}
