// ============================================================================
// METRIC REGISTRY
// ============================================================================
// Wildcard-pattern table deciding how each metric key is combined across a
// window. Patterns are compiled once at load time; resolution walks the
// definitions in registration order and the LAST match wins, so entries
// registered later override earlier ones for overlapping keys.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::PatternError;
use crate::pattern::WildcardPattern;
use crate::types::{MetricKey, MetricMap};
use crate::STALE_KEY_WINDOWS;

// ----------------------------------------------------------------------------
// Definitions
// ----------------------------------------------------------------------------

/// How values folded into one window are summarised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Total of all folded values (rates of diffed counters)
    Sum,
    /// Arithmetic mean of all folded values (point-in-time gauges)
    Mean,
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Sum => write!(f, "sum"),
            Aggregation::Mean => write!(f, "mean"),
        }
    }
}

/// Uncompiled definition, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionSpec {
    pub pattern: String,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub calc_diff: bool,
}

impl DefinitionSpec {
    pub fn new(pattern: impl Into<String>, aggregation: Aggregation, calc_diff: bool) -> Self {
        Self {
            pattern: pattern.into(),
            aggregation,
            calc_diff,
        }
    }
}

/// A compiled, immutable metric definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDefinition {
    pub pattern: WildcardPattern,
    pub aggregation: Aggregation,
    pub calc_diff: bool,
}

impl MetricDefinition {
    pub fn compile(spec: &DefinitionSpec) -> Result<Self, PatternError> {
        Ok(Self {
            pattern: WildcardPattern::new(&spec.pattern)?,
            aggregation: spec.aggregation,
            calc_diff: spec.calc_diff,
        })
    }

    pub fn spec(&self) -> DefinitionSpec {
        DefinitionSpec::new(self.pattern.as_str(), self.aggregation, self.calc_diff)
    }
}

/// The built-in definition table, in registration order.
pub fn default_definitions() -> Vec<DefinitionSpec> {
    use Aggregation::{Mean, Sum};

    let mut specs = Vec::with_capacity(28);
    for field in ["rxBytes", "rxPackets", "rxErrors", "txBytes", "txPackets", "txErrors"] {
        specs.push(DefinitionSpec::new(format!("net.*.{field}"), Sum, true));
    }
    for field in [
        "memTotal",
        "memFree",
        "memAvailable",
        "buffers",
        "cached",
        "swapTotal",
        "swapFree",
    ] {
        specs.push(DefinitionSpec::new(format!("memory.{field}"), Mean, false));
    }
    for field in [
        "MHz",
        "percentage",
        "user",
        "nice",
        "system",
        "idle",
        "iowait",
        "irq",
        "softirq",
        "steal",
    ] {
        specs.push(DefinitionSpec::new(format!("cpu.*.{field}"), Mean, false));
    }
    for field in ["reads", "writes", "currentIoCount", "readTime", "writeTime"] {
        specs.push(DefinitionSpec::new(format!("disk.*.{field}"), Sum, true));
    }
    specs
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct CachedResolution {
    /// Index of the winning definition (None = passthrough)
    index: Option<usize>,
    /// Epoch of the most recent lookup
    last_seen: AtomicU64,
}

/// Registration-ordered definition table with memoised resolution. The memo
/// is swept by `expire_unused`, once per window.
#[derive(Debug)]
pub struct MetricRegistry {
    definitions: Vec<MetricDefinition>,
    resolved: RwLock<AHashMap<MetricKey, CachedResolution>>,
    epoch: AtomicU64,
}

impl MetricRegistry {
    /// Compile `specs` in the given order.
    pub fn new(specs: &[DefinitionSpec]) -> Result<Self, PatternError> {
        let definitions = specs
            .iter()
            .map(MetricDefinition::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            definitions,
            resolved: RwLock::new(AHashMap::new()),
            epoch: AtomicU64::new(0),
        })
    }

    /// Built-in table followed by `extra`; extras override the defaults.
    pub fn with_overrides(extra: &[DefinitionSpec]) -> Result<Self, PatternError> {
        let mut specs = default_definitions();
        specs.extend_from_slice(extra);
        Self::new(&specs)
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// The definition registered last among those whose pattern matches `key`.
    pub fn resolve(&self, key: &str) -> Option<&MetricDefinition> {
        let epoch = self.epoch.load(AtomicOrdering::Relaxed);
        if let Some(hit) = self.resolved.read().get(key) {
            hit.last_seen.store(epoch, AtomicOrdering::Relaxed);
            return hit.index.map(|idx| &self.definitions[idx]);
        }

        let index = self.scan(key);
        self.resolved.write().insert(
            MetricKey::from(key),
            CachedResolution {
                index,
                last_seen: AtomicU64::new(epoch),
            },
        );
        index.map(|idx| &self.definitions[idx])
    }

    fn scan(&self, key: &str) -> Option<usize> {
        self.definitions
            .iter()
            .enumerate()
            .filter(|(_, def)| def.pattern.matches(key))
            .map(|(idx, _)| idx)
            .last()
    }

    /// Resolve every key of a snapshot, dropping passthrough keys.
    pub fn classify(&self, snapshot: &MetricMap) -> BTreeMap<MetricKey, MetricDefinition> {
        snapshot
            .keys()
            .filter_map(|key| self.resolve(key).map(|def| (key.clone(), def.clone())))
            .collect()
    }

    /// Number of distinct keys currently memoised.
    pub fn cached_keys(&self) -> usize {
        self.resolved.read().len()
    }

    /// End the current epoch and forget keys not looked up during the last
    /// `STALE_KEY_WINDOWS` epochs. Returns the number of keys dropped.
    pub fn expire_unused(&self) -> usize {
        let epoch = self.epoch.fetch_add(1, AtomicOrdering::Relaxed);
        let mut resolved = self.resolved.write();
        let before = resolved.len();
        resolved.retain(|_, hit| hit.last_seen.load(AtomicOrdering::Relaxed) + STALE_KEY_WINDOWS > epoch);
        before - resolved.len()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        // The built-in patterns are static and always valid.
        Self::new(&default_definitions()).unwrap_or_else(|_| Self {
            definitions: Vec::new(),
            resolved: RwLock::new(AHashMap::new()),
            epoch: AtomicU64::new(0),
        })
    }
}
