//! Read-only lookups over the most recently closed window.
//!
//! Queries never touch the live accumulators: they load the closed window
//! once and answer from that snapshot, so a rotation in the middle of a
//! pattern query cannot mix two windows.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregator::{Aggregator, MetricStats};
use crate::error::AgentResult;
use crate::pattern::WildcardPattern;
use crate::types::{MetricKey, Timestamp};

/// Summary of the window queries are answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub seq: u64,
    pub opened_at: Timestamp,
    pub rotated_at: Timestamp,
    pub keys: usize,
}

#[derive(Debug, Clone)]
pub struct MetricQuery {
    aggregator: Arc<Aggregator>,
}

impl MetricQuery {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }

    pub fn get_by_key(&self, key: &str) -> Option<MetricStats> {
        self.aggregator.closed_window().get(key).cloned()
    }

    /// Every closed-window entry whose key matches `pattern`.
    pub fn get_by_pattern(&self, pattern: &str) -> AgentResult<BTreeMap<MetricKey, MetricStats>> {
        let matcher = WildcardPattern::new(pattern)?;
        Ok(self.matching(&matcher))
    }

    pub fn matching(&self, matcher: &WildcardPattern) -> BTreeMap<MetricKey, MetricStats> {
        let window = self.aggregator.closed_window();
        if matcher.is_literal() {
            return window
                .get(matcher.as_str())
                .map(|stats| (stats.name.clone(), stats.clone()))
                .into_iter()
                .collect();
        }
        window
            .entries
            .iter()
            .filter(|(key, _)| matcher.matches(key))
            .map(|(key, stats)| (key.clone(), stats.clone()))
            .collect()
    }

    /// The whole closed window.
    pub fn all(&self) -> BTreeMap<MetricKey, MetricStats> {
        self.aggregator.closed_window().entries.clone()
    }

    pub fn window_info(&self) -> WindowInfo {
        let window = self.aggregator.closed_window();
        WindowInfo {
            seq: window.seq,
            opened_at: window.opened_at,
            rotated_at: window.rotated_at,
            keys: window.len(),
        }
    }
}
