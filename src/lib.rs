//! # procfs-agent - Host-Local Sampling & Aggregation Engine
//!
//! Periodically reads kernel counters from procfs, flattens them into a
//! dot-delimited metric namespace and folds them into windowed running
//! statistics that can be queried by exact key or wildcard pattern.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            PROCFS AGENT                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  PARSERS → SAMPLER → REGISTRY (resolve) → AGGREGATOR → CLOSED WINDOW │
//! │                                                 ↑            ↓       │
//! │                                       update / get      QUERY        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`parsers`]: pure text parsers for `cpuinfo`/`stat`, `meminfo`,
//!   `net/dev` and `diskstats`
//! - [`sampler`]: runs the four parsers concurrently against a proc root
//! - [`registry`]: wildcard-pattern table deciding `sum`/`mean` and diffing
//! - [`aggregator`]: running accumulators with atomic window rotation
//! - [`query`]: exact and wildcard lookups over the closed window
//! - [`engine`]: wires everything together and drives both cadences

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

// ============================================================================
// MODULES
// ============================================================================

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod parsers;
pub mod pattern;
pub mod query;
pub mod registry;
pub mod sampler;
pub mod types;

pub use aggregator::{Aggregator, ClosedWindow, MetricStats, Reading};
pub use config::AgentConfig;
pub use engine::Engine;
pub use error::{AgentError, AgentResult, ConfigError, PatternError, SamplerError};
pub use pattern::WildcardPattern;
pub use query::MetricQuery;
pub use registry::{Aggregation, MetricDefinition, MetricRegistry};
pub use sampler::{SampleReport, Sampler, Subsystem};
pub use types::{MetricKey, MetricMap, Timestamp};

// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Agent version - follows semantic versioning
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AGENT_NAME: &str = "procfs-agent";
pub const AGENT_FULL_NAME: &str = "procfs sampling & aggregation agent";

// ----------------------------------------------------------------------------
// Timing & Intervals
// ----------------------------------------------------------------------------

/// Default sampling interval (milliseconds)
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 5_000;

/// Minimum allowed sampling interval (milliseconds)
pub const MIN_SAMPLE_INTERVAL_MS: u64 = 100;

/// Default window rotation interval (milliseconds)
pub const DEFAULT_ROTATION_INTERVAL_MS: u64 = 60_000;

/// Default per-subsystem parser deadline (milliseconds)
pub const DEFAULT_PARSER_TIMEOUT_MS: u64 = 2_000;

/// Sampling cycles slower than this are logged at warn level (milliseconds)
pub const SLOW_CYCLE_THRESHOLD_MS: u64 = 500;

// ----------------------------------------------------------------------------
// Procfs Layout
// ----------------------------------------------------------------------------

/// Default mount point of procfs
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Upper bound on tracked CPU baselines
pub const MAX_TRACKED_CORES: usize = 4096;

/// Consecutive failures after which a subsystem is reported as failed
pub const SUBSYSTEM_FAILURE_THRESHOLD: u32 = 3;

/// Consecutive windows without an observation after which a diffed
/// counter's raw sample or a resolved key is forgotten
pub const STALE_KEY_WINDOWS: u64 = 2;
