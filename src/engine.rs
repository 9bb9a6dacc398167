// ============================================================================
// ENGINE
// ============================================================================
// Owns the sampler, registry, aggregator and query layer for the lifetime of
// the process and drives the two independent cadences: sampling cycles fold
// into the live window, rotations close it for readers.
// ============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::aggregator::{Aggregator, ClosedWindow};
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::query::MetricQuery;
use crate::registry::{MetricDefinition, MetricRegistry};
use crate::sampler::{ProcSource, Sampler, Subsystem, SubsystemHealth};
use crate::types::{MetricKey, Timestamp};
use crate::AGENT_VERSION;

/// What one sampling cycle contributed to the live window.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: Timestamp,
    /// Metrics produced by the parsers
    pub sampled: usize,
    /// Metrics folded into the aggregator
    pub folded: usize,
    /// Metrics with no matching definition
    pub passthrough: usize,
    pub failed: Vec<Subsystem>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub uptime: Duration,
    pub is_running: bool,
    pub cycles: u64,
    pub updates: u64,
    pub dropped: u64,
    pub live_keys: usize,
    pub window_seq: u64,
}

#[derive(Debug)]
pub struct Engine {
    config: Arc<AgentConfig>,
    sampler: Sampler,
    registry: MetricRegistry,
    aggregator: Arc<Aggregator>,
    query: MetricQuery,
    shutdown: Arc<Notify>,
    /// Set by `shutdown`; never cleared, a stopped engine stays stopped
    stop_requested: AtomicBool,
    running: AtomicBool,
    start_time: Timestamp,
}

impl Engine {
    /// Engine sampling from the configured proc root.
    pub fn new(config: AgentConfig) -> AgentResult<Self> {
        let sampler = Sampler::new(&config.sampler);
        Self::assemble(config, sampler)
    }

    /// Engine sampling from an arbitrary source.
    pub fn with_source(config: AgentConfig, source: Arc<dyn ProcSource>) -> AgentResult<Self> {
        let sampler = Sampler::with_source(source, &config.sampler);
        Self::assemble(config, sampler)
    }

    fn assemble(config: AgentConfig, sampler: Sampler) -> AgentResult<Self> {
        let registry = MetricRegistry::with_overrides(&config.metrics)?;
        let aggregator = Arc::new(Aggregator::new());
        let query = MetricQuery::new(Arc::clone(&aggregator));

        Ok(Self {
            config: Arc::new(config),
            sampler,
            registry,
            aggregator,
            query,
            shutdown: Arc::new(Notify::new()),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            start_time: Timestamp::now(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn query(&self) -> &MetricQuery {
        &self.query
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::Acquire)
    }

    pub fn uptime(&self) -> Duration {
        Timestamp::now().duration_since(self.start_time)
    }

    // ------------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------------

    /// Sample once without folding. Seeds the CPU baselines so the first
    /// folded cycle already carries utilisation, and returns how every key
    /// currently produced would be aggregated.
    pub async fn prime(&self) -> BTreeMap<MetricKey, MetricDefinition> {
        let report = self.sampler.sample().await;
        let classified = self.registry.classify(&report.values);
        info!(
            sampled = report.values.len(),
            defined = classified.len(),
            failed = report.failures.len(),
            "Baselines primed"
        );
        classified
    }

    /// Sample once and fold every resolved metric into the live window.
    pub async fn run_cycle(&self) -> CycleReport {
        let report = self.sampler.sample().await;

        let mut passthrough = 0;
        let resolved: Vec<(&str, f64, &MetricDefinition)> = report
            .values
            .iter()
            .filter_map(|(key, value)| match self.registry.resolve(key) {
                Some(definition) => Some((key.as_str(), *value, definition)),
                None => {
                    passthrough += 1;
                    None
                }
            })
            .collect();
        let folded = self.aggregator.fold_batch(report.timestamp, resolved);

        trace!(
            sampled = report.values.len(),
            folded,
            passthrough,
            "Cycle folded"
        );

        CycleReport {
            timestamp: report.timestamp,
            sampled: report.values.len(),
            folded,
            passthrough,
            failed: report.failed_subsystems(),
            elapsed: report.elapsed,
        }
    }

    /// Close the live window and forget keys no longer being sampled.
    pub fn rotate(&self) -> Arc<ClosedWindow> {
        let window = self.aggregator.reset();
        let expired = self.registry.expire_unused();
        if expired > 0 {
            debug!(expired, "Expired unused key resolutions");
        }
        window
    }

    // ------------------------------------------------------------------------
    // Main Loop
    // ------------------------------------------------------------------------

    /// Request the main loop to stop after the current cycle.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.stop_requested.store(true, AtomicOrdering::Release);
        self.running.store(false, AtomicOrdering::Release);
        self.shutdown.notify_one();
    }

    /// Drive sampling and rotation until `shutdown` or SIGINT/SIGTERM.
    pub async fn run(&self) -> AgentResult<()> {
        info!(
            version = AGENT_VERSION,
            instance = %self.config.agent.instance_name,
            proc_root = %self.config.sampler.proc_root.display(),
            sample_interval = ?self.config.agent.sample_interval,
            rotation_interval = ?self.config.agent.rotation_interval,
            definitions = self.registry.len(),
            "Starting agent"
        );

        if self.stop_requested.load(AtomicOrdering::Acquire) {
            info!("Shutdown already requested, not starting");
            return Ok(());
        }
        self.running.store(true, AtomicOrdering::Release);
        let signals = spawn_signal_listener(Arc::clone(&self.shutdown));

        self.drive().await;

        signals.abort();
        self.running.store(false, AtomicOrdering::Release);
        info!(
            window_seq = self.aggregator.closed_window().seq,
            uptime_secs = self.uptime().as_secs(),
            cycles = self.sampler.cycles(),
            "Agent stopped"
        );
        Ok(())
    }

    async fn drive(&self) {
        self.prime().await;

        let mut sample_tick = interval(self.config.agent.sample_interval);
        sample_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rotate_tick = interval(self.config.agent.rotation_interval);
        rotate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Both intervals fire immediately; the first rotation would close an
        // empty window and the first sample duplicates `prime`.
        sample_tick.tick().await;
        rotate_tick.tick().await;

        while self.is_running() && !self.stop_requested.load(AtomicOrdering::Acquire) {
            tokio::select! {
                _ = sample_tick.tick() => {
                    let cycle = self.run_cycle().await;
                    if !cycle.failed.is_empty() {
                        debug!(failed = ?cycle.failed, folded = cycle.folded, "Partial cycle");
                    }
                }
                _ = rotate_tick.tick() => {
                    let window = self.rotate();
                    info!(seq = window.seq, keys = window.len(), "Window closed");
                }
                _ = self.shutdown.notified() => {
                    info!("Shutdown notification received");
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn health(&self) -> Vec<(Subsystem, SubsystemHealth)> {
        self.sampler.health_report()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            uptime: self.uptime(),
            is_running: self.is_running(),
            cycles: self.sampler.cycles(),
            updates: self.aggregator.total_updates(),
            dropped: self.aggregator.total_dropped(),
            live_keys: self.aggregator.live_keys(),
            window_seq: self.aggregator.closed_window().seq,
        }
    }
}

fn spawn_signal_listener(shutdown: Arc<Notify>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        }
        shutdown.notify_one();
    })
}
