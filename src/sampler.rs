// ============================================================================
// SAMPLER
// ============================================================================
// One sampling cycle reads the four subsystems concurrently, each bounded by
// the parser deadline. A failing subsystem drops only its own contribution
// for the cycle and is counted against that subsystem's health.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SamplerConfig;
use crate::error::{SamplerError, SamplerResult};
use crate::logging::PerfTimer;
use crate::parsers::{self, files, CpuBaselines, DeviceFilter};
use crate::types::{MetricMap, Timestamp};
use crate::{SLOW_CYCLE_THRESHOLD_MS, SUBSYSTEM_FAILURE_THRESHOLD};

// ----------------------------------------------------------------------------
// Subsystems
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Cpu,
    Memory,
    Network,
    Disk,
}

impl Subsystem {
    pub const ALL: [Subsystem; 4] = [Subsystem::Cpu, Subsystem::Memory, Subsystem::Network, Subsystem::Disk];
}

impl Display for Subsystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Cpu => write!(f, "cpu"),
            Subsystem::Memory => write!(f, "memory"),
            Subsystem::Network => write!(f, "network"),
            Subsystem::Disk => write!(f, "disk"),
        }
    }
}

// ----------------------------------------------------------------------------
// Proc Sources
// ----------------------------------------------------------------------------

/// Where kernel pseudo-files are read from.
#[async_trait]
pub trait ProcSource: Send + Sync + fmt::Debug {
    /// Read one file, addressed relative to the proc root.
    async fn read(&self, relative: &str) -> io::Result<String>;

    /// Full path of `relative`, for error reporting.
    fn locate(&self, relative: &str) -> PathBuf;
}

/// Reads from a mounted procfs (or any directory laid out like one).
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ProcSource for ProcFs {
    async fn read(&self, relative: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.root.join(relative)).await
    }

    fn locate(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

// ----------------------------------------------------------------------------
// Subsystem Health
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsystemStatus {
    Healthy,
    /// Failing, but fewer than the threshold of consecutive cycles
    Degraded,
    Failed,
    /// Not sampled yet, or disabled
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    pub status: SubsystemStatus,
    pub last_success: Option<Timestamp>,
    pub last_error: Option<Timestamp>,
    pub last_error_message: Option<String>,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub latency_ms: u64,
}

impl Default for SubsystemHealth {
    fn default() -> Self {
        Self {
            status: SubsystemStatus::Unknown,
            last_success: None,
            last_error: None,
            last_error_message: None,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            latency_ms: 0,
        }
    }
}

impl SubsystemHealth {
    fn record_success(&mut self, latency: Duration) {
        self.status = SubsystemStatus::Healthy;
        self.last_success = Some(Timestamp::now());
        self.consecutive_failures = 0;
        self.total_successes += 1;
        self.latency_ms = latency.as_millis() as u64;
    }

    fn record_error(&mut self, error: &SamplerError) {
        self.last_error = Some(Timestamp::now());
        self.last_error_message = Some(error.to_string());
        self.consecutive_failures += 1;
        self.total_failures += 1;

        self.status = if self.consecutive_failures >= SUBSYSTEM_FAILURE_THRESHOLD {
            SubsystemStatus::Failed
        } else {
            SubsystemStatus::Degraded
        };
    }
}

// ----------------------------------------------------------------------------
// Sample Report
// ----------------------------------------------------------------------------

/// Outcome of one sampling cycle.
#[derive(Debug)]
pub struct SampleReport {
    /// Instant the cycle started; every value is folded at this time
    pub timestamp: Timestamp,
    /// Union of all successful subsystems' metrics
    pub values: MetricMap,
    /// One entry per subsystem whose contribution was dropped
    pub failures: Vec<SamplerError>,
    pub elapsed: Duration,
}

impl SampleReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_subsystems(&self) -> Vec<Subsystem> {
        self.failures.iter().map(SamplerError::subsystem).collect()
    }
}

// ----------------------------------------------------------------------------
// Sampler
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct Sampler {
    source: Arc<dyn ProcSource>,
    enabled: Vec<Subsystem>,
    parser_timeout: Duration,
    net_filter: DeviceFilter,
    disk_filter: DeviceFilter,
    /// Mutated only by the CPU parser
    cpu_baselines: Mutex<CpuBaselines>,
    health: DashMap<Subsystem, SubsystemHealth>,
    cycles: AtomicU64,
}

impl Sampler {
    /// Sampler reading from `config.proc_root`.
    pub fn new(config: &SamplerConfig) -> Self {
        Self::with_source(Arc::new(ProcFs::new(&config.proc_root)), config)
    }

    pub fn with_source(source: Arc<dyn ProcSource>, config: &SamplerConfig) -> Self {
        let enabled = config.enabled_subsystems();
        let health = DashMap::new();
        for subsystem in &enabled {
            health.insert(*subsystem, SubsystemHealth::default());
        }

        Self {
            source,
            enabled,
            parser_timeout: config.parser_timeout,
            net_filter: DeviceFilter::new(&config.net_exclude_prefixes),
            disk_filter: DeviceFilter::new(&config.disk_exclude_prefixes),
            cpu_baselines: Mutex::new(CpuBaselines::new()),
            health,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> &[Subsystem] {
        &self.enabled
    }

    /// Run one cycle. Never fails as a whole; see `SampleReport::failures`.
    pub async fn sample(&self) -> SampleReport {
        let timer = PerfTimer::with_threshold("sample", SLOW_CYCLE_THRESHOLD_MS);
        let started = Instant::now();
        let timestamp = Timestamp::now();

        let (cpu, memory, network, disk) = tokio::join!(
            self.bounded(Subsystem::Cpu, self.sample_cpu()),
            self.bounded(Subsystem::Memory, self.sample_memory()),
            self.bounded(Subsystem::Network, self.sample_network()),
            self.bounded(Subsystem::Disk, self.sample_disk()),
        );

        let mut values = MetricMap::new();
        let mut failures = Vec::new();
        for outcome in [cpu, memory, network, disk].into_iter().flatten() {
            match outcome {
                Ok(map) => values.extend(map),
                Err(err) => failures.push(err),
            }
        }

        let cycle = self.cycles.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        debug!(
            cycle,
            metrics = values.len(),
            failures = failures.len(),
            "Sampling cycle complete"
        );
        timer.stop();

        SampleReport {
            timestamp,
            values,
            failures,
            elapsed: started.elapsed(),
        }
    }

    /// Apply the deadline and record health. `None` when the subsystem is disabled.
    async fn bounded<F>(&self, subsystem: Subsystem, work: F) -> Option<SamplerResult<MetricMap>>
    where
        F: Future<Output = SamplerResult<MetricMap>>,
    {
        if !self.enabled.contains(&subsystem) {
            return None;
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.parser_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(SamplerError::Timeout {
                subsystem,
                timeout_ms: self.parser_timeout.as_millis() as u64,
            }),
        };

        let mut health = self.health.entry(subsystem).or_default();
        match &outcome {
            Ok(_) => health.record_success(started.elapsed()),
            Err(err) => {
                health.record_error(err);
                warn!(
                    %subsystem,
                    category = err.category(),
                    consecutive_failures = health.consecutive_failures,
                    error = %err,
                    "Subsystem dropped from sampling cycle"
                );
            }
        }

        Some(outcome)
    }

    async fn read(&self, subsystem: Subsystem, relative: &str) -> SamplerResult<String> {
        self.source
            .read(relative)
            .await
            .map_err(|source| SamplerError::SourceUnreadable {
                subsystem,
                path: self.source.locate(relative),
                source,
            })
    }

    async fn sample_cpu(&self) -> SamplerResult<MetricMap> {
        let (cpuinfo, stat) = tokio::try_join!(
            self.read(Subsystem::Cpu, files::CPUINFO),
            self.read(Subsystem::Cpu, files::STAT),
        )?;
        let mut baselines = self.cpu_baselines.lock();
        parsers::parse_cpu(&cpuinfo, &stat, &mut baselines)
    }

    async fn sample_memory(&self) -> SamplerResult<MetricMap> {
        let meminfo = self.read(Subsystem::Memory, files::MEMINFO).await?;
        parsers::parse_memory(&meminfo)
    }

    async fn sample_network(&self) -> SamplerResult<MetricMap> {
        let netdev = self.read(Subsystem::Network, files::NET_DEV).await?;
        parsers::parse_network(&netdev, &self.net_filter)
    }

    async fn sample_disk(&self) -> SamplerResult<MetricMap> {
        let diskstats = self.read(Subsystem::Disk, files::DISKSTATS).await?;
        parsers::parse_disk(&diskstats, &self.disk_filter)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn health(&self, subsystem: Subsystem) -> SubsystemHealth {
        self.health
            .get(&subsystem)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn health_report(&self) -> Vec<(Subsystem, SubsystemHealth)> {
        let mut report: Vec<_> = self
            .health
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        report.sort_by_key(|(subsystem, _)| *subsystem);
        report
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(AtomicOrdering::Relaxed)
    }

    /// Number of cores with a CPU utilisation baseline.
    pub fn tracked_cores(&self) -> usize {
        self.cpu_baselines.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory proc root; files not present fail with NotFound.
    #[derive(Debug, Default)]
    struct FakeProc {
        files: parking_lot::RwLock<HashMap<&'static str, String>>,
        delay: Option<Duration>,
    }

    impl FakeProc {
        fn with(files: &[(&'static str, &str)]) -> Self {
            Self {
                files: parking_lot::RwLock::new(files.iter().map(|(k, v)| (*k, v.to_string())).collect()),
                delay: None,
            }
        }

        fn set(&self, name: &'static str, body: &str) {
            self.files.write().insert(name, body.to_string());
        }
    }

    #[async_trait]
    impl ProcSource for FakeProc {
        async fn read(&self, relative: &str) -> io::Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.files
                .read()
                .get(relative)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, relative.to_string()))
        }

        fn locate(&self, relative: &str) -> PathBuf {
            PathBuf::from("/fake").join(relative)
        }
    }

    const CPUINFO: &str = "processor\t: 0\ncpu MHz\t\t: 2000.0\n";
    const MEMINFO: &str = "MemTotal: 1000 kB\nMemFree: 400 kB\n";
    const NETDEV: &str = "Inter-| Receive | Transmit\n face |bytes|bytes\n  eth0: 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16\n";
    const DISKSTATS: &str = "   8 0 sda 1 2 3 4 5 6 7 8 9 10 11\n";

    fn stat(user: u64, idle: u64) -> String {
        format!("cpu  {user} 0 0 {idle} 0 0 0 0 0 0\ncpu0 {user} 0 0 {idle} 0 0 0 0 0 0\n")
    }

    fn full_proc() -> FakeProc {
        let stat = stat(100, 200);
        FakeProc::with(&[
            ("cpuinfo", CPUINFO),
            ("stat", stat.as_str()),
            ("meminfo", MEMINFO),
            ("net/dev", NETDEV),
            ("diskstats", DISKSTATS),
        ])
    }

    #[tokio::test]
    async fn test_full_cycle_merges_all_subsystems() {
        let sampler = Sampler::with_source(Arc::new(full_proc()), &SamplerConfig::default());
        let report = sampler.sample().await;

        assert!(report.is_complete());
        assert_eq!(report.values.get("memory.memFree"), Some(&400.0));
        assert_eq!(report.values.get("net.eth0.txCompressed"), Some(&16.0));
        assert_eq!(report.values.get("disk.sda.weightedIoTime"), Some(&11.0));
        assert_eq!(report.values.get("cpu.0.MHz"), Some(&2000.0));
        assert_eq!(sampler.cycles(), 1);
        assert_eq!(sampler.health(Subsystem::Disk).status, SubsystemStatus::Healthy);
    }

    #[tokio::test]
    async fn test_cpu_percentage_from_second_cycle() {
        let proc = Arc::new(full_proc());
        let sampler = Sampler::with_source(proc.clone(), &SamplerConfig::default());

        let first = sampler.sample().await;
        assert!(!first.values.contains_key("cpu.0.percentage"));

        proc.set("stat", &stat(150, 220));
        let second = sampler.sample().await;
        assert_eq!(second.values.get("cpu.0.percentage"), Some(&71.43));
        assert_eq!(sampler.tracked_cores(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_fails_only_its_subsystem() {
        let proc = full_proc();
        proc.files.write().remove("diskstats");
        let sampler = Sampler::with_source(Arc::new(proc), &SamplerConfig::default());

        for _ in 0..SUBSYSTEM_FAILURE_THRESHOLD {
            let report = sampler.sample().await;
            assert_eq!(report.failed_subsystems(), vec![Subsystem::Disk]);
            assert!(report.values.contains_key("memory.memTotal"));
            assert!(report.values.keys().all(|k| !k.starts_with("disk.")));
        }

        let health = sampler.health(Subsystem::Disk);
        assert_eq!(health.status, SubsystemStatus::Failed);
        assert_eq!(health.consecutive_failures, SUBSYSTEM_FAILURE_THRESHOLD);
        assert!(health.last_error_message.unwrap().contains("/fake/diskstats"));
        assert_eq!(sampler.health(Subsystem::Memory).status, SubsystemStatus::Healthy);
    }

    #[tokio::test]
    async fn test_slow_subsystems_time_out() {
        let mut proc = full_proc();
        proc.delay = Some(Duration::from_millis(500));
        let config = SamplerConfig {
            parser_timeout: Duration::from_millis(20),
            ..SamplerConfig::default()
        };
        let sampler = Sampler::with_source(Arc::new(proc), &config);

        let report = sampler.sample().await;
        assert!(report.values.is_empty());
        assert_eq!(report.failures.len(), 4);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f, SamplerError::Timeout { timeout_ms: 20, .. })));
        assert_eq!(sampler.health(Subsystem::Cpu).status, SubsystemStatus::Degraded);
    }

    #[tokio::test]
    async fn test_disabled_subsystems_are_skipped() {
        let config = SamplerConfig {
            collect_cpu: false,
            collect_network: false,
            ..SamplerConfig::default()
        };
        let sampler = Sampler::with_source(Arc::new(full_proc()), &config);
        let report = sampler.sample().await;

        assert!(report.is_complete());
        assert!(report.values.keys().all(|k| k.starts_with("memory.") || k.starts_with("disk.")));
        assert_eq!(sampler.health_report().len(), 2);
        assert_eq!(sampler.health(Subsystem::Cpu).status, SubsystemStatus::Unknown);
    }
}
