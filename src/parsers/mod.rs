// ============================================================================
// PROC PARSERS
// ============================================================================
// Pure text parsers for the kernel pseudo-files under the proc root. Each
// turns one subsystem's source text into a flat `MetricMap`; only the CPU
// parser carries state between calls (per-core tick baselines).
// ============================================================================

pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;

pub use cpu::{parse_cpu, CoreTicks, CpuBaselines};
pub use disk::parse_disk;
pub use memory::parse_memory;
pub use network::parse_network;

use compact_str::CompactString;

/// Source file names relative to the proc root.
pub mod files {
    pub const CPUINFO: &str = "cpuinfo";
    pub const STAT: &str = "stat";
    pub const MEMINFO: &str = "meminfo";
    pub const NET_DEV: &str = "net/dev";
    pub const DISKSTATS: &str = "diskstats";
}

/// Parse a numeric field; anything unparseable becomes NaN and is dropped
/// later by the aggregator.
#[inline]
pub(crate) fn parse_value(raw: &str) -> f64 {
    raw.trim().parse::<f64>().unwrap_or(f64::NAN)
}

// ----------------------------------------------------------------------------
// Device Filtering
// ----------------------------------------------------------------------------

/// Name-prefix exclusion list for network interfaces and block devices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    prefixes: Vec<CompactString>,
}

impl DeviceFilter {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| CompactString::from(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Virtual and loopback interfaces skipped by default.
    pub fn default_network() -> Self {
        Self::new(DEFAULT_NET_EXCLUDES)
    }

    /// Loop and ram-disk devices skipped by default.
    pub fn default_disk() -> Self {
        Self::new(DEFAULT_DISK_EXCLUDES)
    }

    #[inline]
    pub fn excludes(&self, device: &str) -> bool {
        self.prefixes.iter().any(|p| device.starts_with(p.as_str()))
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(|p| p.as_str())
    }
}

pub const DEFAULT_NET_EXCLUDES: &[&str] = &["lo", "veth", "docker", "br-", "virbr", "wlx", "cni", "flannel"];

pub const DEFAULT_DISK_EXCLUDES: &[&str] = &["loop", "ram"];
