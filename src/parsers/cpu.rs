//! CPU parser: per-core clock speed from `cpuinfo` and tick counters from
//! `stat`, plus utilisation derived against the previous observation of the
//! same core.

use std::collections::BTreeMap;

use crate::error::{SamplerError, SamplerResult};
use crate::sampler::Subsystem;
use crate::types::{metric_key, MetricMap};
use crate::MAX_TRACKED_CORES;

use super::{files, parse_value};

/// Tick counter names, in `/proc/stat` column order.
const TICK_FIELDS: [&str; 10] = [
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal", "guest", "guestNice",
];

/// Folded tick totals for one core at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreTicks {
    pub idle: f64,
    pub non_idle: f64,
    pub total: f64,
}

impl CoreTicks {
    /// `ticks` must be in `TICK_FIELDS` order.
    fn from_ticks(ticks: &[f64; 10]) -> Self {
        let [user, _nice, system, idle, iowait, irq, softirq, steal, _guest, _guest_nice] = *ticks;
        let idle = idle + iowait;
        let non_idle = user + system + irq + softirq + steal;
        Self {
            idle,
            non_idle,
            total: idle + non_idle,
        }
    }

    /// Utilisation since `prev`, or `None` when the counters went backwards.
    fn utilisation_since(&self, prev: &CoreTicks) -> Option<f64> {
        let total_delta = self.total - prev.total;
        let idle_delta = self.idle - prev.idle;
        if !(total_delta > 0.0) || idle_delta < 0.0 {
            return None;
        }
        let pct = 100.0 * (total_delta - idle_delta) / total_delta;
        Some(round2(pct.clamp(0.0, 100.0)))
    }
}

#[inline]
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Previous-tick state per core index, owned by the sampler.
#[derive(Debug, Default)]
pub struct CpuBaselines {
    cores: BTreeMap<u32, CoreTicks>,
}

impl CpuBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, core: u32) -> Option<&CoreTicks> {
        self.cores.get(&core)
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    pub fn clear(&mut self) {
        self.cores.clear();
    }

    /// Record `ticks` for `core`, returning the utilisation against the
    /// previous baseline when there is a usable one.
    fn observe(&mut self, core: u32, ticks: CoreTicks) -> Option<f64> {
        let pct = self.cores.get(&core).and_then(|prev| ticks.utilisation_since(prev));
        self.cores.insert(core, ticks);
        pct
    }

    /// Drop baselines for cores that disappeared (hot-unplug).
    fn retain_present(&mut self, present: &[u32]) {
        self.cores.retain(|core, _| present.contains(core));
    }
}

/// Parse `cpuinfo` and `stat` into `cpu.<core>.<field>` metrics.
pub fn parse_cpu(cpuinfo: &str, stat: &str, baselines: &mut CpuBaselines) -> SamplerResult<MetricMap> {
    let mut out = MetricMap::new();

    let mut cores = 0usize;
    let mut current: Option<u32> = None;
    for line in cpuinfo.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim() {
            "processor" => {
                cores += 1;
                current = value.trim().parse().ok();
            }
            "cpu MHz" => {
                if let Some(core) = current {
                    out.insert(metric_key("cpu", Some(&core.to_string()), "MHz"), parse_value(value));
                }
            }
            _ => {}
        }
    }

    if cores == 0 {
        return Err(SamplerError::malformed(
            Subsystem::Cpu,
            files::CPUINFO,
            "no processor entries",
        ));
    }
    if cores > MAX_TRACKED_CORES {
        return Err(SamplerError::malformed(
            Subsystem::Cpu,
            files::CPUINFO,
            format!("{cores} processors exceeds the tracked maximum of {MAX_TRACKED_CORES}"),
        ));
    }

    let rows: Vec<&str> = stat.lines().take(cores + 1).collect();
    if rows.len() < cores + 1 {
        return Err(SamplerError::malformed(
            Subsystem::Cpu,
            files::STAT,
            format!("expected {} cpu rows, found {}", cores + 1, rows.len()),
        ));
    }

    let mut present = Vec::with_capacity(cores);
    for (position, row) in rows.iter().enumerate().skip(1) {
        let mut columns = row.split_whitespace();
        let label = columns.next().unwrap_or_default();
        let core = match label.strip_prefix("cpu") {
            Some(idx) if !idx.is_empty() => idx.parse::<u32>().map_err(|_| {
                SamplerError::malformed(Subsystem::Cpu, files::STAT, format!("bad core label '{label}'"))
            })?,
            _ => {
                return Err(SamplerError::malformed(
                    Subsystem::Cpu,
                    files::STAT,
                    format!("row {position} is not a per-core cpu row"),
                ))
            }
        };

        let values: Vec<f64> = columns.map(parse_value).collect();
        if values.len() < TICK_FIELDS.len() {
            return Err(SamplerError::malformed(
                Subsystem::Cpu,
                files::STAT,
                format!("{label}: expected {} tick columns, found {}", TICK_FIELDS.len(), values.len()),
            ));
        }

        let mut ticks = [0.0; 10];
        ticks.copy_from_slice(&values[..TICK_FIELDS.len()]);

        let instance = core.to_string();
        for (field, value) in TICK_FIELDS.iter().zip(ticks) {
            out.insert(metric_key("cpu", Some(&instance), field), value);
        }

        if let Some(pct) = baselines.observe(core, CoreTicks::from_ticks(&ticks)) {
            out.insert(metric_key("cpu", Some(&instance), "percentage"), pct);
        }
        present.push(core);
    }
    baselines.retain_present(&present);

    Ok(out)
}
