//! `/proc/diskstats` parser.

use crate::error::{SamplerError, SamplerResult};
use crate::sampler::Subsystem;
use crate::types::{metric_key, MetricMap};

use super::{files, parse_value, DeviceFilter};

/// The first eleven per-device counters. Newer kernels append discard and
/// flush columns, which are ignored.
pub const DISK_FIELDS: [&str; 11] = [
    "reads",
    "readsMerged",
    "sectorsRead",
    "readTime",
    "writes",
    "writesMerged",
    "sectorsWritten",
    "writeTime",
    "currentIoCount",
    "ioTime",
    "weightedIoTime",
];

/// major, minor, name
const LEADING_COLUMNS: usize = 3;

pub fn parse_disk(diskstats: &str, filter: &DeviceFilter) -> SamplerResult<MetricMap> {
    let mut out = MetricMap::new();

    for line in diskstats.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if parts.len() < LEADING_COLUMNS + DISK_FIELDS.len() {
            return Err(SamplerError::malformed(
                Subsystem::Disk,
                files::DISKSTATS,
                format!(
                    "expected at least {} columns, found {}",
                    LEADING_COLUMNS + DISK_FIELDS.len(),
                    parts.len()
                ),
            ));
        }

        let device = parts[2];
        if filter.excludes(device) {
            continue;
        }

        let counters = &parts[LEADING_COLUMNS..LEADING_COLUMNS + DISK_FIELDS.len()];
        for (field, raw) in DISK_FIELDS.iter().zip(counters) {
            out.insert(metric_key("disk", Some(device), field), parse_value(raw));
        }
    }

    Ok(out)
}
