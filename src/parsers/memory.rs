//! `/proc/meminfo` parser.

use compact_str::CompactString;

use crate::error::{SamplerError, SamplerResult};
use crate::sampler::Subsystem;
use crate::types::{metric_key, MetricMap};

use super::{files, parse_value};

/// Parse `Key:   value [kB]` rows into `memory.<key>` with the first letter
/// lower-cased. Values are kept in the unit the kernel reports.
pub fn parse_memory(meminfo: &str) -> SamplerResult<MetricMap> {
    let mut out = MetricMap::new();

    for (lineno, line) in meminfo.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((name, rest)) = line.split_once(':') else {
            return Err(SamplerError::malformed(
                Subsystem::Memory,
                files::MEMINFO,
                format!("line {}: missing ':' separator", lineno + 1),
            ));
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(SamplerError::malformed(
                Subsystem::Memory,
                files::MEMINFO,
                format!("line {}: empty key", lineno + 1),
            ));
        }

        let value = rest.split_whitespace().next().map(parse_value).unwrap_or(f64::NAN);
        out.insert(metric_key("memory", None, &camel_key(name)), value);
    }

    if out.is_empty() {
        return Err(SamplerError::malformed(Subsystem::Memory, files::MEMINFO, "no entries"));
    }
    Ok(out)
}

fn camel_key(name: &str) -> CompactString {
    let mut chars = name.chars();
    let mut key = CompactString::default();
    if let Some(first) = chars.next() {
        key.extend(first.to_lowercase());
        key.push_str(chars.as_str());
    }
    key
}
