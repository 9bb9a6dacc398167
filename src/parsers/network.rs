//! `/proc/net/dev` parser.

use crate::error::{SamplerError, SamplerResult};
use crate::sampler::Subsystem;
use crate::types::{metric_key, MetricMap};

use super::{files, parse_value, DeviceFilter};

/// Counter names, receive block then transmit block.
pub const NET_FIELDS: [&str; 16] = [
    "rxBytes",
    "rxPackets",
    "rxErrors",
    "rxDrop",
    "rxFifo",
    "rxFrame",
    "rxCompressed",
    "rxMulticast",
    "txBytes",
    "txPackets",
    "txErrors",
    "txDrop",
    "txFifo",
    "txColls",
    "txCarrier",
    "txCompressed",
];

pub fn parse_network(netdev: &str, filter: &DeviceFilter) -> SamplerResult<MetricMap> {
    let mut out = MetricMap::new();

    for line in netdev.lines() {
        // Two header rows, both column-grouped with '|'.
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }

        let Some((device, counters)) = line.split_once(':') else {
            return Err(SamplerError::malformed(
                Subsystem::Network,
                files::NET_DEV,
                format!("row without device separator: '{}'", line.trim()),
            ));
        };
        let device = device.trim();
        if device.is_empty() || filter.excludes(device) {
            continue;
        }

        let values: Vec<f64> = counters.split_whitespace().map(parse_value).collect();
        if values.len() != NET_FIELDS.len() {
            return Err(SamplerError::malformed(
                Subsystem::Network,
                files::NET_DEV,
                format!("{device}: expected {} columns, found {}", NET_FIELDS.len(), values.len()),
            ));
        }

        for (field, value) in NET_FIELDS.iter().zip(values) {
            out.insert(metric_key("net", Some(device), field), value);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const NETDEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  104000    1200    0    0    0     0          0         0   104000    1200    0    0    0     0       0          0
  eth0: 9876543   54321    1    2    0     0          0        12  1234567   43210    0    0    0     0       0          0
veth1234:   500      10    0    0    0     0          0         0      600      12    0    0    0     0       0          0
";

    #[rstest]
    #[case("lo", false)]
    #[case("veth1234", false)]
    #[case("eth0", true)]
    fn test_default_exclusions(#[case] device: &str, #[case] included: bool) {
        let out = parse_network(NETDEV, &DeviceFilter::default_network()).unwrap();
        let key = format!("net.{device}.rxBytes");
        assert_eq!(out.contains_key(key.as_str()), included);
    }

    #[test]
    fn test_all_sixteen_counters_emitted() {
        let out = parse_network(NETDEV, &DeviceFilter::default_network()).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(out.get("net.eth0.rxBytes"), Some(&9_876_543.0));
        assert_eq!(out.get("net.eth0.rxMulticast"), Some(&12.0));
        assert_eq!(out.get("net.eth0.txPackets"), Some(&43_210.0));
    }

    #[test]
    fn test_custom_filter_replaces_defaults() {
        let out = parse_network(NETDEV, &DeviceFilter::new(["eth"])).unwrap();
        assert!(out.contains_key("net.lo.rxBytes"));
        assert!(!out.contains_key("net.eth0.rxBytes"));
    }

    #[test]
    fn test_vlan_interface_is_one_key_segment() {
        let netdev = "  eth0: 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16\n\
                      eth0.100: 100 2 0 0 0 0 0 0 50 1 0 0 0 0 0 0\n";
        let out = parse_network(netdev, &DeviceFilter::default_network()).unwrap();

        assert_eq!(out.get("net.eth0_100.rxBytes"), Some(&100.0));
        assert_eq!(out.get("net.eth0_100.txBytes"), Some(&50.0));
        assert_eq!(out.len(), 32);
        assert!(out.keys().all(|k| k.split('.').count() == 3));
    }

    #[test]
    fn test_wrong_column_count_fails() {
        let err = parse_network("  eth0: 1 2 3\n", &DeviceFilter::default()).unwrap_err();
        assert!(matches!(err, SamplerError::MalformedSource { file: "net/dev", .. }));
    }

    #[test]
    fn test_header_only_source_is_empty() {
        let headers: String = NETDEV.lines().take(2).map(|l| format!("{l}\n")).collect();
        let out = parse_network(&headers, &DeviceFilter::default()).unwrap();
        assert!(out.is_empty());
    }
}
