//! Sampling against a fake proc root laid out on disk.

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use procfs_agent::config::SamplerConfig;
use procfs_agent::sampler::SubsystemStatus;
use procfs_agent::{Sampler, SamplerError, Subsystem};
use tempfile::TempDir;

const CPUINFO: &str = "\
processor\t: 0
vendor_id\t: AuthenticAMD
cpu MHz\t\t: 3600.000

processor\t: 1
vendor_id\t: AuthenticAMD
cpu MHz\t\t: 2200.250
";

const MEMINFO: &str = "\
MemTotal:       32768000 kB
MemFree:         2048000 kB
MemAvailable:   16384000 kB
Buffers:          512000 kB
Cached:          8192000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
";

const NETDEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  5000      50    0    0    0     0          0         0     5000      50    0    0    0     0       0          0
  eth0: 80000     800    2    0    0     0          0         4    40000     400    0    0    0     0       0          0
docker0:  100       1    0    0    0     0          0         0      100       1    0    0    0     0       0          0
";

const DISKSTATS: &str = "\
   7       0 loop0 10 0 20 1 0 0 0 0 0 1 1 0 0 0 0
 259       0 nvme0n1 1000 20 50000 300 2000 40 90000 700 1 900 1000 0 0 0 0 0 0
";

fn stat(core0: (u64, u64), core1: (u64, u64)) -> String {
    format!(
        "cpu  {} 0 0 {} 0 0 0 0 0 0\n\
         cpu0 {} 0 0 {} 0 0 0 0 0 0\n\
         cpu1 {} 0 0 {} 0 0 0 0 0 0\n\
         intr 1 2 3\nctxt 12345\n",
        core0.0 + core1.0,
        core0.1 + core1.1,
        core0.0,
        core0.1,
        core1.0,
        core1.1
    )
}

fn fake_proc() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("net")).unwrap();
    fs::write(root.join("cpuinfo"), CPUINFO).unwrap();
    fs::write(root.join("stat"), stat((100, 200), (50, 50))).unwrap();
    fs::write(root.join("meminfo"), MEMINFO).unwrap();
    fs::write(root.join("net/dev"), NETDEV).unwrap();
    fs::write(root.join("diskstats"), DISKSTATS).unwrap();
    dir
}

fn sampler_at(root: &Path) -> Sampler {
    let config = SamplerConfig {
        proc_root: root.to_path_buf(),
        ..SamplerConfig::default()
    };
    Sampler::new(&config)
}

#[tokio::test]
async fn test_one_cycle_covers_every_subsystem() {
    let proc = fake_proc();
    let sampler = sampler_at(proc.path());

    let report = sampler.sample().await;
    assert!(report.is_complete(), "failures: {:?}", report.failures);

    let v = &report.values;
    assert_eq!(v.get("cpu.0.MHz"), Some(&3600.0));
    assert_eq!(v.get("cpu.1.MHz"), Some(&2200.25));
    assert_eq!(v.get("cpu.1.idle"), Some(&50.0));
    assert_eq!(v.get("memory.memTotal"), Some(&32_768_000.0));
    assert_eq!(v.get("memory.swapFree"), Some(&4_096_000.0));
    assert_eq!(v.get("net.eth0.rxBytes"), Some(&80_000.0));
    assert_eq!(v.get("net.eth0.rxErrors"), Some(&2.0));
    assert_eq!(v.get("disk.nvme0n1.reads"), Some(&1000.0));
    assert_eq!(v.get("disk.nvme0n1.currentIoCount"), Some(&1.0));

    assert!(!v.keys().any(|k| k.starts_with("net.lo.") || k.starts_with("net.docker0.")));
    assert!(!v.keys().any(|k| k.starts_with("disk.loop")));
    assert!(!v.keys().any(|k| k.ends_with(".percentage")));
}

#[tokio::test]
async fn test_utilisation_appears_on_second_cycle() {
    let proc = fake_proc();
    let sampler = sampler_at(proc.path());
    sampler.sample().await;

    fs::write(proc.path().join("stat"), stat((150, 220), (60, 90))).unwrap();
    let report = sampler.sample().await;

    assert_eq!(report.values.get("cpu.0.percentage"), Some(&71.43));
    // core 1: Δtotal = 50, Δidle = 40
    assert_eq!(report.values.get("cpu.1.percentage"), Some(&20.0));
}

#[tokio::test]
async fn test_missing_source_drops_only_that_subsystem() {
    let proc = fake_proc();
    fs::remove_file(proc.path().join("net/dev")).unwrap();
    let sampler = sampler_at(proc.path());

    let report = sampler.sample().await;
    assert_eq!(report.failed_subsystems(), vec![Subsystem::Network]);
    assert!(matches!(
        report.failures[0],
        SamplerError::SourceUnreadable {
            subsystem: Subsystem::Network,
            ..
        }
    ));
    assert!(report.values.contains_key("memory.memFree"));
    assert!(report.values.contains_key("disk.nvme0n1.reads"));
    assert!(!report.values.keys().any(|k| k.starts_with("net.")));

    assert_eq!(sampler.health(Subsystem::Network).status, SubsystemStatus::Degraded);
    assert_eq!(sampler.health(Subsystem::Memory).status, SubsystemStatus::Healthy);
}

#[tokio::test]
async fn test_format_drift_fails_the_cycle_not_the_process() {
    let proc = fake_proc();
    fs::write(proc.path().join("diskstats"), "   8 0 sda 1 2 3\n").unwrap();
    let sampler = sampler_at(proc.path());

    let report = sampler.sample().await;
    assert_eq!(report.failed_subsystems(), vec![Subsystem::Disk]);

    fs::write(proc.path().join("diskstats"), DISKSTATS).unwrap();
    let report = sampler.sample().await;
    assert!(report.is_complete());
    let health = sampler.health(Subsystem::Disk);
    assert_eq!(health.status, SubsystemStatus::Healthy);
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.total_failures, 1);
}

#[tokio::test]
async fn test_configured_exclusions_replace_defaults() {
    let proc = fake_proc();
    let config = SamplerConfig {
        proc_root: proc.path().to_path_buf(),
        net_exclude_prefixes: vec!["eth".into()],
        disk_exclude_prefixes: vec![],
        ..SamplerConfig::default()
    };
    let report = Sampler::new(&config).sample().await;

    assert!(report.values.contains_key("net.lo.rxBytes"));
    assert!(report.values.contains_key("net.docker0.rxBytes"));
    assert!(!report.values.contains_key("net.eth0.rxBytes"));
    assert!(report.values.contains_key("disk.loop0.reads"));
}
