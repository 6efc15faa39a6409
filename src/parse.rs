//! Pure parsers for virsh text output.
//!
//! None of these fail. Lines that don't fit are skipped and metrics that
//! can't be found stay at zero, so a noisy or truncated output degrades
//! to "less information" instead of an error.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{
    BlockStats, DomainInfo, MemoryStats, NetworkStats, SnapshotDetails, SnapshotInfo, VmInfo,
};

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("invalid regex"))
        }
    };
}

cached_regex!(max_memory_re, r"(?i)max memory:\s*(\d+)\s*KiB");
cached_regex!(cpus_re, r"(?i)cpu\(s\):\s*(\d+)");
cached_regex!(cpu_time_re, r"cpu\.time=(\d+)");
cached_regex!(balloon_current_re, r"balloon\.current=(\d+)");
cached_regex!(balloon_maximum_re, r"balloon\.maximum=(\d+)");
cached_regex!(block_re, r"block\.(\d+)\.(rd|wr)\.(bytes|reqs)=(\d+)");
cached_regex!(net_re, r"net\.(\d+)\.(rx|tx)\.(bytes|pkts)=(\d+)");

/// Data lines of a virsh table: everything after the first line containing
/// all `markers`, minus dash separators and blank lines. Empty when the
/// header never shows up.
fn table_rows<'a>(output: &'a str, markers: &[&str]) -> Vec<&'a str> {
    let mut lines = output.lines();
    if !lines
        .by_ref()
        .any(|line| markers.iter().all(|m| line.contains(m)))
    {
        return Vec::new();
    }

    lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.chars().all(|c| c == '-'))
        .collect()
}

/// `virsh list --all`
///
/// ```text
///  Id   Name        State
/// ----------------------------
///  1    web         running
///  -    db backup   shut off
/// ```
///
/// Names are taken to be a single token; everything after the name is the state.
pub fn parse_vm_list(output: &str) -> Vec<VmInfo> {
    table_rows(output, &["Id", "Name", "State"])
        .into_iter()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return None;
            }
            let id = match fields[0] {
                "-" => None,
                token => token.parse().ok(),
            };
            Some(VmInfo {
                id,
                name: fields[1].to_string(),
                state: fields[2..].join(" "),
                ..VmInfo::default()
            })
        })
        .collect()
}

/// `Max memory` (KiB, reported in MiB) and `CPU(s)` from `virsh dominfo`.
pub fn parse_domain_info(output: &str) -> DomainInfo {
    let mut info = DomainInfo::default();
    for line in output.lines().map(str::trim) {
        if let Some(kib) = capture_u64(max_memory_re(), line, 1) {
            info.memory_mb = kib / 1024;
        }
        if let Some(cpus) = capture_u64(cpus_re(), line, 1) {
            info.cpus = u32::try_from(cpus).unwrap_or(0);
        }
    }
    info
}

/// `virsh snapshot-list <vm>`
///
/// ```text
///  Name        Creation Time               State
/// ---------------------------------------------------
///  clean       2024-09-15 12:34:56 +0000   shutoff
/// ```
pub fn parse_snapshot_list(output: &str) -> Vec<SnapshotInfo> {
    table_rows(output, &["Name", "Creation Time", "State"])
        .into_iter()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            Some(SnapshotInfo {
                name: fields[0].to_string(),
                creation_time: fields[1..4].join(" "),
                state: fields[4..].join(" "),
                ..SnapshotInfo::default()
            })
        })
        .collect()
}

/// `Parent:` and `Description:` from `virsh snapshot-info`. virsh prints `-`
/// for a root snapshot's parent; that counts as no parent.
pub fn parse_snapshot_details(output: &str) -> SnapshotDetails {
    let mut details = SnapshotDetails::default();
    for line in output.lines().map(str::trim) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "description" if !value.is_empty() => details.description = Some(value.to_string()),
            "parent" if !value.is_empty() && value != "-" => {
                details.parent = Some(value.to_string())
            }
            _ => {}
        }
    }
    details
}

/// `cpu.time` in nanoseconds from `virsh domstats --cpu-total`.
pub fn parse_cpu_time(output: &str) -> u64 {
    cpu_time_re()
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0)
}

/// Balloon figures from `virsh domstats --balloon`: `balloon.maximum` is the
/// total, `balloon.current` what the guest holds.
pub fn parse_memory_stats(output: &str) -> MemoryStats {
    let used_kb = first_u64(balloon_current_re(), output);
    let total_kb = first_u64(balloon_maximum_re(), output);
    let percent = if total_kb > 0 {
        used_kb as f64 / total_kb as f64 * 100.0
    } else {
        0.0
    };
    MemoryStats {
        total_kb,
        used_kb,
        available_kb: total_kb.saturating_sub(used_kb),
        percent,
    }
}

/// Block counters from `virsh domstats --block`, summed over every disk.
pub fn parse_block_stats(output: &str) -> BlockStats {
    let mut stats = BlockStats::default();
    for caps in block_re().captures_iter(output) {
        let Ok(value) = caps[4].parse::<u64>() else {
            continue;
        };
        let slot = match (&caps[2], &caps[3]) {
            ("rd", "bytes") => &mut stats.read_bytes,
            ("wr", "bytes") => &mut stats.write_bytes,
            ("rd", "reqs") => &mut stats.read_requests,
            ("wr", "reqs") => &mut stats.write_requests,
            _ => continue,
        };
        *slot = slot.saturating_add(value);
    }
    stats
}

/// Interface counters from `virsh domstats --interface`, summed over every NIC.
pub fn parse_network_stats(output: &str) -> NetworkStats {
    let mut stats = NetworkStats::default();
    for caps in net_re().captures_iter(output) {
        let Ok(value) = caps[4].parse::<u64>() else {
            continue;
        };
        let slot = match (&caps[2], &caps[3]) {
            ("rx", "bytes") => &mut stats.rx_bytes,
            ("tx", "bytes") => &mut stats.tx_bytes,
            ("rx", "pkts") => &mut stats.rx_packets,
            ("tx", "pkts") => &mut stats.tx_packets,
            _ => continue,
        };
        *slot = slot.saturating_add(value);
    }
    stats
}

fn capture_u64(re: &Regex, text: &str, group: usize) -> Option<u64> {
    re.captures(text)
        .and_then(|caps| caps.get(group))
        .and_then(|m| m.as_str().parse().ok())
}

fn first_u64(re: &Regex, text: &str) -> u64 {
    capture_u64(re, text, 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM_LIST: &str = " Id   Name          State
-------------------------------------
 3    web           running
 -    db            shut off
 12   build-agent   paused

";

    #[test]
    fn vm_list_rows() {
        let vms = parse_vm_list(VM_LIST);
        assert_eq!(vms.len(), 3);
        assert_eq!(vms[0].id, Some(3));
        assert_eq!(vms[0].name, "web");
        assert_eq!(vms[0].state, "running");
        assert_eq!(vms[1].id, None);
        assert_eq!(vms[1].state, "shut off");
        assert_eq!(vms[2].id, Some(12));
        assert_eq!(vms[2].memory_mb, 0);
    }

    #[test]
    fn vm_list_without_header_is_empty() {
        assert!(parse_vm_list("").is_empty());
        assert!(parse_vm_list("error: failed to connect to the hypervisor").is_empty());
    }

    #[test]
    fn vm_list_header_only_is_empty() {
        let out = " Id   Name   State\n--------------------\n\n";
        assert!(parse_vm_list(out).is_empty());
    }

    #[test]
    fn vm_list_skips_short_and_preamble_lines() {
        let out = "warning: something odd\n Id Name State\n---\n 1 web running\n stray\n";
        let vms = parse_vm_list(out);
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].name, "web");
    }

    #[test]
    fn vm_list_unparsable_id_is_unset() {
        let vms = parse_vm_list(" Id Name State\n--\n x1 web running\n");
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].id, None);
    }

    #[test]
    fn domain_info_fields() {
        let out = "Id:             3
Name:           web
UUID:           6b1a2f2e-0b7e-4b3c-9d33-7cf1c1f1a001
OS Type:        hvm
State:          running
CPU(s):         4
CPU time:       1200.3s
Max memory:     4194304 KiB
Used memory:    4194304 KiB
";
        let info = parse_domain_info(out);
        assert_eq!(info.memory_mb, 4096);
        assert_eq!(info.cpus, 4);
    }

    #[test]
    fn domain_info_missing_fields_stay_zero() {
        let info = parse_domain_info("Name: web\nState: shut off\n");
        assert_eq!(info, DomainInfo::default());

        let info = parse_domain_info("max memory: 1048576 KiB\n");
        assert_eq!(info.memory_mb, 1024);
        assert_eq!(info.cpus, 0);
    }

    #[test]
    fn domain_info_rounds_memory_down() {
        let info = parse_domain_info("Max memory:     1049599 KiB\n");
        assert_eq!(info.memory_mb, 1024);
    }

    #[test]
    fn snapshot_list_rows() {
        let out = " Name        Creation Time               State
---------------------------------------------------
 clean       2024-09-15 12:34:56 +0000   shutoff
 pre-update  2024-09-16 08:00:01 +0200   disk snapshot
 broken      2024-09-17
";
        let snaps = parse_snapshot_list(out);
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].name, "clean");
        assert_eq!(snaps[0].creation_time, "2024-09-15 12:34:56 +0000");
        assert_eq!(snaps[0].state, "shutoff");
        assert_eq!(snaps[1].state, "disk snapshot");
        assert!(!snaps[1].current);
    }

    #[test]
    fn snapshot_list_empty_table() {
        let out = " Name   Creation Time   State\n------------------------------\n\n";
        assert!(parse_snapshot_list(out).is_empty());
        assert!(parse_snapshot_list("").is_empty());
    }

    #[test]
    fn snapshot_details() {
        let out = "Name:           pre-update
Domain:         web
Current:        yes
State:          shutoff
Parent:         clean
Children:       0
Description:    before the kernel upgrade
";
        let details = parse_snapshot_details(out);
        assert_eq!(details.parent.as_deref(), Some("clean"));
        assert_eq!(details.description.as_deref(), Some("before the kernel upgrade"));
    }

    #[test]
    fn snapshot_details_root_snapshot() {
        let details = parse_snapshot_details("Name: clean\nParent:         -\n");
        assert_eq!(details, SnapshotDetails::default());
    }

    #[test]
    fn cpu_time() {
        let out = "Domain: 'web'\n  cpu.time=1234567890\n  cpu.user=100\n";
        assert_eq!(parse_cpu_time(out), 1234567890);
        assert_eq!(parse_cpu_time("Domain: 'web'\n"), 0);
    }

    #[test]
    fn memory_stats() {
        let out = "Domain: 'web'\n  balloon.current=1048576\n  balloon.maximum=4194304\n";
        let mem = parse_memory_stats(out);
        assert_eq!(mem.used_kb, 1048576);
        assert_eq!(mem.total_kb, 4194304);
        assert_eq!(mem.available_kb, 3145728);
        assert!((mem.percent - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn memory_stats_without_maximum() {
        let mem = parse_memory_stats("balloon.current=1024\n");
        assert_eq!(mem.total_kb, 0);
        assert_eq!(mem.available_kb, 0);
        assert_eq!(mem.percent, 0.0);
    }

    #[test]
    fn block_stats_sum_across_disks() {
        let out = "Domain: 'web'
  block.count=2
  block.0.name=vda
  block.0.rd.reqs=10
  block.0.rd.bytes=4096
  block.0.wr.reqs=5
  block.0.wr.bytes=2048
  block.1.name=vdb
  block.1.rd.reqs=1
  block.1.rd.bytes=512
  block.1.wr.reqs=2
  block.1.wr.bytes=1024
  block.1.fl.reqs=7
";
        let block = parse_block_stats(out);
        assert_eq!(
            block,
            BlockStats {
                read_bytes: 4608,
                write_bytes: 3072,
                read_requests: 11,
                write_requests: 7,
            }
        );
    }

    #[test]
    fn network_stats_sum_across_interfaces() {
        let out = "Domain: 'web'
  net.count=2
  net.0.name=vnet0
  net.0.rx.bytes=1000
  net.0.rx.pkts=10
  net.0.tx.bytes=2000
  net.0.tx.pkts=20
  net.0.rx.errs=3
  net.1.rx.bytes=500
  net.1.rx.pkts=5
  net.1.tx.bytes=250
  net.1.tx.pkts=2
";
        let net = parse_network_stats(out);
        assert_eq!(
            net,
            NetworkStats {
                rx_bytes: 1500,
                tx_bytes: 2250,
                rx_packets: 15,
                tx_packets: 22,
            }
        );
    }

    #[test]
    fn stats_from_empty_output() {
        assert_eq!(parse_block_stats(""), BlockStats::default());
        assert_eq!(parse_network_stats(""), NetworkStats::default());
    }
}
