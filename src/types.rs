//! Typed records produced from virsh output.

use facet::Facet;

/// One row of `virsh list --all`, optionally enriched by `domuuid`/`dominfo`.
///
/// `memory_mb` and `cpus` are zero when unknown, never "literally zero".
#[derive(Debug, Clone, Default, PartialEq, Facet)]
pub struct VmInfo {
    /// Hypervisor id; only running domains have one.
    pub id: Option<u32>,
    pub name: String,
    /// Raw state token as printed by virsh ("running", "shut off", ...).
    pub state: String,
    pub uuid: String,
    pub memory_mb: u64,
    pub cpus: u32,
}

impl VmInfo {
    pub fn is_running(&self) -> bool {
        self.state.contains("running")
    }
}

/// What the caller wants the new VM to look like.
#[derive(Debug, Clone, PartialEq)]
pub struct VmConfig {
    pub memory_mb: u64,
    pub cpus: u32,
    /// Size string handed to `qemu-img`, e.g. `20G`.
    pub disk_size: String,
    pub disk_path: Option<String>,
    /// Installation media; reported back to the caller, not attached.
    pub iso_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
pub struct SnapshotInfo {
    pub name: String,
    /// Timestamp exactly as virsh prints it, e.g. `2024-09-15 12:34:56 +0000`.
    pub creation_time: String,
    pub state: String,
    pub parent: Option<String>,
    pub description: Option<String>,
    /// Whether this is the VM's current snapshot. Derived, never stored by virsh
    /// on the snapshot itself.
    pub current: bool,
}

/// Extra fields from `virsh snapshot-info`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDetails {
    pub parent: Option<String>,
    pub description: Option<String>,
}

/// `Max memory` and `CPU(s)` from `virsh dominfo`; zero when missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainInfo {
    pub memory_mb: u64,
    pub cpus: u32,
}

/// Point-in-time counters from `virsh domstats`. Every value is cumulative;
/// rates are the caller's business.
#[derive(Debug, Clone, Default, PartialEq, Facet)]
pub struct VmStats {
    pub cpu_time_ns: u64,
    pub memory: MemoryStats,
    pub block_io: BlockStats,
    pub network: NetworkStats,
}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
pub struct MemoryStats {
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
    pub percent: f64,
}

/// Summed over every block device of the domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct BlockStats {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_requests: u64,
    pub write_requests: u64,
}

/// Summed over every interface of the domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct NetworkStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}
