//! Storage pool discovery and placement of VM disk images.
//!
//! Pools are found fresh on every call by three independent probes: cache
//! volumes under `/share`, ZFS pools, and USB mounts. A probe that fails
//! contributes nothing.

use std::fmt;

use crate::error::VmError;
use crate::paths;
use crate::remote::{RemoteExecutor, shell_escape};
use crate::util::parse_size_gb;
use crate::virsh::env::ToolchainRoot;

/// QNAP mounts external drives under paths like `.../USBDisk1`, so the match
/// must ignore case.
const USB_MOUNT_PROBE: &str = "mount | grep -i usb";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// RAID/cache volume exposed as `/share/CACHEDEVn_DATA`.
    CacheDev,
    Zfs,
    Usb,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PoolKind::CacheDev => "CACHEDEV",
            PoolKind::Zfs => "ZFS",
            PoolKind::Usb => "USB",
        })
    }
}

/// A place a disk image can go. Capacity is in whole gigabytes; zero when
/// the `df` lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    pub path: String,
    pub kind: PoolKind,
    pub total_gb: u64,
    pub used_gb: u64,
    pub free_gb: u64,
    pub available: bool,
    pub description: String,
}

impl Pool {
    fn new(kind: PoolKind, name: String, path: String, label: &str) -> Self {
        let description = match kind {
            PoolKind::CacheDev => format!("Cache device storage - {label}"),
            PoolKind::Zfs => format!("ZFS storage pool - {label}"),
            PoolKind::Usb => format!("USB storage device - {label}"),
        };
        Self {
            name,
            path,
            kind,
            total_gb: 0,
            used_gb: 0,
            free_gb: 0,
            available: true,
            description,
        }
    }
}

/// `df -BG` figures for one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_gb: u64,
    pub used_gb: u64,
    pub free_gb: u64,
}

pub struct StorageManager<'a, E> {
    exec: &'a E,
}

impl<'a, E: RemoteExecutor> StorageManager<'a, E> {
    pub fn new(exec: &'a E) -> Self {
        Self { exec }
    }

    /// Run all three probes, then look up capacity for each pool found.
    pub async fn discover(&self) -> Vec<Pool> {
        let mut pools = Vec::new();
        pools.extend(self.probe_cachedev().await);
        pools.extend(self.probe_zfs().await);
        pools.extend(self.probe_usb().await);

        for pool in &mut pools {
            match self.disk_usage(&pool.path).await {
                Ok(usage) => {
                    // zpool already reported a total; keep it when df has none.
                    if usage.total_gb > 0 {
                        pool.total_gb = usage.total_gb;
                    }
                    pool.used_gb = usage.used_gb;
                    pool.free_gb = usage.free_gb;
                }
                Err(e) => tracing::debug!(pool = pool.name, "capacity lookup failed: {e}"),
            }
        }

        tracing::debug!(count = pools.len(), "discovered storage pools");
        pools
    }

    /// Discover, then pick by [`select_best`].
    pub async fn best_pool(&self) -> Result<Pool, VmError> {
        let pools = self.discover().await;
        select_best(&pools).cloned()
    }

    async fn probe_cachedev(&self) -> Vec<Pool> {
        match self.exec.execute("ls -la /share/ | grep CACHEDEV").await {
            Ok(out) => parse_cachedev_listing(&out),
            Err(e) => {
                tracing::debug!("no cache volumes: {e}");
                Vec::new()
            }
        }
    }

    async fn probe_zfs(&self) -> Vec<Pool> {
        if let Err(e) = self.exec.execute("which zpool").await {
            tracing::debug!("zpool not installed: {e}");
            return Vec::new();
        }
        match self.exec.execute("zpool list -H").await {
            Ok(out) => parse_zpool_list(&out),
            Err(e) => {
                tracing::debug!("zpool list failed: {e}");
                Vec::new()
            }
        }
    }

    async fn probe_usb(&self) -> Vec<Pool> {
        match self.exec.execute(USB_MOUNT_PROBE).await {
            Ok(out) => parse_usb_mounts(&out),
            Err(e) => {
                tracing::debug!("no USB mounts: {e}");
                Vec::new()
            }
        }
    }

    pub async fn disk_usage(&self, path: &str) -> Result<DiskUsage, VmError> {
        let out = self
            .exec
            .execute(&format!("df -BG {} | tail -n 1", shell_escape(path)))
            .await
            .map_err(|e| VmError::remote(format!("read disk usage of {path}"), e))?;
        Ok(parse_df_line(&out))
    }

    /// Best-effort `mkdir -p` of the pool's disk directory. A failure here
    /// shows up later, when the disk image can't be written.
    pub async fn ensure_disk_dir(&self, pool: &Pool) {
        let dir = paths::disk_dir(&pool.path);
        if let Err(e) = self
            .exec
            .execute(&format!("mkdir -p {}", shell_escape(&dir)))
            .await
        {
            tracing::debug!(dir, "could not create disk directory: {e}");
        }
    }

    /// `qemu-img create -f qcow2 <path> <size>` from the toolchain root.
    pub async fn create_disk(
        &self,
        root: &ToolchainRoot,
        disk_path: &str,
        size: &str,
    ) -> Result<(), VmError> {
        let qemu_img = root.qemu_img();
        self.exec
            .execute(&format!("test -x {}", shell_escape(&qemu_img)))
            .await
            .map_err(|e| VmError::remote(format!("find qemu-img at {qemu_img}"), e))?;

        let command = format!(
            "{} create -f qcow2 {} {}",
            shell_escape(&qemu_img),
            shell_escape(disk_path),
            shell_escape(size)
        );
        tracing::info!(disk_path, size, "creating disk image");
        self.exec
            .execute(&root.wrap(&command))
            .await
            .map_err(|e| VmError::remote(format!("create disk image {disk_path}"), e))?;
        Ok(())
    }
}

/// Where the disk of `vm_name` lives in `pool`. Pure.
pub fn disk_path_for(pool: &Pool, vm_name: &str) -> String {
    paths::disk_path(&pool.path, vm_name)
}

/// Left-to-right reduction over the available pools.
///
/// A candidate replaces the current best when it is a cache volume and the
/// best is not, when it is ZFS and the best is USB, or when both are the same
/// kind and the candidate has strictly more free space. The result depends on
/// input order only through the same-kind tie-break and the one-sided ZFS/USB
/// rule.
pub fn select_best(pools: &[Pool]) -> Result<&Pool, VmError> {
    pools
        .iter()
        .filter(|p| p.available)
        .reduce(|best, candidate| {
            if prefers(candidate, best) {
                candidate
            } else {
                best
            }
        })
        .ok_or(VmError::NoPoolAvailable)
}

fn prefers(candidate: &Pool, best: &Pool) -> bool {
    match (candidate.kind, best.kind) {
        (PoolKind::CacheDev, kind) if kind != PoolKind::CacheDev => true,
        (PoolKind::Zfs, PoolKind::Usb) => true,
        (a, b) if a == b => candidate.free_gb > best.free_gb,
        _ => false,
    }
}

/// `ls -la /share/ | grep CACHEDEV`: the ninth column names the volume.
pub fn parse_cachedev_listing(output: &str) -> Vec<Pool> {
    let mut pools: Vec<Pool> = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&name) = fields.get(8) else {
            continue;
        };
        if !name.starts_with("CACHEDEV") {
            continue;
        }
        let volume = if name.ends_with("_DATA") {
            name.to_string()
        } else {
            format!("{name}_DATA")
        };
        let path = format!("/share/{volume}");
        if pools.iter().any(|p| p.path == path) {
            continue;
        }
        pools.push(Pool::new(PoolKind::CacheDev, name.to_string(), path, name));
    }
    pools
}

/// `zpool list -H`: tab-separated, name then size.
pub fn parse_zpool_list(output: &str) -> Vec<Pool> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            let name = fields[0];
            let mut pool = Pool::new(
                PoolKind::Zfs,
                format!("zfs-{name}"),
                format!("/share/{name}"),
                name,
            );
            pool.total_gb = parse_size_gb(fields[1]);
            Some(pool)
        })
        .collect()
}

/// `mount | grep -i usb`: `/dev/sdi1 on /share/external/USBDisk1 type ext4 (rw)`.
/// Only mount points with `USB` in them count.
pub fn parse_usb_mounts(output: &str) -> Vec<Pool> {
    output
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.trim().split_once(" on ")?;
            let mount_point = rest.split(' ').next()?;
            if !mount_point.contains("USB") {
                return None;
            }
            let device = mount_point
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown");
            Some(Pool::new(
                PoolKind::Usb,
                format!("usb-{device}"),
                mount_point.to_string(),
                device,
            ))
        })
        .collect()
}

/// Last line of `df -BG`: filesystem, size, used, available, use%, mount.
pub fn parse_df_line(output: &str) -> DiskUsage {
    let fields: Vec<&str> = output.trim().split_whitespace().collect();
    if fields.len() < 4 {
        return DiskUsage::default();
    }
    DiskUsage {
        total_gb: parse_size_gb(fields[1]),
        used_gb: parse_size_gb(fields[2]),
        free_gb: parse_size_gb(fields[3]),
    }
}
