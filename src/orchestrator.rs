//! VM operations with their existence and state guards.
//!
//! Every operation reads the current state from the NAS first and either
//! fully succeeds or returns an error. Nothing is retried.

use crate::domain_xml;
use crate::error::VmError;
use crate::remote::RemoteExecutor;
use crate::storage::{Pool, StorageManager, disk_path_for};
use crate::types::{SnapshotInfo, VmConfig, VmInfo, VmStats};
use crate::util::parse_disk_size;
use crate::virsh::VirshClient;
use crate::virsh::command::virt_clone;
use crate::vm_state::{Transition, VmState};

/// Disk size for the manual clone strategy, which cannot size from the source.
pub const CLONE_DISK_SIZE: &str = "20G";
/// Used when the source's profile could not be read during a manual clone.
pub const FALLBACK_MEMORY_MB: u64 = 2048;
pub const FALLBACK_CPUS: u32 = 2;

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedVm {
    pub name: String,
    pub pool: Pool,
    pub disk_path: String,
    pub iso_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStrategy {
    /// `virt-clone --auto-clone`: full copy including disks.
    Direct,
    /// New VM with the source's memory and CPU profile and a blank disk.
    Manual,
}

pub struct Orchestrator<'a, E> {
    virsh: VirshClient<'a, E>,
    storage: StorageManager<'a, E>,
}

impl<'a, E: RemoteExecutor> Orchestrator<'a, E> {
    /// Resolve the toolchain on `exec` and build an orchestrator on top of it.
    pub async fn connect(exec: &'a E) -> Result<Self, VmError> {
        Ok(Self::new(VirshClient::connect(exec).await?))
    }

    pub fn new(virsh: VirshClient<'a, E>) -> Self {
        let storage = StorageManager::new(virsh.executor());
        Self { virsh, storage }
    }

    pub fn virsh(&self) -> &VirshClient<'a, E> {
        &self.virsh
    }

    pub fn storage(&self) -> &StorageManager<'a, E> {
        &self.storage
    }

    pub async fn state(&self, name: &str) -> Result<VmState, VmError> {
        Ok(VmState::detect(self.virsh.find_vm(name).await?.as_ref()))
    }

    /// Every VM with UUID, memory and CPU count filled in where readable.
    pub async fn list_detailed(&self) -> Result<Vec<VmInfo>, VmError> {
        let mut vms = self.virsh.list_vms().await?;
        for vm in &mut vms {
            self.virsh.enrich(vm).await;
        }
        Ok(vms)
    }

    pub async fn get(&self, name: &str) -> Result<VmInfo, VmError> {
        self.virsh.vm_details(name).await
    }

    // -- lifecycle --

    /// Pick a pool, create the disk, define the domain.
    ///
    /// The domain XML is rendered before anything is written on the NAS, so an
    /// unusable request fails without leaving a disk image behind. A failed
    /// disk creation stops before `define`.
    pub async fn create(&self, name: &str, request: &VmConfig) -> Result<CreatedVm, VmError> {
        validate_vm_name(name)?;
        parse_disk_size(&request.disk_size)?;

        if self.state(name).await?.exists() {
            return Err(VmError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let pool = self.storage.best_pool().await?;
        tracing::info!(vm = name, pool = pool.name, "selected storage pool");

        let disk_path = disk_path_for(&pool, name);
        let config = VmConfig {
            disk_path: Some(disk_path.clone()),
            ..request.clone()
        };
        let xml = domain_xml::generate_domain_xml(name, &config, self.virsh.root())?;

        self.storage.ensure_disk_dir(&pool).await;
        self.storage
            .create_disk(self.virsh.root(), &disk_path, &config.disk_size)
            .await?;
        self.virsh.define_xml(name, &xml).await?;

        tracing::info!(vm = name, disk_path, "VM defined");
        Ok(CreatedVm {
            name: name.to_string(),
            pool,
            disk_path,
            iso_path: request.iso_path.clone(),
        })
    }

    pub async fn start(&self, name: &str) -> Result<Transition, VmError> {
        match self.state(name).await? {
            VmState::Undefined => Err(not_found(name)),
            VmState::Running => {
                tracing::debug!(vm = name, "already running");
                Ok(Transition::AlreadyThere)
            }
            VmState::Stopped => {
                self.virsh.start_vm(name).await?;
                Ok(Transition::Changed)
            }
        }
    }

    pub async fn stop(&self, name: &str, force: bool) -> Result<Transition, VmError> {
        match self.state(name).await? {
            VmState::Undefined => Err(not_found(name)),
            VmState::Stopped => {
                tracing::debug!(vm = name, "already stopped");
                Ok(Transition::AlreadyThere)
            }
            VmState::Running => {
                self.virsh.stop_vm(name, force).await?;
                Ok(Transition::Changed)
            }
        }
    }

    /// Force-stop and undefine. The disk image stays where it is.
    pub async fn delete(&self, name: &str) -> Result<(), VmError> {
        if !self.state(name).await?.exists() {
            return Err(not_found(name));
        }
        self.virsh.delete_vm(name).await
    }

    // -- snapshots --

    pub async fn create_snapshot(
        &self,
        vm: &str,
        snapshot: &str,
        description: Option<&str>,
    ) -> Result<(), VmError> {
        validate_snapshot_name(snapshot)?;
        self.require_vm(vm).await?;
        self.virsh.create_snapshot(vm, snapshot, description).await
    }

    /// Snapshots with the current one flagged.
    pub async fn list_snapshots(&self, vm: &str) -> Result<Vec<SnapshotInfo>, VmError> {
        self.require_vm(vm).await?;
        let mut snapshots = self.virsh.list_snapshots(vm).await?;
        let current = self
            .virsh
            .current_snapshot(vm)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(vm, "snapshot-current failed: {e}");
                None
            });
        for snapshot in &mut snapshots {
            snapshot.current = current.as_deref() == Some(snapshot.name.as_str());
        }
        Ok(snapshots)
    }

    /// One snapshot with parent, description and current flag.
    pub async fn snapshot_info(&self, vm: &str, snapshot: &str) -> Result<SnapshotInfo, VmError> {
        let mut info = self
            .list_snapshots(vm)
            .await?
            .into_iter()
            .find(|s| s.name == snapshot)
            .ok_or_else(|| snapshot_not_found(vm, snapshot))?;

        match self.virsh.snapshot_details(vm, snapshot).await {
            Ok(details) => {
                info.parent = details.parent;
                info.description = details.description;
            }
            Err(e) => tracing::debug!(vm, snapshot, "snapshot-info failed: {e}"),
        }
        Ok(info)
    }

    /// Revert to `snapshot`. Everything written after it is lost.
    pub async fn restore_snapshot(&self, vm: &str, snapshot: &str) -> Result<(), VmError> {
        self.require_vm(vm).await?;
        let exists = self
            .virsh
            .list_snapshots(vm)
            .await?
            .iter()
            .any(|s| s.name == snapshot);
        if !exists {
            return Err(snapshot_not_found(vm, snapshot));
        }
        self.virsh.restore_snapshot(vm, snapshot).await
    }

    pub async fn delete_snapshot(&self, vm: &str, snapshot: &str) -> Result<(), VmError> {
        self.require_vm(vm).await?;
        self.virsh.delete_snapshot(vm, snapshot).await
    }

    // -- clone --

    /// Copy `source` to a new VM named `target`.
    ///
    /// Tries `virt-clone` first and falls back to [`CloneStrategy::Manual`]
    /// only when the tool is not installed. Any other `virt-clone` failure is
    /// returned as is. `linked` goes straight to the manual strategy; there is
    /// no backing-file clone.
    pub async fn clone_vm(
        &self,
        source: &str,
        target: &str,
        linked: bool,
    ) -> Result<CloneStrategy, VmError> {
        validate_vm_name(target)?;
        let vms = self.virsh.list_vms().await?;
        if !vms.iter().any(|vm| vm.name == source) {
            return Err(not_found(source));
        }
        if vms.iter().any(|vm| vm.name == target) {
            return Err(VmError::AlreadyExists {
                name: target.to_string(),
            });
        }

        if !linked {
            let command = virt_clone(source, target);
            match self
                .virsh
                .run_tool(&command, || format!("clone VM '{source}' to '{target}'"))
                .await
            {
                Ok(out) => {
                    let lower = out.to_lowercase();
                    if lower.contains("error") || lower.contains("failed") {
                        return Err(VmError::RemoteOutput {
                            operation: "virt-clone".into(),
                            output: out.trim().to_string(),
                        });
                    }
                    return Ok(CloneStrategy::Direct);
                }
                Err(VmError::RemoteCommand { source: e, .. }) if e.is_command_not_found() => {
                    tracing::info!(source, target, "virt-clone not installed, cloning manually");
                }
                Err(e) => return Err(e),
            }
        }

        self.manual_clone(source, target).await?;
        Ok(CloneStrategy::Manual)
    }

    async fn manual_clone(&self, source: &str, target: &str) -> Result<(), VmError> {
        let source_vm = self.virsh.vm_details(source).await?;
        let was_running = source_vm.is_running();

        if was_running {
            self.virsh.stop_vm(source, false).await?;
        }

        let request = VmConfig {
            memory_mb: nonzero_or(source_vm.memory_mb, FALLBACK_MEMORY_MB),
            cpus: nonzero_or(source_vm.cpus, FALLBACK_CPUS),
            disk_size: CLONE_DISK_SIZE.to_string(),
            disk_path: None,
            iso_path: None,
        };
        let created = self.create(target, &request).await;

        if was_running {
            let restarted = self.virsh.start_vm(source).await;
            if let Err(e) = &restarted {
                tracing::warn!(vm = source, "failed to restart source after clone: {e}");
            }
            created?;
            return restarted;
        }

        created.map(drop)
    }

    // -- statistics --

    /// Point-in-time counters. The VM must exist; individual metric families
    /// that can't be read come back as zero.
    pub async fn stats(&self, name: &str) -> Result<VmStats, VmError> {
        self.require_vm(name).await?;
        Ok(self.virsh.vm_stats(name).await)
    }

    async fn require_vm(&self, name: &str) -> Result<(), VmError> {
        if self.state(name).await?.exists() {
            Ok(())
        } else {
            Err(not_found(name))
        }
    }
}

/// Names must be a single shell-safe token: `virsh list` output is split on
/// whitespace and the name doubles as a file name on the NAS.
pub fn validate_vm_name(name: &str) -> Result<(), VmError> {
    validate_token("VM", name)
}

/// Same rule as VM names: `virsh snapshot-list` rows are split on whitespace
/// with the name as the first token.
pub fn validate_snapshot_name(name: &str) -> Result<(), VmError> {
    validate_token("snapshot", name)
}

fn validate_token(kind: &str, name: &str) -> Result<(), VmError> {
    let invalid = |message: String| Err(VmError::Validation { message });
    if name.is_empty() {
        return invalid(format!("{kind} name cannot be empty"));
    }
    if name.starts_with('-') {
        return invalid(format!("{kind} name '{name}' cannot start with '-'"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return invalid(format!("{kind} name '{name}' contains invalid character {c:?}"));
    }
    Ok(())
}

fn nonzero_or<T: PartialEq + Default>(value: T, fallback: T) -> T {
    if value == T::default() {
        fallback
    } else {
        value
    }
}

fn not_found(name: &str) -> VmError {
    VmError::VmNotFound {
        name: name.to_string(),
    }
}

fn snapshot_not_found(vm: &str, snapshot: &str) -> VmError {
    VmError::SnapshotNotFound {
        vm: vm.to_string(),
        snapshot: snapshot.to_string(),
    }
}
