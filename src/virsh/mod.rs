//! Typed access to virsh on the NAS.
//!
//! [`VirshClient`] resolves the toolchain root once, at construction, and
//! prefixes every hypervisor command with its environment. It performs no
//! state checks of its own; that is [`crate::orchestrator`]'s job.

pub mod command;
pub mod env;

use crate::domain_xml;
use crate::error::VmError;
use crate::parse;
use crate::paths;
use crate::remote::{RemoteExecutor, shell_escape};
use crate::types::{SnapshotDetails, SnapshotInfo, VmConfig, VmInfo, VmStats};
use command::{StatsGroup, VirshCommand};
use env::ToolchainRoot;

const XML_DELIMITER: &str = "NASVM_DOMAIN_XML";
const NO_CURRENT_SNAPSHOT: &str = "no current snapshot";

pub struct VirshClient<'a, E> {
    exec: &'a E,
    root: ToolchainRoot,
}

impl<'a, E: RemoteExecutor> VirshClient<'a, E> {
    /// Resolve and verify the toolchain, then hand back a client bound to it.
    pub async fn connect(exec: &'a E) -> Result<Self, VmError> {
        let root = env::resolve(exec).await?;
        Ok(Self { exec, root })
    }

    /// Bind to an already resolved root without probing.
    pub fn with_root(exec: &'a E, root: ToolchainRoot) -> Self {
        Self { exec, root }
    }

    pub fn root(&self) -> &ToolchainRoot {
        &self.root
    }

    pub fn executor(&self) -> &'a E {
        self.exec
    }

    /// Re-run the `virsh version` check against the cached root.
    pub async fn is_toolchain_available(&self) -> bool {
        env::verify(self.exec, &self.root).await.is_ok()
    }

    /// Run a command with the toolchain environment, outside of virsh.
    pub async fn run_tool(
        &self,
        command: &str,
        operation: impl FnOnce() -> String,
    ) -> Result<String, VmError> {
        self.exec
            .execute(&self.root.wrap(command))
            .await
            .map_err(|e| VmError::remote(operation(), e))
    }

    async fn run(
        &self,
        command: &VirshCommand<'_>,
        operation: impl FnOnce() -> String,
    ) -> Result<String, VmError> {
        let line = command.render();
        tracing::debug!(command = %line, "virsh");
        self.run_tool(&line, operation).await
    }

    // -- domains --

    pub async fn list_vms(&self) -> Result<Vec<VmInfo>, VmError> {
        let out = self
            .run(&VirshCommand::List, || "list VMs".into())
            .await?;
        Ok(parse::parse_vm_list(&out))
    }

    /// Exact name match in `virsh list --all`.
    pub async fn find_vm(&self, name: &str) -> Result<Option<VmInfo>, VmError> {
        Ok(self.list_vms().await?.into_iter().find(|vm| vm.name == name))
    }

    pub async fn get_vm(&self, name: &str) -> Result<VmInfo, VmError> {
        self.find_vm(name).await?.ok_or_else(|| VmError::VmNotFound {
            name: name.to_string(),
        })
    }

    /// [`Self::get_vm`] plus UUID, memory and CPU count. The extra lookups are
    /// best effort; a failure leaves the field empty or zero.
    pub async fn vm_details(&self, name: &str) -> Result<VmInfo, VmError> {
        let mut vm = self.get_vm(name).await?;
        self.enrich(&mut vm).await;
        Ok(vm)
    }

    /// Fill in UUID, memory and CPU count on a summary row.
    pub async fn enrich(&self, vm: &mut VmInfo) {
        let name = vm.name.as_str();
        match self
            .run(&VirshCommand::DomUuid { name }, || format!("get UUID of VM '{name}'"))
            .await
        {
            Ok(out) => vm.uuid = out.trim().to_string(),
            Err(e) => tracing::debug!(vm = name, "domuuid failed: {e}"),
        }
        match self
            .run(&VirshCommand::DomInfo { name }, || format!("get info of VM '{name}'"))
            .await
        {
            Ok(out) => {
                let info = parse::parse_domain_info(&out);
                vm.memory_mb = info.memory_mb;
                vm.cpus = info.cpus;
            }
            Err(e) => tracing::debug!(vm = name, "dominfo failed: {e}"),
        }
    }

    pub async fn start_vm(&self, name: &str) -> Result<(), VmError> {
        self.run(&VirshCommand::Start { name }, || format!("start VM '{name}'"))
            .await
            .map(drop)
    }

    /// `destroy` when `force`, otherwise a graceful `shutdown` that returns
    /// as soon as the guest has been asked to power off.
    pub async fn stop_vm(&self, name: &str, force: bool) -> Result<(), VmError> {
        self.run(&VirshCommand::stop(name, force), || format!("stop VM '{name}'"))
            .await
            .map(drop)
    }

    /// Force-stop, then undefine. The stop is allowed to fail since the VM
    /// may not be running.
    pub async fn delete_vm(&self, name: &str) -> Result<(), VmError> {
        if let Err(e) = self.stop_vm(name, true).await {
            tracing::warn!(vm = name, "force stop before delete failed: {e}");
        }
        self.run(&VirshCommand::Undefine { name }, || format!("delete VM '{name}'"))
            .await
            .map(drop)
    }

    /// Render the domain XML, stage it under `/tmp`, define it and remove the
    /// staged file.
    pub async fn define_vm(&self, name: &str, config: &VmConfig) -> Result<(), VmError> {
        let xml = domain_xml::generate_domain_xml(name, config, &self.root)?;
        self.define_xml(name, &xml).await
    }

    /// Define from an already rendered document.
    pub async fn define_xml(&self, name: &str, xml: &str) -> Result<(), VmError> {
        let xml_path = paths::domain_xml_path(name);
        let quoted = shell_escape(&xml_path);

        let write = format!("cat > {quoted} << '{XML_DELIMITER}'\n{xml}\n{XML_DELIMITER}");
        self.exec
            .execute(&write)
            .await
            .map_err(|e| VmError::remote(format!("write domain XML for VM '{name}'"), e))?;

        let defined = self
            .run(&VirshCommand::Define { xml_path: &xml_path }, || {
                format!("define VM '{name}'")
            })
            .await;

        if let Err(e) = self.exec.execute(&format!("rm -f {quoted}")).await {
            tracing::warn!(path = xml_path, "failed to remove staged domain XML: {e}");
        }

        defined.map(drop)
    }

    // -- snapshots --

    pub async fn create_snapshot(
        &self,
        vm: &str,
        snapshot: &str,
        description: Option<&str>,
    ) -> Result<(), VmError> {
        let command = VirshCommand::SnapshotCreateAs {
            vm,
            snapshot,
            description,
        };
        self.run(&command, || {
            format!("create snapshot '{snapshot}' for VM '{vm}'")
        })
        .await
        .map(drop)
    }

    /// Snapshots as listed, without the current flag or details.
    pub async fn list_snapshots(&self, vm: &str) -> Result<Vec<SnapshotInfo>, VmError> {
        let out = self
            .run(&VirshCommand::SnapshotList { vm }, || {
                format!("list snapshots for VM '{vm}'")
            })
            .await?;
        Ok(parse::parse_snapshot_list(&out))
    }

    /// Name of the current snapshot, `None` if the VM has none.
    pub async fn current_snapshot(&self, vm: &str) -> Result<Option<String>, VmError> {
        let command = VirshCommand::SnapshotCurrent { vm }.render();
        match self.exec.execute(&self.root.wrap(&command)).await {
            Ok(out) => {
                let name = out.trim();
                Ok((!name.is_empty()).then(|| name.to_string()))
            }
            Err(e) if e.output().to_lowercase().contains(NO_CURRENT_SNAPSHOT) => Ok(None),
            Err(e) => Err(VmError::remote(
                format!("get current snapshot for VM '{vm}'"),
                e,
            )),
        }
    }

    pub async fn snapshot_details(
        &self,
        vm: &str,
        snapshot: &str,
    ) -> Result<SnapshotDetails, VmError> {
        let out = self
            .run(&VirshCommand::SnapshotInfo { vm, snapshot }, || {
                format!("get info of snapshot '{snapshot}' for VM '{vm}'")
            })
            .await?;
        Ok(parse::parse_snapshot_details(&out))
    }

    pub async fn restore_snapshot(&self, vm: &str, snapshot: &str) -> Result<(), VmError> {
        self.run(&VirshCommand::SnapshotRevert { vm, snapshot }, || {
            format!("restore VM '{vm}' to snapshot '{snapshot}'")
        })
        .await
        .map(drop)
    }

    pub async fn delete_snapshot(&self, vm: &str, snapshot: &str) -> Result<(), VmError> {
        self.run(&VirshCommand::SnapshotDelete { vm, snapshot }, || {
            format!("delete snapshot '{snapshot}' for VM '{vm}'")
        })
        .await
        .map(drop)
    }

    // -- statistics --

    /// One `domstats` call per metric family. A family whose command fails
    /// reads as zero; the others are still collected.
    pub async fn vm_stats(&self, name: &str) -> VmStats {
        let mut stats = VmStats::default();
        if let Some(out) = self.domstats(name, StatsGroup::Cpu).await {
            stats.cpu_time_ns = parse::parse_cpu_time(&out);
        }
        if let Some(out) = self.domstats(name, StatsGroup::Balloon).await {
            stats.memory = parse::parse_memory_stats(&out);
        }
        if let Some(out) = self.domstats(name, StatsGroup::Block).await {
            stats.block_io = parse::parse_block_stats(&out);
        }
        if let Some(out) = self.domstats(name, StatsGroup::Interface).await {
            stats.network = parse::parse_network_stats(&out);
        }
        stats
    }

    async fn domstats(&self, name: &str, group: StatsGroup) -> Option<String> {
        self.run(&VirshCommand::DomStats { name, group }, || {
            format!("read {group:?} stats of VM '{name}'")
        })
        .await
        .inspect_err(|e| tracing::debug!(vm = name, ?group, "domstats failed: {e}"))
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::ScriptedExecutor;

    fn client(exec: &ScriptedExecutor) -> VirshClient<'_, ScriptedExecutor> {
        VirshClient::with_root(exec, ToolchainRoot::new("/QVS"))
    }

    #[tokio::test]
    async fn commands_carry_the_environment_prefix() {
        let exec = ScriptedExecutor::new().ok(" Id Name State\n---\n 1 web running\n");
        let vms = client(&exec).list_vms().await.unwrap();
        assert_eq!(vms.len(), 1);
        let commands = exec.commands();
        assert!(commands[0].starts_with("export LD_LIBRARY_PATH=/QVS/usr/lib"));
        assert!(commands[0].ends_with("&& virsh list --all"));
    }

    #[tokio::test]
    async fn toolchain_availability_is_rechecked() {
        let exec = ScriptedExecutor::new()
            .ok("virsh_ready\n")
            .fail("virsh: error while loading shared libraries");
        let client = client(&exec);
        assert!(client.is_toolchain_available().await);
        assert!(!client.is_toolchain_available().await);
    }

    #[tokio::test]
    async fn get_vm_not_found() {
        let exec = ScriptedExecutor::new().ok(" Id Name State\n---\n 1 web running\n");
        let err = client(&exec).get_vm("db").await.unwrap_err();
        assert!(matches!(err, VmError::VmNotFound { name } if name == "db"));
    }

    #[tokio::test]
    async fn details_tolerate_failed_lookups() {
        let exec = ScriptedExecutor::new()
            .ok(" Id Name State\n---\n - db shut off\n")
            .fail("error: failed to get domain uuid")
            .ok("CPU(s): 2\nMax memory: 2097152 KiB\n");
        let vm = client(&exec).vm_details("db").await.unwrap();
        assert_eq!(vm.uuid, "");
        assert_eq!(vm.memory_mb, 2048);
        assert_eq!(vm.cpus, 2);
    }

    #[tokio::test]
    async fn delete_continues_when_force_stop_fails() {
        let exec = ScriptedExecutor::new()
            .fail("error: domain is not running")
            .ok("Domain 'db' has been undefined\n");
        client(&exec).delete_vm("db").await.unwrap();
        let commands = exec.commands();
        assert!(commands[0].ends_with("virsh destroy 'db'"));
        assert!(commands[1].ends_with("virsh undefine 'db'"));
    }

    #[tokio::test]
    async fn define_stages_and_cleans_up() {
        let exec = ScriptedExecutor::new()
            .ok("")
            .ok("Domain 'web' defined from /tmp/web.xml\n")
            .fail("rm: cannot remove");
        let config = VmConfig {
            memory_mb: 1024,
            cpus: 1,
            disk_size: "10G".into(),
            disk_path: Some("/share/tank/.vm-disks/web.qcow2".into()),
            iso_path: None,
        };
        client(&exec).define_vm("web", &config).await.unwrap();

        let commands = exec.commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].starts_with("cat > '/tmp/web.xml' << 'NASVM_DOMAIN_XML'\n<domain"));
        assert!(commands[0].ends_with("</domain>\n\nNASVM_DOMAIN_XML"));
        assert!(commands[1].ends_with("virsh define '/tmp/web.xml'"));
        assert_eq!(commands[2], "rm -f '/tmp/web.xml'");
    }

    #[tokio::test]
    async fn define_failure_still_cleans_up() {
        let exec = ScriptedExecutor::new()
            .ok("")
            .fail("error: operation failed: domain 'web' already exists")
            .ok("");
        let config = VmConfig {
            memory_mb: 1024,
            cpus: 1,
            disk_size: "10G".into(),
            disk_path: None,
            iso_path: None,
        };
        let err = client(&exec).define_vm("web", &config).await.unwrap_err();
        match err {
            VmError::RemoteCommand { operation, output, .. } => {
                assert_eq!(operation, "define VM 'web'");
                assert!(output.contains("already exists"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(exec.commands().len(), 3);
    }

    #[tokio::test]
    async fn current_snapshot_absent() {
        let exec = ScriptedExecutor::new()
            .fail("error: domain 'web' has no current snapshot");
        assert_eq!(client(&exec).current_snapshot("web").await.unwrap(), None);

        let exec = ScriptedExecutor::new().ok("pre-update\n");
        assert_eq!(
            client(&exec).current_snapshot("web").await.unwrap().as_deref(),
            Some("pre-update")
        );

        let exec = ScriptedExecutor::new().fail("error: failed to connect");
        assert!(client(&exec).current_snapshot("web").await.is_err());
    }

    #[tokio::test]
    async fn stats_degrade_per_family() {
        let exec = ScriptedExecutor::new()
            .ok("Domain: 'web'\n  cpu.time=500\n")
            .fail("error: balloon not supported")
            .ok("  block.0.rd.bytes=10\n  block.1.rd.bytes=5\n")
            .ok("  net.0.tx.pkts=3\n");
        let stats = client(&exec).vm_stats("web").await;
        assert_eq!(stats.cpu_time_ns, 500);
        assert_eq!(stats.memory.total_kb, 0);
        assert_eq!(stats.block_io.read_bytes, 15);
        assert_eq!(stats.network.tx_packets, 3);
        assert_eq!(exec.commands().len(), 4);
    }
}
