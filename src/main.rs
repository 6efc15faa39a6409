use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use inquire::Confirm;

use nasvm::build_info::BuildInfo;
use nasvm::cli::{Cli, Command, ConfigCommand, ConnectionArgs, SnapshotCommand};
use nasvm::config::{self, HostConfig};
use nasvm::error::VmError;
use nasvm::logging;
use nasvm::orchestrator::{CloneStrategy, Orchestrator};
use nasvm::progress::{OutputMode, StepProgress};
use nasvm::remote::ssh::{SshConfig, SshSession};
use nasvm::storage::{self, Pool};
use nasvm::types::{SnapshotInfo, VmConfig, VmInfo, VmStats};
use nasvm::vm_state::Transition;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> miette::Result<()> {
    let Cli {
        connection,
        verbose,
        json,
        command,
    } = Cli::parse();

    logging::init(verbose);
    let build = BuildInfo::current();

    // Commands that never touch the NAS
    match command {
        Command::Version => {
            if json {
                println!("{}", to_json(&build)?);
            } else {
                println!("{build}");
            }
            return Ok(());
        }
        Command::Config { action } => return run_config(action, &connection).map_err(Into::into),
        command => {
            let host = resolve_host(&connection)?;
            let mode = OutputMode::detect(json);
            run_remote(&host, command, json, mode).await?;
        }
    }

    Ok(())
}

/// Stored default profile overridden by command-line flags, validated.
fn resolve_host(flags: &ConnectionArgs) -> Result<HostConfig, VmError> {
    let stored = config::load()?;
    let base = stored.host_config("").cloned().unwrap_or_default();
    let host = base.merge_with(&flags_as_host(flags)).with_defaults();
    host.validate().map_err(|e| match e {
        VmError::Validation { message } => VmError::Validation {
            message: format!("{message} (pass --host/--username or run `nasvm config set`)"),
        },
        other => other,
    })?;
    Ok(host)
}

fn flags_as_host(flags: &ConnectionArgs) -> HostConfig {
    HostConfig {
        host: flags.host.clone().unwrap_or_default(),
        username: flags.username.clone().unwrap_or_default(),
        port: flags.port.unwrap_or(0),
        keyfile: flags.keyfile.as_ref().map(|p| p.display().to_string()),
        password: None,
    }
}

/// Connect, run one command, and close the session whatever the outcome.
async fn run_remote(
    host: &HostConfig,
    command: Command,
    json: bool,
    mode: OutputMode,
) -> Result<(), VmError> {
    let ssh = SshConfig {
        host: host.host.clone(),
        port: host.port,
        username: host.username.clone(),
        keyfile: host.keyfile.as_ref().map(PathBuf::from),
        password: host.password.clone(),
        connect_timeout: CONNECT_TIMEOUT,
    };

    let mut progress = StepProgress::new(2, mode);
    let session = progress
        .run(&format!("Connecting to {}", host.host), async {
            let session = SshSession::connect(&ssh).await?;
            if let Err(e) = session.test_connection().await {
                session.close().await.ok();
                return Err(e);
            }
            Ok::<_, VmError>(session)
        })
        .await?;

    let result = match progress
        .run(
            "Locating hypervisor toolchain",
            Orchestrator::connect(&session),
        )
        .await
    {
        Ok(orch) => {
            progress.info(&format!("toolchain at {}", orch.virsh().root().path()));
            dispatch(&orch, command, json, mode).await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        tracing::debug!(class = ?e.class(), "command failed");
    }

    if let Err(e) = session.close().await {
        tracing::warn!("failed to close SSH session: {e}");
    }
    result
}

async fn dispatch(
    orch: &Orchestrator<'_, SshSession>,
    command: Command,
    json: bool,
    mode: OutputMode,
) -> Result<(), VmError> {
    match command {
        Command::Version | Command::Config { .. } => unreachable!("handled before connecting"),
        Command::List => {
            let vms = orch.list_detailed().await?;
            if json {
                println!("{}", to_json(&vms)?);
            } else {
                print_vm_table(&vms);
            }
        }
        Command::Create {
            name,
            memory,
            cpus,
            disk,
            iso,
        } => {
            let request = VmConfig {
                memory_mb: memory,
                cpus,
                disk_size: disk,
                disk_path: None,
                iso_path: iso,
            };
            let mut progress = StepProgress::new(1, mode);
            let created = progress
                .run(&format!("Creating VM '{name}'"), orch.create(&name, &request))
                .await?;
            if json {
                println!(
                    "{}",
                    to_json(&CreatedJson {
                        name: created.name,
                        pool: created.pool.name,
                        disk_path: created.disk_path,
                        iso_path: created.iso_path,
                    })?
                );
            } else {
                println!("VM '{name}' created.");
                println!("  Pool: {} ({})", created.pool.name, created.pool.path);
                println!("  Disk: {}", created.disk_path);
                if let Some(iso) = &created.iso_path {
                    println!("  ISO:  {iso} (attach it before first boot)");
                }
            }
        }
        Command::Start { name } => {
            let transition = orch.start(&name).await?;
            report(json, &name, "start", transition, "started", "is already running")?;
        }
        Command::Stop { name, force } => {
            let transition = orch.stop(&name, force).await?;
            let done = if force { "stopped" } else { "is shutting down" };
            report(json, &name, "stop", transition, done, "is already stopped")?;
        }
        Command::Delete { name, force } => {
            if !force && !confirm(&format!("Delete VM '{name}'? The disk image is kept."))? {
                return Err(VmError::Cancelled);
            }
            orch.delete(&name).await?;
            report(json, &name, "delete", Transition::Changed, "deleted", "")?;
        }
        Command::Status { name } => {
            let vm = orch.get(&name).await?;
            if json {
                println!("{}", to_json(&vm)?);
            } else {
                print_status(&vm);
            }
        }
        Command::Stats { name } => {
            let stats = orch.stats(&name).await?;
            if json {
                println!("{}", to_json(&stats)?);
            } else {
                print_stats(&name, &stats);
            }
        }
        Command::Snapshot { action } => run_snapshot(orch, action, json).await?,
        Command::Clone {
            source,
            target,
            linked,
        } => {
            let mut progress = StepProgress::new(1, mode);
            let strategy = progress
                .run(
                    &format!("Cloning '{source}' to '{target}'"),
                    orch.clone_vm(&source, &target, linked),
                )
                .await?;
            let strategy = match strategy {
                CloneStrategy::Direct => "direct",
                CloneStrategy::Manual => "manual",
            };
            if json {
                println!(
                    "{}",
                    to_json(&CloneJson {
                        source,
                        target,
                        strategy: strategy.to_string(),
                    })?
                );
            } else {
                println!("VM '{source}' cloned to '{target}' ({strategy} copy).");
            }
        }
        Command::Pools => {
            let pools = orch.storage().discover().await;
            let best = storage::select_best(&pools).ok().map(|p| p.path.clone());
            if json {
                let rows: Vec<PoolJson> = pools
                    .iter()
                    .map(|p| PoolJson::new(p, best.as_deref() == Some(p.path.as_str())))
                    .collect();
                println!("{}", to_json(&rows)?);
            } else {
                print_pools(&pools, best.as_deref());
            }
        }
    }
    Ok(())
}

async fn run_snapshot(
    orch: &Orchestrator<'_, SshSession>,
    action: SnapshotCommand,
    json: bool,
) -> Result<(), VmError> {
    match action {
        SnapshotCommand::Create {
            vm,
            snapshot,
            description,
        } => {
            orch.create_snapshot(&vm, &snapshot, description.as_deref())
                .await?;
            println!("Snapshot '{snapshot}' created for VM '{vm}'.");
        }
        SnapshotCommand::List { vm } => {
            let snapshots = orch.list_snapshots(&vm).await?;
            if json {
                println!("{}", to_json(&snapshots)?);
            } else {
                print_snapshot_table(&vm, &snapshots);
            }
        }
        SnapshotCommand::Restore {
            vm,
            snapshot,
            force,
        } => {
            let question = format!(
                "Restore VM '{vm}' to snapshot '{snapshot}'? Changes made since then are lost."
            );
            if !force && !confirm(&question)? {
                return Err(VmError::Cancelled);
            }
            orch.restore_snapshot(&vm, &snapshot).await?;
            println!("VM '{vm}' restored to snapshot '{snapshot}'.");
        }
        SnapshotCommand::Delete { vm, snapshot } => {
            orch.delete_snapshot(&vm, &snapshot).await?;
            println!("Snapshot '{snapshot}' deleted from VM '{vm}'.");
        }
        SnapshotCommand::Info { vm, snapshot } => {
            let info = orch.snapshot_info(&vm, &snapshot).await?;
            if json {
                println!("{}", to_json(&info)?);
            } else {
                print_snapshot_info(&vm, &info);
            }
        }
    }
    Ok(())
}

fn run_config(action: ConfigCommand, flags: &ConnectionArgs) -> Result<(), VmError> {
    match action {
        ConfigCommand::Set { name, default } => {
            let mut file = config::load()?;
            let existing = file.hosts.get(&name).cloned().unwrap_or_default();
            let host = existing.merge_with(&flags_as_host(flags)).with_defaults();
            host.validate()?;

            let first = file.hosts.is_empty();
            file.set_host_config(name.clone(), host);
            if default || first || file.default_host.is_empty() {
                file.set_default_host(name.clone());
            }
            config::save(&file)?;
            println!(
                "Saved profile '{name}' to {}",
                nasvm::paths::config_path().display()
            );
        }
        ConfigCommand::Show => {
            let file = config::load()?;
            if file.hosts.is_empty() {
                println!("No hosts configured. Run `nasvm config set --host <HOST> --username <USER>`.");
                return Ok(());
            }
            for name in file.list_hosts() {
                let Some(host) = file.hosts.get(name) else {
                    continue;
                };
                let marker = if name == file.default_host { " (default)" } else { "" };
                println!("{name}{marker}");
                println!("  host:     {}", host.host);
                println!("  username: {}", host.username);
                println!("  port:     {}", host.port);
                if let Some(keyfile) = &host.keyfile {
                    println!("  keyfile:  {keyfile}");
                }
                if host.password.as_deref().is_some_and(|p| !p.is_empty()) {
                    println!("  password: ********");
                }
            }
        }
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool, VmError> {
    Confirm::new(question)
        .with_default(false)
        .prompt()
        .map_err(map_inquire_err)
}

fn map_inquire_err(e: inquire::InquireError) -> VmError {
    match e {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            VmError::Cancelled
        }
        inquire::InquireError::NotTTY => VmError::Validation {
            message: "confirmation needs a terminal; pass --force to skip it".into(),
        },
        other => VmError::Validation {
            message: format!("prompt error: {other}"),
        },
    }
}

fn report(
    json: bool,
    name: &str,
    action: &str,
    transition: Transition,
    done: &str,
    unchanged: &str,
) -> Result<(), VmError> {
    let changed = transition == Transition::Changed;
    if json {
        println!(
            "{}",
            to_json(&ActionJson {
                vm: name.to_string(),
                action: action.to_string(),
                changed,
            })?
        );
    } else if changed {
        println!("VM '{name}' {done}.");
    } else {
        println!("VM '{name}' {unchanged}.");
    }
    Ok(())
}

// ── text output ─────────────────────────────────────────────────────

fn print_vm_table(vms: &[VmInfo]) {
    if vms.is_empty() {
        println!("No virtual machines found.");
        return;
    }
    println!("{:<6} {:<24} {:<12} {:>10} {:>5}", "ID", "NAME", "STATE", "MEMORY", "CPUS");
    for vm in vms {
        println!(
            "{:<6} {:<24} {:<12} {:>10} {:>5}",
            vm.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            vm.name,
            vm.state,
            or_dash(vm.memory_mb, |m| format!("{m} MB")),
            or_dash(vm.cpus, |c| c.to_string()),
        );
    }
}

fn print_status(vm: &VmInfo) {
    println!("VM '{}'", vm.name);
    println!("  State:  {}", vm.state);
    println!("  UUID:   {}", if vm.uuid.is_empty() { "-" } else { &vm.uuid });
    println!(
        "  ID:     {}",
        vm.id.map_or_else(|| "-".to_string(), |id| id.to_string())
    );
    println!("  Memory: {}", or_dash(vm.memory_mb, |m| format!("{m} MB")));
    println!("  CPUs:   {}", or_dash(vm.cpus, |c| c.to_string()));
}

fn print_stats(name: &str, stats: &VmStats) {
    println!("VM '{name}'");
    println!("  CPU time:      {:.2}s", stats.cpu_time_ns as f64 / 1e9);
    println!(
        "  Memory:        {} / {} KiB ({:.1}%)",
        stats.memory.used_kb, stats.memory.total_kb, stats.memory.percent
    );
    println!(
        "  Disk read:     {} bytes in {} requests",
        stats.block_io.read_bytes, stats.block_io.read_requests
    );
    println!(
        "  Disk write:    {} bytes in {} requests",
        stats.block_io.write_bytes, stats.block_io.write_requests
    );
    println!(
        "  Network rx/tx: {} / {} bytes ({} / {} packets)",
        stats.network.rx_bytes,
        stats.network.tx_bytes,
        stats.network.rx_packets,
        stats.network.tx_packets
    );
}

fn print_snapshot_table(vm: &str, snapshots: &[SnapshotInfo]) {
    if snapshots.is_empty() {
        println!("No snapshots found for VM '{vm}'.");
        return;
    }
    println!("  {:<24} {:<28} {}", "NAME", "CREATED", "STATE");
    for s in snapshots {
        let marker = if s.current { '*' } else { ' ' };
        println!("{marker} {:<24} {:<28} {}", s.name, s.creation_time, s.state);
    }
}

fn print_snapshot_info(vm: &str, info: &SnapshotInfo) {
    println!("Snapshot '{}' of VM '{vm}'", info.name);
    println!("  Created:     {}", info.creation_time);
    println!("  State:       {}", info.state);
    println!("  Current:     {}", if info.current { "yes" } else { "no" });
    println!("  Parent:      {}", info.parent.as_deref().unwrap_or("-"));
    println!("  Description: {}", info.description.as_deref().unwrap_or("-"));
}

fn print_pools(pools: &[Pool], best: Option<&str>) {
    if pools.is_empty() {
        println!("No storage pools found.");
        return;
    }
    println!(
        "  {:<20} {:<9} {:>8} {:>8} {:>8}  {}",
        "NAME", "TYPE", "TOTAL", "USED", "FREE", "PATH"
    );
    for p in pools {
        let marker = if best == Some(p.path.as_str()) { '*' } else { ' ' };
        println!(
            "{marker} {:<20} {:<9} {:>7}G {:>7}G {:>7}G  {}",
            p.name, p.kind.to_string(), p.total_gb, p.used_gb, p.free_gb, p.path
        );
    }
}

fn or_dash<T: Default + PartialEq>(value: T, render: impl FnOnce(T) -> String) -> String {
    if value == T::default() {
        "-".to_string()
    } else {
        render(value)
    }
}

// ── JSON output structs ─────────────────────────────────────────────

fn to_json<'a, T: facet::Facet<'a> + ?Sized>(value: &T) -> Result<String, VmError> {
    facet_json::to_string(value).map_err(|e| VmError::Output {
        message: e.to_string(),
    })
}

#[derive(facet::Facet)]
struct CreatedJson {
    name: String,
    pool: String,
    disk_path: String,
    iso_path: Option<String>,
}

#[derive(facet::Facet)]
struct ActionJson {
    vm: String,
    action: String,
    changed: bool,
}

#[derive(facet::Facet)]
struct CloneJson {
    source: String,
    target: String,
    strategy: String,
}

#[derive(facet::Facet)]
struct PoolJson {
    name: String,
    path: String,
    kind: String,
    total_gb: u64,
    used_gb: u64,
    free_gb: u64,
    available: bool,
    description: String,
    selected: bool,
}

impl PoolJson {
    fn new(pool: &Pool, selected: bool) -> Self {
        Self {
            name: pool.name.clone(),
            path: pool.path.clone(),
            kind: pool.kind.to_string(),
            total_gb: pool.total_gb,
            used_gb: pool.used_gb,
            free_gb: pool.free_gb,
            available: pool.available,
            description: pool.description.clone(),
            selected,
        }
    }
}
