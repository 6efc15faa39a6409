use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "nasvm",
    about = "Manage virtual machines on NAS appliances over SSH",
    disable_version_flag = true
)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for the stored host profile.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// NAS hostname or IP address
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// SSH username
    #[arg(short, long, global = true)]
    pub username: Option<String>,

    /// SSH port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// SSH private key file
    #[arg(short, long, global = true)]
    pub keyfile: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all virtual machines
    List,

    /// Create a new virtual machine
    Create {
        name: String,

        /// Memory in MB
        #[arg(long, default_value_t = 2048)]
        memory: u64,

        /// Number of virtual CPUs
        #[arg(long, default_value_t = 2)]
        cpus: u32,

        /// Disk size (e.g. 20G or 1.5G)
        #[arg(long, default_value = "20G")]
        disk: String,

        /// Installation ISO on the NAS
        #[arg(long)]
        iso: Option<String>,
    },

    /// Start a virtual machine
    Start { name: String },

    /// Stop a virtual machine
    Stop {
        name: String,

        /// Power off immediately instead of asking the guest to shut down
        #[arg(short, long)]
        force: bool,
    },

    /// Delete a virtual machine (the disk image is kept)
    Delete {
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Show the state and configuration of a virtual machine
    Status { name: String },

    /// Show resource counters of a virtual machine
    Stats { name: String },

    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommand,
    },

    /// Clone a virtual machine
    Clone {
        source: String,
        target: String,

        /// Request a linked clone (currently a full copy)
        #[arg(long)]
        linked: bool,
    },

    /// Show storage pools on the NAS
    Pools,

    /// Manage stored connection profiles
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Create a snapshot
    Create {
        vm: String,
        snapshot: String,

        /// Free-form description stored with the snapshot
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List snapshots of a VM
    List { vm: String },

    /// Revert a VM to a snapshot
    Restore {
        vm: String,
        snapshot: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Delete a snapshot
    Delete { vm: String, snapshot: String },

    /// Show details of one snapshot
    Info { vm: String, snapshot: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Store a connection profile
    Set {
        /// Profile name; the first profile becomes the default
        #[arg(long, default_value = "default")]
        name: String,

        /// Make this profile the default
        #[arg(long)]
        default: bool,
    },

    /// Print stored profiles (passwords are hidden)
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["nasvm", "start", "web", "-H", "nas.local", "--json"]);
        assert_eq!(cli.connection.host.as_deref(), Some("nas.local"));
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Start { name } if name == "web"));
    }

    #[test]
    fn create_defaults() {
        let cli = Cli::parse_from(["nasvm", "create", "web"]);
        match cli.command {
            Command::Create {
                memory, cpus, disk, iso, ..
            } => {
                assert_eq!(memory, 2048);
                assert_eq!(cpus, 2);
                assert_eq!(disk, "20G");
                assert!(iso.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
