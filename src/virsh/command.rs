use crate::remote::shell_escape;

/// `virsh domstats` selector flags we read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsGroup {
    Cpu,
    Balloon,
    Block,
    Interface,
}

impl StatsGroup {
    fn flag(self) -> &'static str {
        match self {
            StatsGroup::Cpu => "--cpu-total",
            StatsGroup::Balloon => "--balloon",
            StatsGroup::Block => "--block",
            StatsGroup::Interface => "--interface",
        }
    }
}

/// A virsh invocation. Rendering quotes every caller-supplied value, so names
/// with spaces or quotes reach virsh as a single argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirshCommand<'a> {
    Version,
    List,
    DomUuid { name: &'a str },
    DomInfo { name: &'a str },
    Start { name: &'a str },
    Shutdown { name: &'a str },
    Destroy { name: &'a str },
    Define { xml_path: &'a str },
    Undefine { name: &'a str },
    SnapshotCreateAs {
        vm: &'a str,
        snapshot: &'a str,
        description: Option<&'a str>,
    },
    SnapshotList { vm: &'a str },
    SnapshotInfo { vm: &'a str, snapshot: &'a str },
    SnapshotCurrent { vm: &'a str },
    SnapshotRevert { vm: &'a str, snapshot: &'a str },
    SnapshotDelete { vm: &'a str, snapshot: &'a str },
    DomStats { name: &'a str, group: StatsGroup },
}

impl<'a> VirshCommand<'a> {
    /// `destroy` when forced, `shutdown` otherwise.
    pub fn stop(name: &'a str, force: bool) -> Self {
        if force {
            VirshCommand::Destroy { name }
        } else {
            VirshCommand::Shutdown { name }
        }
    }

    /// The command line, without the toolchain environment prefix.
    pub fn render(&self) -> String {
        let q = shell_escape;
        match self {
            VirshCommand::Version => "virsh version".to_string(),
            VirshCommand::List => "virsh list --all".to_string(),
            VirshCommand::DomUuid { name } => format!("virsh domuuid {}", q(name)),
            VirshCommand::DomInfo { name } => format!("virsh dominfo {}", q(name)),
            VirshCommand::Start { name } => format!("virsh start {}", q(name)),
            VirshCommand::Shutdown { name } => format!("virsh shutdown {}", q(name)),
            VirshCommand::Destroy { name } => format!("virsh destroy {}", q(name)),
            VirshCommand::Define { xml_path } => format!("virsh define {}", q(xml_path)),
            VirshCommand::Undefine { name } => format!("virsh undefine {}", q(name)),
            VirshCommand::SnapshotCreateAs {
                vm,
                snapshot,
                description,
            } => {
                let mut cmd = format!("virsh snapshot-create-as {} {}", q(vm), q(snapshot));
                if let Some(desc) = description.filter(|d| !d.is_empty()) {
                    cmd.push_str(" --description ");
                    cmd.push_str(&q(desc));
                }
                cmd
            }
            VirshCommand::SnapshotList { vm } => format!("virsh snapshot-list {}", q(vm)),
            VirshCommand::SnapshotInfo { vm, snapshot } => {
                format!("virsh snapshot-info {} {}", q(vm), q(snapshot))
            }
            VirshCommand::SnapshotCurrent { vm } => {
                format!("virsh snapshot-current {} --name", q(vm))
            }
            VirshCommand::SnapshotRevert { vm, snapshot } => {
                format!("virsh snapshot-revert {} {}", q(vm), q(snapshot))
            }
            VirshCommand::SnapshotDelete { vm, snapshot } => {
                format!("virsh snapshot-delete {} {}", q(vm), q(snapshot))
            }
            VirshCommand::DomStats { name, group } => {
                format!("virsh domstats {} {}", q(name), group.flag())
            }
        }
    }
}

/// `virt-clone` full copy with automatically named disks.
pub fn virt_clone(source: &str, target: &str) -> String {
    format!(
        "virt-clone --original {} --name {} --auto-clone",
        shell_escape(source),
        shell_escape(target)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_commands() {
        assert_eq!(VirshCommand::List.render(), "virsh list --all");
        assert_eq!(
            VirshCommand::Start { name: "alpha" }.render(),
            "virsh start 'alpha'"
        );
        assert_eq!(VirshCommand::stop("alpha", false).render(), "virsh shutdown 'alpha'");
        assert_eq!(VirshCommand::stop("alpha", true).render(), "virsh destroy 'alpha'");
        assert_eq!(
            VirshCommand::Define {
                xml_path: "/tmp/alpha.xml"
            }
            .render(),
            "virsh define '/tmp/alpha.xml'"
        );
    }

    #[test]
    fn snapshot_description_is_optional() {
        let without = VirshCommand::SnapshotCreateAs {
            vm: "alpha",
            snapshot: "s1",
            description: None,
        };
        assert_eq!(without.render(), "virsh snapshot-create-as 'alpha' 's1'");

        let with = VirshCommand::SnapshotCreateAs {
            vm: "alpha",
            snapshot: "s1",
            description: Some("before upgrade"),
        };
        assert_eq!(
            with.render(),
            "virsh snapshot-create-as 'alpha' 's1' --description 'before upgrade'"
        );
    }

    #[test]
    fn names_with_quotes_stay_one_argument() {
        assert_eq!(
            VirshCommand::Undefine { name: "bob's vm" }.render(),
            "virsh undefine 'bob'\\''s vm'"
        );
    }

    #[test]
    fn domstats_selectors() {
        assert_eq!(
            VirshCommand::DomStats {
                name: "alpha",
                group: StatsGroup::Balloon
            }
            .render(),
            "virsh domstats 'alpha' --balloon"
        );
        assert_eq!(
            VirshCommand::SnapshotCurrent { vm: "alpha" }.render(),
            "virsh snapshot-current 'alpha' --name"
        );
    }

    #[test]
    fn clone_command() {
        assert_eq!(
            virt_clone("base", "copy"),
            "virt-clone --original 'base' --name 'copy' --auto-clone"
        );
    }
}
