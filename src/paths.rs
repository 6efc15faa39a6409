use std::path::PathBuf;

/// Local config directory: `~/.nasvm/`
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nasvm")
}

/// Local config file: `~/.nasvm/config.yaml`
pub fn config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

// Remote paths below are POSIX strings on the NAS, not local paths.

/// Where disk images live inside a pool: `<pool>/.vm-disks`
pub fn disk_dir(pool_path: &str) -> String {
    format!("{}/.vm-disks", pool_path.trim_end_matches('/'))
}

/// Disk image of a VM: `<pool>/.vm-disks/<name>.qcow2`
pub fn disk_path(pool_path: &str, vm_name: &str) -> String {
    format!("{}/{vm_name}.qcow2", disk_dir(pool_path))
}

/// Scratch file for a domain definition before `virsh define`.
pub fn domain_xml_path(vm_name: &str) -> String {
    format!("/tmp/{vm_name}.xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_path_layout() {
        assert_eq!(
            disk_path("/share/CACHEDEV1_DATA", "alpha"),
            "/share/CACHEDEV1_DATA/.vm-disks/alpha.qcow2"
        );
        assert_eq!(disk_path("/share/tank/", "b"), "/share/tank/.vm-disks/b.qcow2");
    }

    #[test]
    fn config_path_under_home() {
        assert!(config_path().ends_with(".nasvm/config.yaml"));
    }
}
