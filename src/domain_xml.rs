use crate::error::VmError;
use crate::types::VmConfig;
use crate::virsh::env::ToolchainRoot;

const MACHINE: &str = "pc-i440fx-2.3";

/// Generate libvirt domain XML for a new VM.
///
/// Plain QEMU emulation on a conservative i440fx machine so the definition
/// works on every appliance generation. One qcow2 disk (when `disk_path` is
/// set) and one user-mode virtio NIC.
pub fn generate_domain_xml(
    name: &str,
    config: &VmConfig,
    root: &ToolchainRoot,
) -> Result<String, VmError> {
    let invalid = |message: &str| VmError::DomainXml {
        name: name.to_string(),
        message: message.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("name contains control characters"));
    }
    if config.memory_mb == 0 {
        return Err(invalid("memory must be greater than zero"));
    }
    if config.cpus == 0 {
        return Err(invalid("CPU count must be greater than zero"));
    }
    let memory_kib = config
        .memory_mb
        .checked_mul(1024)
        .ok_or_else(|| invalid("memory size overflows"))?;

    let name = xml_escape(name);
    let cpus = config.cpus;
    let emulator = xml_escape(&root.emulator());
    let disk = match config.disk_path.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => format!(
            r#"    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
"#,
            xml_escape(path)
        ),
        None => String::new(),
    };

    Ok(format!(
        r#"<domain type='qemu'>
  <name>{name}</name>
  <memory unit='KiB'>{memory_kib}</memory>
  <vcpu placement='static'>{cpus}</vcpu>
  <os>
    <type arch='x86_64' machine='{MACHINE}'>hvm</type>
    <boot dev='hd'/>
  </os>
  <devices>
    <emulator>{emulator}</emulator>
{disk}    <interface type='user'>
      <model type='virtio'/>
    </interface>
  </devices>
</domain>
"#
    ))
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
