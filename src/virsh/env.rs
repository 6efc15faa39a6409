//! Locating the vendor-bundled virtualization toolchain on the NAS.
//!
//! virsh, qemu-img and the emulator live under a vendor root that is not on
//! the default `PATH` of an SSH session, so every hypervisor command is
//! prefixed with the root's library and binary directories.

use super::command::VirshCommand;
use crate::error::VmError;
use crate::remote::RemoteExecutor;

/// Probed in this order; the first one present wins.
pub const CANDIDATE_ROOTS: [&str; 2] = ["/QVS", "/KVM"];

const PROBE_MARKER: &str = "found";
const READY_MARKER: &str = "virsh_ready";

/// Install root of the hypervisor toolchain, e.g. `/QVS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainRoot(String);

impl ToolchainRoot {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// `export ... &&`, ready to be followed by a command.
    pub fn env_prefix(&self) -> String {
        let root = &self.0;
        format!(
            "export LD_LIBRARY_PATH={root}/usr/lib:{root}/usr/lib64/ \
             PATH=$PATH:{root}/usr/bin/:{root}/usr/sbin/ &&"
        )
    }

    /// Prefix `command` with the toolchain environment.
    pub fn wrap(&self, command: &str) -> String {
        format!("{} {command}", self.env_prefix())
    }

    pub fn emulator(&self) -> String {
        format!("{}/usr/bin/qemu-system-x86_64", self.0)
    }

    pub fn qemu_img(&self) -> String {
        format!("{}/usr/bin/qemu-img", self.0)
    }
}

/// Find the toolchain root and confirm virsh actually runs from it.
pub async fn resolve<E: RemoteExecutor>(exec: &E) -> Result<ToolchainRoot, VmError> {
    let root = find_root(exec).await?;
    verify(exec, &root).await?;
    tracing::debug!(root = root.path(), "hypervisor toolchain ready");
    Ok(root)
}

/// Probe [`CANDIDATE_ROOTS`] in order. A probe that fails to run counts as
/// "not present".
pub async fn find_root<E: RemoteExecutor>(exec: &E) -> Result<ToolchainRoot, VmError> {
    for candidate in CANDIDATE_ROOTS {
        let probe = format!("test -d {candidate} && echo '{PROBE_MARKER}'");
        match exec.execute(&probe).await {
            Ok(out) if out.trim() == PROBE_MARKER => {
                tracing::debug!(root = candidate, "found hypervisor root");
                return Ok(ToolchainRoot::new(candidate));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(root = candidate, "probe failed: {e}"),
        }
    }

    Err(VmError::ToolchainNotFound {
        candidates: CANDIDATE_ROOTS.join(", "),
    })
}

/// Run `virsh version` under the root's environment.
pub async fn verify<E: RemoteExecutor>(exec: &E, root: &ToolchainRoot) -> Result<(), VmError> {
    let check = root.wrap(&format!(
        "{} >/dev/null 2>&1 && echo '{READY_MARKER}'",
        VirshCommand::Version.render()
    ));
    match exec.execute(&check).await {
        Ok(out) if out.contains(READY_MARKER) => Ok(()),
        Ok(out) => Err(VmError::ToolchainUnusable {
            root: root.path().to_string(),
            output: out.trim().to_string(),
        }),
        Err(e) => Err(VmError::ToolchainUnusable {
            root: root.path().to_string(),
            output: e.output().trim().to_string(),
        }),
    }
}
