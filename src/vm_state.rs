//! Shared vocabulary for VM lifecycle state.
//!
//! Reconstructed from `virsh list --all` on every call; nothing is cached
//! between operations.

use crate::types::VmInfo;

/// Where a VM is in its lifecycle, as far as the guards care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// No VM of that name. A deleted VM is indistinguishable from one that
    /// never existed.
    Undefined,

    /// Defined, state token does not say running ("shut off", "paused", ...).
    Stopped,

    /// State token contains "running".
    Running,
}

impl VmState {
    pub fn detect(vm: Option<&VmInfo>) -> Self {
        match vm {
            None => VmState::Undefined,
            Some(vm) if vm.is_running() => VmState::Running,
            Some(_) => VmState::Stopped,
        }
    }

    pub fn exists(self) -> bool {
        !matches!(self, VmState::Undefined)
    }
}

/// What a lifecycle call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    /// The VM was already in the requested state; no command was sent.
    AlreadyThere,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(state: &str) -> VmInfo {
        VmInfo {
            name: "web".into(),
            state: state.into(),
            ..VmInfo::default()
        }
    }

    #[test]
    fn detect_states() {
        assert_eq!(VmState::detect(None), VmState::Undefined);
        assert_eq!(VmState::detect(Some(&vm("running"))), VmState::Running);
        assert_eq!(VmState::detect(Some(&vm("shut off"))), VmState::Stopped);
        assert_eq!(VmState::detect(Some(&vm("paused"))), VmState::Stopped);
        assert!(!VmState::Undefined.exists());
        assert!(VmState::Stopped.exists());
    }
}
