use miette::Diagnostic;
use thiserror::Error;

/// Failure of a single command on the remote host.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not connected")]
    NotConnected,

    #[error("failed to open session channel: {message}")]
    Channel { message: String },

    #[error("command exited with status {status}")]
    Exit { status: u32, output: String },

    #[error("session closed before the command reported an exit status")]
    Session { output: String },
}

impl RemoteError {
    /// The shell could not find the program (`127` or its message).
    pub fn is_command_not_found(&self) -> bool {
        match self {
            RemoteError::Exit { status, output } => {
                *status == 127 || output.to_lowercase().contains("command not found")
            }
            _ => false,
        }
    }

    /// Whatever the command printed before failing.
    pub fn output(&self) -> &str {
        match self {
            RemoteError::Exit { output, .. } | RemoteError::Session { output } => output,
            RemoteError::NotConnected | RemoteError::Channel { .. } => "",
        }
    }
}

/// Who has to act on an error: the caller (bad name, missing VM) or whoever
/// runs the NAS (broken toolchain, failing commands).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    User,
    Environment,
}

#[derive(Debug, Error, Diagnostic)]
pub enum VmError {
    #[error("VM '{name}' not found")]
    #[diagnostic(code(nasvm::user::vm_not_found))]
    VmNotFound { name: String },

    #[error("snapshot '{snapshot}' not found for VM '{vm}'")]
    #[diagnostic(code(nasvm::user::snapshot_not_found))]
    SnapshotNotFound { vm: String, snapshot: String },

    #[error("VM '{name}' already exists")]
    #[diagnostic(code(nasvm::user::already_exists))]
    AlreadyExists { name: String },

    #[error("could not find a hypervisor installation (looked in {candidates})")]
    #[diagnostic(
        code(nasvm::env::toolchain_not_found),
        help("is Virtualization Station installed and enabled on the NAS?")
    )]
    ToolchainNotFound { candidates: String },

    #[error("virsh under {root} is not accessible or not working properly")]
    #[diagnostic(code(nasvm::env::toolchain_unusable))]
    ToolchainUnusable { root: String, output: String },

    #[error("failed to {operation}")]
    #[diagnostic(code(nasvm::env::remote_command), help("remote output:\n{output}"))]
    RemoteCommand {
        operation: String,
        output: String,
        #[source]
        source: RemoteError,
    },

    #[error("{operation} reported a failure: {output}")]
    #[diagnostic(code(nasvm::env::remote_output))]
    RemoteOutput { operation: String, output: String },

    #[error("no available storage pools found")]
    #[diagnostic(
        code(nasvm::env::no_pool),
        help("create a storage pool on the NAS or attach external storage")
    )]
    NoPoolAvailable,

    #[error("cannot describe VM '{name}': {message}")]
    #[diagnostic(code(nasvm::user::domain_xml))]
    DomainXml { name: String, message: String },

    #[error("failed to connect to {address}: {message}")]
    #[diagnostic(code(nasvm::env::connect))]
    Connect { address: String, message: String },

    #[error("authentication as '{username}' failed")]
    #[diagnostic(
        code(nasvm::env::auth),
        help("pass --keyfile, load a key into ~/.ssh, or store a password in the config")
    )]
    Authentication { username: String },

    #[error("failed to load config from {path}")]
    #[diagnostic(code(nasvm::env::config_load))]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    #[diagnostic(code(nasvm::user::config_parse))]
    ConfigParse { path: String, message: String },

    #[error("failed to save config to {path}: {message}")]
    #[diagnostic(code(nasvm::env::config_save))]
    ConfigSave { path: String, message: String },

    #[error("validation error: {message}")]
    #[diagnostic(code(nasvm::user::validation))]
    Validation { message: String },

    #[error("failed to render output: {message}")]
    #[diagnostic(code(nasvm::env::output))]
    Output { message: String },

    #[error("operation cancelled")]
    #[diagnostic(code(nasvm::user::cancelled))]
    Cancelled,

    #[error("{context}")]
    #[diagnostic(code(nasvm::env::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl VmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VmError::VmNotFound { .. }
            | VmError::SnapshotNotFound { .. }
            | VmError::AlreadyExists { .. }
            | VmError::DomainXml { .. }
            | VmError::ConfigParse { .. }
            | VmError::Validation { .. }
            | VmError::Cancelled => ErrorClass::User,
            _ => ErrorClass::Environment,
        }
    }

    /// Wrap a failed remote command with the operation it was meant to perform.
    pub fn remote(operation: impl Into<String>, source: RemoteError) -> Self {
        VmError::RemoteCommand {
            operation: operation.into(),
            output: source.output().trim().to_string(),
            source,
        }
    }
}
