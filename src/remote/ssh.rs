use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};

use super::RemoteExecutor;
use crate::error::{RemoteError, VmError};

const DEFAULT_KEYS: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

/// Everything needed to open a session to one NAS.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub keyfile: Option<PathBuf>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

/// Verifies host keys against `~/.ssh/known_hosts`.
///
/// A key that contradicts a known_hosts entry is rejected; a host with no
/// entry is accepted with a warning.
struct SshHandler {
    host: String,
    port: u16,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::warn!(host = %self.host, "host key not in known_hosts, accepting");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(host = %self.host, "host key verification failed: {e}");
                Ok(false)
            }
        }
    }
}

/// A live SSH connection. Each command gets its own channel; the connection
/// persists until [`SshSession::close`].
pub struct SshSession {
    handle: client::Handle<SshHandler>,
    address: String,
}

impl SshSession {
    /// Open the TCP connection, complete the handshake and authenticate.
    ///
    /// Authentication tries the configured key file, then the default keys
    /// under `~/.ssh`, then the password.
    pub async fn connect(config: &SshConfig) -> Result<Self, VmError> {
        let address = format!("{}:{}", config.host, config.port);
        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
        };
        let ssh_config = Arc::new(client::Config::default());

        tracing::info!(address, user = config.username, "connecting SSH");

        let mut handle = tokio::time::timeout(
            config.connect_timeout,
            client::connect(ssh_config, &*address, handler),
        )
        .await
        .map_err(|_| VmError::Connect {
            address: address.clone(),
            message: format!("timed out after {}s", config.connect_timeout.as_secs()),
        })?
        .map_err(|e| VmError::Connect {
            address: address.clone(),
            message: e.to_string(),
        })?;

        if !authenticate(&mut handle, config).await? {
            return Err(VmError::Authentication {
                username: config.username.clone(),
            });
        }

        tracing::info!(address, "SSH authenticated");
        Ok(Self { handle, address })
    }

    /// Cheap round trip to prove the session can run commands.
    pub async fn test_connection(&self) -> Result<(), VmError> {
        self.execute("echo 'connection test'")
            .await
            .map(|_| ())
            .map_err(|e| VmError::remote("run a test command over SSH", e))
    }

    pub async fn close(self) -> Result<(), VmError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| VmError::Connect {
                address: self.address.clone(),
                message: format!("disconnect failed: {e}"),
            })
    }
}

impl RemoteExecutor for SshSession {
    async fn execute(&self, command: &str) -> Result<String, RemoteError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel {
                message: e.to_string(),
            })?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| RemoteError::Channel {
                message: e.to_string(),
            })?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        let output = String::from_utf8_lossy(&output).into_owned();
        match exit_status {
            Some(0) => Ok(output),
            Some(status) => Err(RemoteError::Exit { status, output }),
            None => Err(RemoteError::Session { output }),
        }
    }
}

async fn authenticate(
    handle: &mut client::Handle<SshHandler>,
    config: &SshConfig,
) -> Result<bool, VmError> {
    for path in candidate_keys(config) {
        let key_data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("skipping SSH key {}: {e}", path.display());
                continue;
            }
        };
        let key = match keys::decode_secret_key(&key_data, None) {
            Ok(k) => k,
            Err(e) => {
                tracing::debug!("failed to decode SSH key {}: {e}", path.display());
                continue;
            }
        };

        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
        match handle
            .authenticate_publickey(&config.username, key_with_alg)
            .await
        {
            Ok(auth) if auth.success() => {
                tracing::debug!(key = %path.display(), "public key accepted");
                return Ok(true);
            }
            Ok(_) => tracing::debug!(key = %path.display(), "public key rejected"),
            Err(e) => tracing::debug!(key = %path.display(), "public key auth failed: {e}"),
        }
    }

    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        let auth = handle
            .authenticate_password(&config.username, password)
            .await
            .map_err(|e| VmError::Connect {
                address: format!("{}:{}", config.host, config.port),
                message: format!("password authentication failed: {e}"),
            })?;
        return Ok(auth.success());
    }

    Ok(false)
}

/// Explicit key file first, then the conventional keys under `~/.ssh` that
/// are present.
fn candidate_keys(config: &SshConfig) -> Vec<PathBuf> {
    let mut keys = Vec::new();
    let home = dirs::home_dir();

    if let Some(keyfile) = &config.keyfile {
        let path = expand_tilde(keyfile, home.as_deref());
        if path.exists() {
            keys.push(path);
        }
    }

    if let Some(home) = &home {
        for name in DEFAULT_KEYS {
            let path = home.join(".ssh").join(name);
            if path.exists() && !keys.contains(&path) {
                keys.push(path);
            }
        }
    }

    keys
}

fn expand_tilde(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_uses_home() {
        let home = Path::new("/home/admin");
        assert_eq!(
            expand_tilde(Path::new("~/.ssh/nas_key"), Some(home)),
            PathBuf::from("/home/admin/.ssh/nas_key")
        );
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        let home = Path::new("/home/admin");
        assert_eq!(
            expand_tilde(Path::new("/etc/keys/nas"), Some(home)),
            PathBuf::from("/etc/keys/nas")
        );
    }

    #[test]
    fn expand_tilde_without_home() {
        assert_eq!(
            expand_tilde(Path::new("~/.ssh/id_rsa"), None),
            PathBuf::from("~/.ssh/id_rsa")
        );
    }

    #[test]
    fn missing_explicit_key_is_skipped() {
        let config = SshConfig {
            host: "nas".into(),
            port: 22,
            username: "admin".into(),
            keyfile: Some(PathBuf::from("/nonexistent/key")),
            password: None,
            connect_timeout: Duration::from_secs(30),
        };
        let keys = candidate_keys(&config);
        assert!(!keys.contains(&PathBuf::from("/nonexistent/key")));
    }
}
