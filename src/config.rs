use std::collections::BTreeMap;
use std::path::Path;

use facet::Facet;

use crate::error::VmError;
use crate::paths;

pub const DEFAULT_PORT: u16 = 22;

/// Connection profile for one NAS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(default)]
pub struct HostConfig {
    #[facet(default)]
    pub host: String,
    #[facet(default)]
    pub username: String,
    /// 0 means "not set"; [`HostConfig::with_defaults`] turns it into 22.
    #[facet(default)]
    pub port: u16,
    pub keyfile: Option<String>,
    pub password: Option<String>,
}

impl HostConfig {
    pub fn validate(&self) -> Result<(), VmError> {
        if self.host.trim().is_empty() {
            return Err(VmError::Validation {
                message: "host is required".into(),
            });
        }
        if self.username.trim().is_empty() {
            return Err(VmError::Validation {
                message: "username is required".into(),
            });
        }
        if self.port == 0 {
            return Err(VmError::Validation {
                message: "invalid port number: 0".into(),
            });
        }
        Ok(())
    }

    pub fn with_defaults(mut self) -> Self {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        self
    }

    /// Fields set in `other` win; empty ones fall through to `self`.
    pub fn merge_with(&self, other: &HostConfig) -> HostConfig {
        let pick = |mine: &Option<String>, theirs: &Option<String>| {
            theirs
                .clone()
                .filter(|s| !s.is_empty())
                .or_else(|| mine.clone())
        };
        HostConfig {
            host: non_empty_or(&other.host, &self.host),
            username: non_empty_or(&other.username, &self.username),
            port: if other.port != 0 { other.port } else { self.port },
            keyfile: pick(&self.keyfile, &other.keyfile),
            password: pick(&self.password, &other.password),
        }
    }
}

fn non_empty_or(preferred: &str, fallback: &str) -> String {
    if preferred.is_empty() {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

/// `~/.nasvm/config.yaml`
///
/// ```yaml
/// default_host: office
/// hosts:
///   office:
///     host: 192.168.1.100
///     username: admin
///     port: 22
///     keyfile: ~/.ssh/nas_ed25519
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(default)]
pub struct ConfigFile {
    #[facet(default)]
    pub default_host: String,
    #[facet(default)]
    pub hosts: BTreeMap<String, HostConfig>,
}

impl ConfigFile {
    /// Profile by name. An empty name means the default host, or the only
    /// host when exactly one is stored.
    pub fn host_config(&self, name: &str) -> Option<&HostConfig> {
        let name = if name.is_empty() {
            self.default_host.as_str()
        } else {
            name
        };
        if name.is_empty() && self.hosts.len() == 1 {
            return self.hosts.values().next();
        }
        self.hosts.get(name)
    }

    pub fn set_host_config(&mut self, name: impl Into<String>, config: HostConfig) {
        self.hosts.insert(name.into(), config);
    }

    pub fn set_default_host(&mut self, name: impl Into<String>) {
        self.default_host = name.into();
    }

    /// Sorted host names.
    pub fn list_hosts(&self) -> Vec<&str> {
        self.hosts.keys().map(String::as_str).collect()
    }
}

/// Load from the default location.
pub fn load() -> Result<ConfigFile, VmError> {
    load_from(&paths::config_path())
}

/// A missing file is an empty config.
pub fn load_from(path: &Path) -> Result<ConfigFile, VmError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(source) => {
            return Err(VmError::ConfigLoad {
                path: path.display().to_string(),
                source,
            });
        }
    };
    if contents.trim().is_empty() {
        return Ok(ConfigFile::default());
    }

    facet_yaml::from_str(&contents).map_err(|e| VmError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

pub fn save(config: &ConfigFile) -> Result<(), VmError> {
    save_to(config, &paths::config_path())
}

/// Write the config, creating its directory. The file may hold a password,
/// so it is only readable by the owner.
pub fn save_to(config: &ConfigFile, path: &Path) -> Result<(), VmError> {
    let save_err = |message: String| VmError::ConfigSave {
        path: path.display().to_string(),
        message,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| save_err(e.to_string()))?;
    }
    let yaml = facet_yaml::to_string(config).map_err(|e| save_err(e.to_string()))?;
    std::fs::write(path, yaml).map_err(|e| save_err(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| save_err(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office() -> HostConfig {
        HostConfig {
            host: "192.168.1.100".into(),
            username: "admin".into(),
            port: 22,
            keyfile: None,
            password: None,
        }
    }

    #[test]
    fn validation() {
        assert!(office().validate().is_ok());

        let no_host = HostConfig {
            host: String::new(),
            ..office()
        };
        assert!(no_host.validate().is_err());

        let no_user = HostConfig {
            username: String::new(),
            ..office()
        };
        assert!(no_user.validate().is_err());

        let no_port = HostConfig { port: 0, ..office() };
        assert!(no_port.validate().is_err());
        assert!(no_port.with_defaults().validate().is_ok());
    }

    #[test]
    fn merge_prefers_set_fields() {
        let base = HostConfig {
            keyfile: Some("~/.ssh/nas".into()),
            ..office()
        };
        let flags = HostConfig {
            host: "10.0.0.5".into(),
            port: 2222,
            keyfile: Some(String::new()),
            ..HostConfig::default()
        };
        let merged = base.merge_with(&flags);
        assert_eq!(merged.host, "10.0.0.5");
        assert_eq!(merged.username, "admin");
        assert_eq!(merged.port, 2222);
        assert_eq!(merged.keyfile.as_deref(), Some("~/.ssh/nas"));
    }

    #[test]
    fn host_lookup() {
        let mut config = ConfigFile::default();
        assert!(config.host_config("").is_none());

        config.set_host_config("office", office());
        assert_eq!(config.host_config(""), Some(&office()));

        config.set_host_config("lab", HostConfig {
            host: "10.0.0.9".into(),
            ..office()
        });
        assert!(config.host_config("").is_none());

        config.set_default_host("lab");
        assert_eq!(config.host_config("").unwrap().host, "10.0.0.9");
        assert_eq!(config.host_config("office"), Some(&office()));
        assert_eq!(config.list_hosts(), vec!["lab", "office"]);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = ConfigFile::default();
        config.set_host_config("office", HostConfig {
            keyfile: Some("~/.ssh/nas".into()),
            ..office()
        });
        config.set_default_host("office");
        save_to(&config, &path).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "hosts: [not, a, map\n").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, VmError::ConfigParse { .. }));
    }
}
