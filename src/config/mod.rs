//! Configuration file for the `twopence` command.
//!
//! The file lives at `<config dir>/twopence/config.yml` (on Linux
//! `~/.config/twopence/config.yml`). A missing file means defaults.
//!
//! ```yaml
//! defaults:
//!   user: root
//!   timeout: 60
//!   identity: ~/.ssh/id_sut
//!   connect_timeout: 30
//! targets:
//!   sut:
//!     spec: "ssh:192.168.122.10:22"
//!     user: testuser
//!     timeout: 300
//! ```

use crate::ssh::SshSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write config file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Could not determine the configuration directory")]
    NoConfigDir,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

/// Settings applied when neither the target nor the command line
/// overrides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Command timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Private key tried after the SSH agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            user: None,
            timeout: DEFAULT_TIMEOUT,
            identity: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// A named target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target spec, e.g. `ssh:sut.example.com:2222`.
    pub spec: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl TargetConfig {
    pub fn new<S: Into<String>>(spec: S) -> Self {
        Self {
            spec: spec.into(),
            user: None,
            timeout: None,
        }
    }

    pub fn with_user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A target argument resolved against the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub spec: String,
    pub user: Option<String>,
    pub timeout: Duration,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("twopence").join("config.yml"))
    }

    /// Loads the configuration from the default location.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads the configuration from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let contents = serde_yaml::to_string(self)?;
        fs::write(path, contents).map_err(write_err)
    }

    pub fn get_target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.get(name)
    }

    pub fn set_target(&mut self, name: String, target: TargetConfig) {
        self.targets.insert(name, target);
    }

    pub fn remove_target(&mut self, name: &str) -> Option<TargetConfig> {
        self.targets.remove(name)
    }

    /// Resolves a command-line target: a configured name, or else a literal
    /// target spec.
    pub fn resolve(&self, target: &str) -> ResolvedTarget {
        match self.get_target(target) {
            Some(configured) => ResolvedTarget {
                spec: configured.spec.clone(),
                user: configured.user.clone().or_else(|| self.defaults.user.clone()),
                timeout: Duration::from_secs(configured.timeout.unwrap_or(self.defaults.timeout)),
            },
            None => ResolvedTarget {
                spec: target.to_string(),
                user: self.defaults.user.clone(),
                timeout: Duration::from_secs(self.defaults.timeout),
            },
        }
    }

    /// Transport settings for the SSH plugin.
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            identity: self.defaults.identity.as_deref().map(expand_home),
            connect_timeout: Duration::from_secs(self.defaults.connect_timeout),
        }
    }
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.targets.is_empty());
        assert_eq!(config.defaults.timeout, 60);
        assert_eq!(config.defaults.connect_timeout, 30);
        assert!(config.defaults.user.is_none());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = "targets:\n  sut:\n    spec: \"ssh:10.0.0.2\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.defaults, Defaults::default());
        assert_eq!(config.get_target("sut"), Some(&TargetConfig::new("ssh:10.0.0.2")));
    }

    #[test]
    fn test_resolve_named_target() {
        let mut config = Config::default();
        config.defaults.user = Some("admin".into());
        config.set_target(
            "sut".into(),
            TargetConfig::new("ssh:sut.example.com:2222").with_timeout(300),
        );

        let resolved = config.resolve("sut");
        assert_eq!(resolved.spec, "ssh:sut.example.com:2222");
        assert_eq!(resolved.user.as_deref(), Some("admin"));
        assert_eq!(resolved.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_resolve_literal_spec() {
        let config = Config::default();
        let resolved = config.resolve("ssh:[::1]:22");
        assert_eq!(resolved.spec, "ssh:[::1]:22");
        assert!(resolved.user.is_none());
        assert_eq!(resolved.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_remove_target() {
        let mut config = Config::default();
        config.set_target("sut".into(), TargetConfig::new("ssh:sut"));
        assert!(config.remove_target("sut").is_some());
        assert!(config.remove_target("sut").is_none());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/key"), PathBuf::from("/etc/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id_sut"), home.join(".ssh/id_sut"));
        }
    }
}
