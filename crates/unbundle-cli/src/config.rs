//! User configuration file
//!
//! Loaded from `<config_dir>/unbundle/config.yaml`, or from the path given
//! with `--config`. Every field is optional; command-line flags and
//! `UNBUNDLE_*` environment variables take precedence over it.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::CliError;

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Namespace used when `--namespace` is not given
    pub namespace: Option<String>,
    /// `cert-manager` or `service-ca`
    pub ca_provider: Option<String>,
    pub issuer: Option<IssuerConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Root for temporary extraction directories
    pub temp_dir: Option<PathBuf>,
    /// Declarative config subtree inside catalog images
    pub configs_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IssuerConfig {
    pub name: String,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default)]
    pub insecure: bool,
    pub docker_config: Option<PathBuf>,
}

impl Config {
    /// Default location, `None` when the platform has no config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("unbundle").join(CONFIG_FILE))
    }

    /// Load the configuration
    ///
    /// An explicit path must exist. A missing default file means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CliError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, CliError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CliError::io(path.display(), e))?;
        debug!(path = %path.display(), "loaded configuration");
        Self::parse(&content).map_err(|message| {
            CliError::config_with_help(
                format!("invalid config file {}: {}", path.display(), message),
                "Known keys: namespace, caProvider, issuer, registry, tempDir, configsDir",
            )
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
namespace: operators
caProvider: service-ca
issuer:
  name: corp-ca
  kind: ClusterIssuer
registry:
  insecure: true
  dockerConfig: /etc/unbundle/docker.json
tempDir: /var/tmp/unbundle
configsDir: catalog
"#,
        )
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some("operators"));
        assert_eq!(config.ca_provider.as_deref(), Some("service-ca"));
        let issuer = config.issuer.unwrap();
        assert_eq!(issuer.name, "corp-ca");
        assert_eq!(issuer.kind.as_deref(), Some("ClusterIssuer"));
        assert!(config.registry.insecure);
        assert_eq!(
            config.registry.docker_config,
            Some(PathBuf::from("/etc/unbundle/docker.json"))
        );
        assert_eq!(config.configs_dir.as_deref(), Some("catalog"));
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::parse("\n").unwrap();
        assert!(config.namespace.is_none());
        assert!(!config.registry.insecure);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::parse("namesapce: typo\n").unwrap_err();
        assert!(err.contains("namesapce"));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.yaml"))).unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::IO_ERROR);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "registry: [1, 2]\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();

        assert_eq!(err.exit_code(), crate::exit_codes::CONFIG_ERROR);
        assert!(err.to_string().contains(CONFIG_FILE));
    }
}
