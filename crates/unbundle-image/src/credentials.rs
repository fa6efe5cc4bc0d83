//! Registry authentication
//!
//! Precedence:
//! 1. Explicit username + password (both must be set)
//! 2. Docker config: per-registry `credHelpers`, inline `auths`, then the
//!    global `credsStore` helper
//! 3. Anonymous

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use oci_distribution::Reference;
use oci_distribution::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ImageError, Result};

/// Docker Hub's legacy auth key, still written by `docker login`
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Registry connection settings for one pipeline run
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Use plain HTTP and accept invalid TLS certificates
    pub insecure: bool,
    /// Docker config.json to read instead of the default location
    pub docker_config: Option<PathBuf>,
}

impl RegistryOptions {
    /// True when both a username and a password were supplied
    pub fn has_explicit_credentials(&self) -> bool {
        matches!((&self.username, &self.password), (Some(u), Some(p)) if !u.is_empty() && !p.is_empty())
    }
}

/// Decide how to authenticate against the registry hosting `reference`
pub fn resolve_auth(reference: &Reference, options: &RegistryOptions) -> Result<RegistryAuth> {
    if let (true, Some(username), Some(password)) = (
        options.has_explicit_credentials(),
        &options.username,
        &options.password,
    ) {
        debug!(registry = reference.registry(), "using explicit credentials");
        return Ok(RegistryAuth::Basic(username.clone(), password.clone()));
    }

    let config = DockerConfig::load(options.docker_config.as_deref())?;
    match config.credentials_for(reference.registry())? {
        Some((username, password)) => {
            debug!(registry = reference.registry(), "using docker config credentials");
            Ok(RegistryAuth::Basic(username, password))
        }
        None => {
            debug!(registry = reference.registry(), "pulling anonymously");
            Ok(RegistryAuth::Anonymous)
        }
    }
}

/// Docker config.json format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuth>,

    /// Default credential helper for every registry
    #[serde(default, rename = "credsStore")]
    pub creds_store: Option<String>,

    /// Credential helper per registry host
    #[serde(default, rename = "credHelpers")]
    pub cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerAuth {
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Output of `docker-credential-<helper> get`
#[derive(Debug, Deserialize)]
struct HelperCredentials {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

impl DockerConfig {
    /// Load from `path`, `$DOCKER_CONFIG/config.json` or `~/.docker/config.json`
    ///
    /// A missing file yields an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::parse(&content).map_err(|e| ImageError::InvalidConfig {
            message: format!("{}: {}", config_path.display(), e),
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    fn default_path() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("config.json"));
        }
        dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
    }

    /// Find a username/password for a registry host
    pub fn credentials_for(&self, registry: &str) -> Result<Option<(String, String)>> {
        let keys = registry_keys(registry);

        if let Some(helper) = keys.iter().find_map(|k| self.cred_helpers.get(k)) {
            return run_credential_helper(helper, &keys[0]);
        }

        for key in &keys {
            if let Some(creds) = self.auths.get(key).and_then(DockerAuth::decode) {
                return Ok(Some(creds));
            }
        }

        match &self.creds_store {
            Some(helper) => run_credential_helper(helper, &keys[0]),
            None => Ok(None),
        }
    }
}

impl DockerAuth {
    fn decode(&self) -> Option<(String, String)> {
        if let Some(encoded) = &self.auth {
            let decoded =
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
            let creds = String::from_utf8(decoded).ok()?;
            let (user, pass) = creds.split_once(':')?;
            return Some((user.to_string(), pass.to_string()));
        }
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        }
    }
}

/// Keys a registry may be stored under in config.json
fn registry_keys(registry: &str) -> Vec<String> {
    let mut keys = vec![
        registry.to_string(),
        format!("https://{}", registry),
        format!("http://{}", registry),
    ];
    if matches!(registry, "docker.io" | "index.docker.io" | "registry-1.docker.io") {
        keys.push(DOCKER_HUB_AUTH_KEY.to_string());
        keys.push("index.docker.io".to_string());
    }
    keys
}

fn run_credential_helper(helper: &str, server: &str) -> Result<Option<(String, String)>> {
    let program = format!("docker-credential-{}", helper);
    debug!(helper = %program, server, "querying credential helper");

    let helper_error = |message: String| ImageError::CredentialHelper {
        helper: program.clone(),
        message,
    };

    let mut child = Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| helper_error(e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(server.as_bytes())
            .map_err(|e| helper_error(e.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| helper_error(e.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        if stdout.contains("credentials not found") {
            return Ok(None);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(helper_error(format!("{}{}", stdout.trim(), stderr.trim())));
    }

    let creds: HelperCredentials =
        serde_json::from_str(&stdout).map_err(|e| helper_error(e.to_string()))?;
    Ok(Some((creds.username, creds.secret)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(s: &str) -> Reference {
        s.parse().unwrap()
    }

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_explicit_credentials_win() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(
            dir.path(),
            r#"{"auths": {"quay.io": {"username": "from-config", "password": "x"}}}"#,
        );
        let options = RegistryOptions {
            username: Some("robot".to_string()),
            password: Some("token".to_string()),
            docker_config: Some(config),
            ..Default::default()
        };

        let auth = resolve_auth(&reference("quay.io/org/bundle:v1"), &options).unwrap();

        assert!(matches!(auth, RegistryAuth::Basic(u, p) if u == "robot" && p == "token"));
    }

    #[test]
    fn test_username_alone_is_not_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let options = RegistryOptions {
            username: Some("robot".to_string()),
            docker_config: Some(dir.path().join("missing.json")),
            ..Default::default()
        };
        assert!(!options.has_explicit_credentials());

        let auth = resolve_auth(&reference("quay.io/org/bundle:v1"), &options).unwrap();
        assert!(matches!(auth, RegistryAuth::Anonymous));
    }

    #[test]
    fn test_docker_config_auth_entry() {
        let dir = tempfile::tempdir().unwrap();
        // base64("user:secret")
        let config = write_config(
            dir.path(),
            r#"{"auths": {"https://quay.io": {"auth": "dXNlcjpzZWNyZXQ="}}}"#,
        );
        let options = RegistryOptions {
            docker_config: Some(config),
            ..Default::default()
        };

        let auth = resolve_auth(&reference("quay.io/org/bundle:v1"), &options).unwrap();

        assert!(matches!(auth, RegistryAuth::Basic(u, p) if u == "user" && p == "secret"));
    }

    #[test]
    fn test_docker_hub_legacy_key() {
        let config = DockerConfig::parse(
            r#"{"auths": {"https://index.docker.io/v1/": {"username": "hub", "password": "pw"}}}"#,
        )
        .unwrap();

        let creds = config.credentials_for("docker.io").unwrap();

        assert_eq!(creds, Some(("hub".to_string(), "pw".to_string())));
    }

    #[test]
    fn test_unknown_registry_is_anonymous() {
        let config = DockerConfig::parse(
            r#"{"auths": {"quay.io": {"username": "u", "password": "p"}}}"#,
        )
        .unwrap();
        assert_eq!(config.credentials_for("ghcr.io").unwrap(), None);
    }

    #[test]
    fn test_missing_helper_is_reported() {
        let config = DockerConfig::parse(
            r#"{"credHelpers": {"registry.example.com": "unbundle-test-does-not-exist"}}"#,
        )
        .unwrap();

        let err = config.credentials_for("registry.example.com").unwrap_err();

        assert!(matches!(err, ImageError::CredentialHelper { .. }));
        assert!(err.to_string().contains("docker-credential-unbundle-test-does-not-exist"));
    }

    #[test]
    fn test_invalid_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), "{not json");
        let err = DockerConfig::load(Some(&config)).unwrap_err();
        assert!(err.is_configuration());
    }
}
