//! Registry credentials from the Docker client config.
//!
//! Reads `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`.
//! A registry is resolved the way the Docker CLI does it:
//!
//! 1. `credHelpers[registry]` names a `docker-credential-<helper>` program
//! 2. an `auths` entry holding a base64 `auth` or `username`/`password`
//! 3. `credsStore` names the helper holding every other registry
//!
//! Helpers speak the docker-credential protocol: `get` with the server URL on
//! stdin, `{"Username": ..., "Secret": ...}` on stdout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::Engine;
use incert_core::error::{IncertError, Result};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DOCKER_HUB: &str = "index.docker.io";

/// Key Docker Hub credentials are stored under by the Docker CLI.
const DOCKER_HUB_SERVER: &str = "https://index.docker.io/v1/";

const HELPER_PREFIX: &str = "docker-credential-";

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
    #[serde(default)]
    creds_store: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperCredentials {
    username: String,
    secret: String,
}

/// Read-only view of a Docker client config file.
pub struct CredentialStore {
    path: PathBuf,
    helper_dir: Option<PathBuf>,
}

impl CredentialStore {
    /// The config file the Docker CLI would use.
    pub fn default_path() -> Result<Self> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Ok(Self::new(Path::new(&dir).join("config.json")));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            IncertError::ConfigError("Cannot determine home directory for Docker config".to_string())
        })?;
        Ok(Self::new(home.join(".docker").join("config.json")))
    }

    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            helper_dir: None,
        }
    }

    /// Look for credential helpers in `dir` instead of on `PATH`.
    pub fn with_helper_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.helper_dir = Some(dir.into());
        self
    }

    /// Credentials for a registry as `(username, password)`.
    pub async fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load().await?;
        let wanted = normalize_registry(registry);

        let helper = file
            .cred_helpers
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, helper)| helper);
        if let Some(helper) = helper {
            return self.run_helper(helper, &wanted).await;
        }

        let entry = file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);
        if let Some(credentials) = entry.map(|e| e.credentials(&self.path)).transpose()?.flatten() {
            return Ok(Some(credentials));
        }

        match file.creds_store.as_deref().filter(|store| !store.is_empty()) {
            Some(store) => self.run_helper(store, &wanted).await,
            None => Ok(None),
        }
    }

    async fn load(&self) -> Result<DockerConfigFile> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DockerConfigFile::default())
            }
            Err(e) => {
                return Err(IncertError::ConfigError(format!(
                    "Failed to read Docker config {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&data).map_err(|e| {
            IncertError::ConfigError(format!(
                "Failed to parse Docker config {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// `docker-credential-<helper> get` for a normalized registry host.
    async fn run_helper(&self, helper: &str, registry: &str) -> Result<Option<(String, String)>> {
        let program = format!("{}{}", HELPER_PREFIX, helper);
        let program = match &self.helper_dir {
            Some(dir) => dir.join(&program),
            None => PathBuf::from(&program),
        };
        let server = if registry == DOCKER_HUB {
            DOCKER_HUB_SERVER
        } else {
            registry
        };
        let helper_error = |message: String| {
            IncertError::ConfigError(format!("Credential helper {}: {}", program.display(), message))
        };

        tracing::debug!(helper = %program.display(), server, "Querying credential helper");

        let mut child = Command::new(&program)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| helper_error(format!("failed to start: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(server.as_bytes())
                .await
                .map_err(|e| helper_error(format!("failed to write request: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| helper_error(format!("failed to run: {}", e)))?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.contains("credentials not found") || stderr.contains("credentials not found") {
                return Ok(None);
            }
            return Err(helper_error(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let credentials: HelperCredentials = serde_json::from_slice(&output.stdout)
            .map_err(|e| helper_error(format!("invalid response: {}", e)))?;
        Ok(Some((credentials.username, credentials.secret)))
    }
}

impl AuthEntry {
    fn credentials(&self, path: &Path) -> Result<Option<(String, String)>> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(Some((username.clone(), password.clone())));
        }

        let Some(encoded) = self.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let invalid = || {
            IncertError::ConfigError(format!(
                "Invalid auth entry in Docker config {}",
                path.display()
            ))
        };

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| invalid())?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
        let (username, password) = decoded.split_once(':').ok_or_else(invalid)?;
        Ok(Some((username.to_string(), password.to_string())))
    }
}

/// Reduce a config key or registry host to a bare, comparable host.
///
/// `https://index.docker.io/v1/`, `docker.io` and `registry-1.docker.io` all
/// name Docker Hub.
fn normalize_registry(registry: &str) -> String {
    let host = registry.trim().to_lowercase();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(&host);
    let host = host.split('/').next().unwrap_or(host);

    match host {
        "docker.io" | "registry-1.docker.io" | DOCKER_HUB => DOCKER_HUB.to_string(),
        other => other.to_string(),
    }
}
