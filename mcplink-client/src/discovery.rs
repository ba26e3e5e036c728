//! Finding the MCP-Link server to connect to.
//!
//! The server's URL and the credential to present to it are usually not known in advance.  The
//! MCP-Link browser extension installs a native messaging host, and that host's helper program
//! prints a configuration naming the local server.  [`NativeMessagingDiscovery`] finds the helper
//! through the browser's native messaging manifest, runs it, and reads that configuration.
//!
//! When the URL and credential *are* known, an [`Endpoint`] can be built directly.
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use url::Url;

use crate::config::DiscoveryConfig;
use crate::transport::child_process::HelperProcess;
use crate::{DiscoveryError, McpLinkError, Result};

/// File name of the native messaging manifest installed for the MCP-Link helper
pub const MANIFEST_FILE_NAME: &str = "com.aurafriday.shim.json";

/// Where to reach the server: the URL of its event stream, and the value of the `Authorization`
/// header it expects on every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: Url,
    pub authorization: String,
}

impl Endpoint {
    pub fn new(url: &str, authorization: impl Into<String>) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| McpLinkError::InvalidUrl {
            url: url.to_string(),
            source: e,
        })?;

        Ok(Self {
            url,
            authorization: authorization.into(),
        })
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The credential is as good as a password; keep it out of logs
        f.debug_struct("Endpoint")
            .field("url", &self.url.as_str())
            .field("authorization", &"<redacted>")
            .finish()
    }
}

/// Something that can come up with the [`Endpoint`] to connect to.
#[async_trait]
pub trait EndpointSource: Send + Sync {
    async fn endpoint(&self) -> Result<Endpoint, DiscoveryError>;
}

#[async_trait]
impl EndpointSource for Endpoint {
    async fn endpoint(&self) -> Result<Endpoint, DiscoveryError> {
        Ok(self.clone())
    }
}

/// Discovers the server through the MCP-Link native messaging host.
#[derive(Clone, Debug, Default)]
pub struct NativeMessagingDiscovery {
    config: DiscoveryConfig,
}

impl NativeMessagingDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Path of the native messaging manifest to use, either the configured one or the first that
    /// exists in the browsers' standard locations.
    pub fn find_manifest(&self) -> Result<PathBuf, DiscoveryError> {
        if let Some(path) = &self.config.manifest_path {
            return Ok(path.clone());
        }

        let searched = manifest_search_paths();
        match searched.iter().find(|path| path.is_file()) {
            Some(path) => Ok(path.clone()),
            None => Err(DiscoveryError::ManifestNotFound { searched }),
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn discover(&self) -> Result<Endpoint, DiscoveryError> {
        let manifest_path = self.find_manifest()?;
        tracing::debug!(manifest = %manifest_path.display(), "Found native messaging manifest");

        let manifest = NativeMessagingManifest::read(&manifest_path).await?;
        let helper = manifest.helper_path(&manifest_path)?;

        let mut process = HelperProcess::spawn(Command::new(&helper))?;
        let output = process.read_json_object(self.config.helper_timeout).await?;
        drop(process);

        let config: HelperConfig =
            serde_json::from_value(output.clone()).map_err(|e| DiscoveryError::InvalidHelperOutput {
                source: e,
                output,
            })?;

        let endpoint = config.endpoint()?;
        tracing::info!(url = %endpoint.url, "Discovered MCP-Link server");
        Ok(endpoint)
    }
}

#[async_trait]
impl EndpointSource for NativeMessagingDiscovery {
    async fn endpoint(&self) -> Result<Endpoint, DiscoveryError> {
        self.discover().await
    }
}

/// The parts of a browser native messaging manifest this cares about
#[derive(Clone, Debug, Deserialize)]
pub struct NativeMessagingManifest {
    /// Helper program to run
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub other: Map<String, JsonValue>,
}

impl NativeMessagingManifest {
    pub async fn read(path: &Path) -> Result<Self, DiscoveryError> {
        let contents = tokio::fs::read(path).await.map_err(|e| DiscoveryError::ReadManifest {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_json::from_slice(&contents).map_err(|e| DiscoveryError::ParseManifest {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The helper program, which must exist.  A relative path is relative to the manifest.
    fn helper_path(&self, manifest_path: &Path) -> Result<PathBuf, DiscoveryError> {
        let helper = match &self.path {
            Some(path) if path.is_relative() => manifest_path
                .parent()
                .map(|dir| dir.join(path))
                .unwrap_or_else(|| path.clone()),
            Some(path) => path.clone(),
            None => {
                return Err(DiscoveryError::HelperMissing {
                    manifest: manifest_path.to_path_buf(),
                    helper: None,
                });
            }
        };

        if !helper.is_file() {
            return Err(DiscoveryError::HelperMissing {
                manifest: manifest_path.to_path_buf(),
                helper: Some(helper),
            });
        }

        Ok(helper)
    }
}

/// The configuration printed by the helper program
#[derive(Clone, Debug, Deserialize)]
pub struct HelperConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: Map<String, JsonValue>,
}

#[derive(Deserialize)]
struct ServerEntry {
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl HelperConfig {
    /// The endpoint of the first server listed that has a URL
    pub fn endpoint(&self) -> Result<Endpoint, DiscoveryError> {
        let (name, entry, url) = self
            .mcp_servers
            .iter()
            .find_map(|(name, value)| {
                let entry = ServerEntry::deserialize(value).ok()?;
                let url = entry.url.clone()?;
                Some((name, entry, url))
            })
            .ok_or(DiscoveryError::NoServer)?;

        let authorization = entry
            .headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| DiscoveryError::NoAuthorization { server: name.clone() })?;

        let parsed = Url::parse(&url).map_err(|e| DiscoveryError::InvalidServerUrl {
            server: name.clone(),
            url,
            source: e,
        })?;

        Ok(Endpoint {
            url: parsed,
            authorization,
        })
    }
}

/// Every place a browser might have the MCP-Link native messaging manifest on this platform, in
/// the order they are tried.
pub fn manifest_search_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    #[cfg(target_os = "windows")]
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join("AuraFriday"));
    }

    #[cfg(target_os = "macos")]
    if let Some(home) = dirs::home_dir() {
        let support = home.join("Library").join("Application Support");
        for browser in [
            "Google/Chrome",
            "Chromium",
            "Microsoft Edge",
            "BraveSoftware/Brave-Browser",
            "Vivaldi",
        ] {
            candidates.push(support.join(browser).join("NativeMessagingHosts"));
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    if let Some(home) = dirs::home_dir() {
        let config = home.join(".config");
        for browser in [
            "google-chrome",
            "chromium",
            "microsoft-edge",
            "BraveSoftware/Brave-Browser",
        ] {
            candidates.push(config.join(browser).join("NativeMessagingHosts"));
        }

        let flatpak = home.join(".var").join("app");
        candidates.push(flatpak.join("com.google.Chrome/config/google-chrome/NativeMessagingHosts"));
        candidates.push(flatpak.join("org.chromium.Chromium/config/chromium/NativeMessagingHosts"));
    }

    candidates
        .into_iter()
        .map(|dir| dir.join(MANIFEST_FILE_NAME))
        .collect()
}
