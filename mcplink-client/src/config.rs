//! Tunables for connections and endpoint discovery.
//!
//! Both structs deserialize with every field optional, so a config file only has to mention what
//! it changes.  Durations are written in human form (`"10s"`, `"500ms"`).
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{McpLinkError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long to wait for the `endpoint` event after the event stream is opened
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,

    /// How many lines of the event stream may go by before the `endpoint` event must have arrived
    pub handshake_max_lines: usize,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for each POST to be accepted by the server.  This is only the HTTP exchange; the
    /// wait for the reply on the event stream is governed by the per-call timeout.
    #[serde(with = "humantime_serde")]
    pub post_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub default_call_timeout: Duration,

    /// Longest line accepted on the event stream.  A longer line ends the stream.
    pub max_line_length: usize,

    /// Skip TLS certificate verification.  MCP-Link servers on a local machine are often
    /// reached through a certificate that doesn't match `127.0.0.1`.
    pub accept_invalid_certs: bool,

    /// Honor `HTTPS_PROXY` and friends.  The server is normally on this machine, so by default
    /// it's reached directly.
    pub use_system_proxy: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            handshake_max_lines: 10,
            connect_timeout: Duration::from_secs(30),
            post_timeout: Duration::from_secs(10),
            default_call_timeout: Duration::from_secs(10),
            max_line_length: 8 * 1024 * 1024,
            accept_invalid_certs: false,
            use_system_proxy: false,
        }
    }
}

impl ConnectionConfig {
    pub(crate) fn build_http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        if !self.use_system_proxy {
            builder = builder.no_proxy();
        }

        builder
            .build()
            .map_err(|e| McpLinkError::HttpClient { source: e })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long the helper program gets to print its configuration
    #[serde(with = "humantime_serde")]
    pub helper_timeout: Duration,

    /// Use this manifest instead of searching the browsers' native messaging directories
    pub manifest_path: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            helper_timeout: Duration::from_secs(5),
            manifest_path: None,
        }
    }
}
