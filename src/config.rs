//! Storage configuration
//!
//! Typed view of the options the host platform passes to the plugin.
//! Field spellings follow the platform's option names (`api-token`,
//! `ssl-verify`, ...), so a storage definition deserializes directly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Default array management port
pub const DEFAULT_API_PORT: u16 = 443;

/// Bounds for the device discovery deadline, in seconds
pub const DEVICE_TIMEOUT_MIN_SECS: u64 = 10;
pub const DEVICE_TIMEOUT_MAX_SECS: u64 = 300;
pub const DEVICE_TIMEOUT_DEFAULT_SECS: u64 = 60;

// =============================================================================
// Protocol / Host Mode
// =============================================================================

/// SAN transport protocol between this node and the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanProtocolKind {
    Iscsi,
    Fc,
}

impl Default for SanProtocolKind {
    fn default() -> Self {
        SanProtocolKind::Iscsi
    }
}

impl std::fmt::Display for SanProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SanProtocolKind::Iscsi => write!(f, "iscsi"),
            SanProtocolKind::Fc => write!(f, "fc"),
        }
    }
}

/// How initiators of this cluster are grouped into array Host objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostMode {
    /// One array Host per cluster node (required for live migration)
    PerNode,
    /// A single shared array Host holding every node's initiators
    Shared,
}

impl Default for HostMode {
    fn default() -> Self {
        HostMode::PerNode
    }
}

impl std::fmt::Display for HostMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostMode::PerNode => write!(f, "per-node"),
            HostMode::Shared => write!(f, "shared"),
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// Configuration for one storage definition backed by a FlashArray
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Host-side storage identifier (becomes part of every array name)
    pub storage: String,
    /// Array management host or IP
    pub portal: String,
    /// Array management port
    #[serde(default = "default_port")]
    pub port: u16,
    /// API token; alternative to username+password
    #[serde(default)]
    pub api_token: Option<String>,
    /// Username, used with `password` to bootstrap an api-token
    #[serde(default)]
    pub username: Option<String>,
    /// Password for `username`
    #[serde(default)]
    pub password: Option<String>,
    /// Verify the array's TLS certificate
    #[serde(default)]
    pub ssl_verify: bool,
    /// SAN transport protocol
    #[serde(default)]
    pub protocol: SanProtocolKind,
    /// Host registration mode
    #[serde(default)]
    pub host_mode: HostMode,
    /// Cluster name used in array Host object names
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// Seconds to wait for a block device to materialize (clamped 10-300)
    #[serde(default = "default_device_timeout")]
    pub device_timeout: u64,
    /// ActiveCluster pod; when set, all array names are `{pod}::{name}`
    #[serde(default)]
    pub pod: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_cluster_name() -> String {
    "pve".to_string()
}

fn default_device_timeout() -> u64 {
    DEVICE_TIMEOUT_DEFAULT_SECS
}

impl StorageConfig {
    /// Validate required fields and clamp bounded ones.
    pub fn validate(&mut self) -> Result<()> {
        if self.storage.is_empty() {
            return Err(Error::Configuration("storage id must not be empty".into()));
        }
        if self.portal.is_empty() {
            return Err(Error::Configuration("portal is required".into()));
        }
        if self.api_token.is_none() && (self.username.is_none() || self.password.is_none()) {
            return Err(Error::Configuration(
                "either api-token or username+password must be configured".into(),
            ));
        }
        if let Some(pod) = &self.pod {
            if pod.contains("::") {
                return Err(Error::Configuration(format!(
                    "pod name must not contain '::': {pod}"
                )));
            }
        }
        self.device_timeout = self
            .device_timeout
            .clamp(DEVICE_TIMEOUT_MIN_SECS, DEVICE_TIMEOUT_MAX_SECS);
        Ok(())
    }

    /// Device discovery deadline as a [`Duration`]
    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout)
    }

    /// Base URL of the array management endpoint
    pub fn endpoint(&self) -> String {
        format!("https://{}:{}", self.portal, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> StorageConfig {
        serde_json::from_value(serde_json::json!({
            "storage": "pure1",
            "portal": "192.168.10.5",
            "api-token": "deadbeef-0000",
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = minimal();
        assert_eq!(cfg.port, 443);
        assert_eq!(cfg.protocol, SanProtocolKind::Iscsi);
        assert_eq!(cfg.host_mode, HostMode::PerNode);
        assert_eq!(cfg.cluster_name, "pve");
        assert_eq!(cfg.device_timeout, 60);
        assert!(!cfg.ssl_verify);
        assert!(cfg.pod.is_none());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut cfg = minimal();
        cfg.api_token = None;
        assert!(cfg.validate().is_err());

        cfg.username = Some("pveuser".into());
        cfg.password = Some("secret".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_device_timeout_clamped() {
        let mut cfg = minimal();
        cfg.device_timeout = 5;
        cfg.validate().unwrap();
        assert_eq!(cfg.device_timeout, 10);

        cfg.device_timeout = 900;
        cfg.validate().unwrap();
        assert_eq!(cfg.device_timeout, 300);
    }

    #[test]
    fn test_pod_rejects_separator() {
        let mut cfg = minimal();
        cfg.pod = Some("my::pod".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_kebab_case_options() {
        let cfg: StorageConfig = serde_json::from_value(serde_json::json!({
            "storage": "flash",
            "portal": "array.example.com",
            "username": "admin",
            "password": "x",
            "ssl-verify": true,
            "host-mode": "shared",
            "protocol": "fc",
            "cluster-name": "lab",
            "device-timeout": 120,
            "pod": "metro",
        }))
        .unwrap();
        assert!(cfg.ssl_verify);
        assert_eq!(cfg.host_mode, HostMode::Shared);
        assert_eq!(cfg.protocol, SanProtocolKind::Fc);
        assert_eq!(cfg.cluster_name, "lab");
        assert_eq!(cfg.pod.as_deref(), Some("metro"));
    }
}
