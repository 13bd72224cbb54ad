//! Common types for build backends

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outbound build context: the archive bytes sent to the backend
pub type ContextStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Inbound progress feed: raw line-delimited JSON as produced by the daemon
pub type ProgressStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Container backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Docker,
    Podman,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Podman => write!(f, "podman"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(format!("Unknown provider type: {}", s)),
        }
    }
}

/// Options forwarded verbatim to the backend's build call.
///
/// Nothing in the build pipeline interprets these; they only shape the
/// request the backend sends to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Image tag (`name:tag`)
    pub tag: Option<String>,
    /// Dockerfile path, relative to the context root
    pub dockerfile: String,
    /// Build arguments
    pub build_args: HashMap<String, String>,
    /// Labels to apply
    pub labels: HashMap<String, String>,
    /// Images to use as cache sources
    pub cache_from: Vec<String>,
    /// No cache
    pub no_cache: bool,
    /// Pull base image
    pub pull: bool,
    /// Remove intermediate containers after a successful build
    pub rm: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            tag: None,
            dockerfile: "Dockerfile".to_string(),
            build_args: HashMap::new(),
            labels: HashMap::new(),
            cache_from: Vec::new(),
            no_cache: false,
            pull: false,
            rm: true,
        }
    }
}

impl BuildOptions {
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }
}

/// Backend information
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub provider_type: ProviderType,
    pub api_version: String,
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_roundtrip() {
        assert_eq!("Docker".parse::<ProviderType>().unwrap(), ProviderType::Docker);
        assert_eq!("podman".parse::<ProviderType>().unwrap(), ProviderType::Podman);
        assert!("lxc".parse::<ProviderType>().is_err());
        assert_eq!(ProviderType::Podman.to_string(), "podman");
    }

    #[test]
    fn test_build_options_builder() {
        let opts = BuildOptions::default()
            .tag("app:1.0")
            .build_arg("VERSION", "1.0");

        assert_eq!(opts.tag.as_deref(), Some("app:1.0"));
        assert_eq!(opts.build_args.get("VERSION").unwrap(), "1.0");
        assert_eq!(opts.dockerfile, "Dockerfile");
        assert!(opts.rm);
    }
}
