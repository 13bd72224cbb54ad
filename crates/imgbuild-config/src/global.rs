//! Global configuration for imgbuild
//!
//! Located at `~/.config/imgbuild/config.toml`

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global imgbuild configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub defaults: DefaultsConfig,
    pub providers: ProvidersConfig,
    pub build: BuildDefaults,
}

/// Default settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Container backend ("docker" or "podman"), empty means auto-detect
    pub provider: String,
}

/// Backend-specific configurations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub docker: DockerConfig,
    pub podman: PodmanConfig,
}

/// Docker daemon connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Socket path or `http://` URL
    pub socket: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            timeout_secs: 120,
        }
    }
}

/// Podman API connection (Docker-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodmanConfig {
    pub socket: String,
    pub timeout_secs: u64,
}

impl Default for PodmanConfig {
    fn default() -> Self {
        Self {
            socket: default_podman_socket(),
            timeout_secs: 120,
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

#[cfg(target_os = "linux")]
fn default_podman_socket() -> String {
    std::env::var("XDG_RUNTIME_DIR")
        .map(|dir| format!("{}/podman/podman.sock", dir))
        .unwrap_or_else(|_| "/run/user/1000/podman/podman.sock".to_string())
}

#[cfg(not(target_os = "linux"))]
fn default_podman_socket() -> String {
    "/var/run/podman.sock".to_string()
}

/// Defaults applied to every build unless overridden on the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildDefaults {
    /// Dockerfile name, relative to the build context
    pub dockerfile: String,
    /// Always attempt to pull newer base images
    pub pull: bool,
    /// Do not use the build cache
    pub no_cache: bool,
    /// Size of each chunk written into the context stream
    pub context_chunk_size: usize,
    /// Bounded capacity of the context and progress channels
    pub channel_capacity: usize,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            dockerfile: "Dockerfile".to_string(),
            pull: false,
            no_cache: false,
            context_chunk_size: 64 * 1024,
            channel_capacity: 32,
        }
    }
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;

        tracing::debug!(
            "Loaded config from {:?}: provider={:?}",
            path,
            config.defaults.provider
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "imgbuild").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        match self.defaults.provider.as_str() {
            "" | "docker" | "podman" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown provider '{}', expected docker or podman",
                    other
                )))
            }
        }
        if self.build.context_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "build.context_chunk_size must be greater than zero".into(),
            ));
        }
        if self.build.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "build.channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert!(config.defaults.provider.is_empty(), "Provider should be empty for auto-detection");
        assert_eq!(config.build.dockerfile, "Dockerfile");
        assert_eq!(config.providers.docker.timeout_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[defaults]
provider = "podman"

[providers.docker]
socket = "http://127.0.0.1:2375"

[build]
pull = true
channel_capacity = 8
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.defaults.provider, "podman");
        assert_eq!(config.providers.docker.socket, "http://127.0.0.1:2375");
        assert!(config.build.pull);
        assert_eq!(config.build.channel_capacity, 8);
        // Unspecified fields keep their defaults
        assert_eq!(config.build.dockerfile, "Dockerfile");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = GlobalConfig::load_from(&tmp.path().join("nope.toml")).unwrap();
        assert!(config.defaults.provider.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let mut config = GlobalConfig::default();
        config.defaults.provider = "docker".to_string();
        config.build.no_cache = true;
        config.save_to(&path).unwrap();

        let loaded = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(loaded.defaults.provider, "docker");
        assert!(loaded.build.no_cache);
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[defaults]\nprovider = \"lxc\"\n").unwrap();

        let err = GlobalConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_channel_capacity() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[build]\nchannel_capacity = 0\n").unwrap();

        assert!(GlobalConfig::load_from(&path).is_err());
    }
}
