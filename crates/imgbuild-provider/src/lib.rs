//! Image build backend trait and implementations for imgbuild
//!
//! This crate provides an abstraction over the container daemon's build
//! endpoint (Docker, or Podman's Docker-compatible API): it takes an outbound
//! context stream and hands back the raw progress feed.

mod docker;
mod error;
mod types;

pub use docker::DockerBackend;
pub use error::*;
pub use types::*;

use async_trait::async_trait;

/// Trait for image build backends
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Start a build.
    ///
    /// `context` is consumed as the request body while the build runs. The
    /// returned stream yields the daemon's progress feed as line-delimited JSON.
    async fn build_image(
        &self,
        context: ContextStream,
        options: &BuildOptions,
    ) -> Result<ProgressStream>;

    /// Check if the backend is available/connected
    async fn ping(&self) -> Result<()>;

    /// Get backend information
    fn info(&self) -> ProviderInfo;
}

/// Connect to a specific backend type
pub async fn create_backend(
    provider_type: ProviderType,
    config: &imgbuild_config::GlobalConfig,
) -> Result<Box<dyn BuildBackend>> {
    match provider_type {
        ProviderType::Docker => {
            let docker = &config.providers.docker;
            let backend = DockerBackend::new(&docker.socket, docker.timeout_secs).await?;
            Ok(Box::new(backend))
        }
        ProviderType::Podman => {
            let podman = &config.providers.podman;
            let backend = DockerBackend::new_podman(&podman.socket, podman.timeout_secs).await?;
            Ok(Box::new(backend))
        }
    }
}

/// Create the backend named in the config, auto-detecting when none is set.
///
/// Auto-detection tries Docker first, then Podman.
pub async fn create_default_backend(
    config: &imgbuild_config::GlobalConfig,
) -> Result<Box<dyn BuildBackend>> {
    let provider_type = match config.defaults.provider.as_str() {
        "podman" => ProviderType::Podman,
        "docker" => ProviderType::Docker,
        _ => {
            tracing::info!("No provider configured, auto-detecting...");
            let (docker, podman) = tokio::join!(
                create_backend(ProviderType::Docker, config),
                create_backend(ProviderType::Podman, config)
            );
            match (docker, podman) {
                (Ok(backend), _) | (Err(_), Ok(backend)) => {
                    tracing::info!("Auto-detected provider: {}", backend.info().provider_type);
                    return Ok(backend);
                }
                (Err(e), Err(_)) => {
                    tracing::warn!("No providers detected, defaulting to Docker");
                    return Err(connection_error(ProviderType::Docker, config, &e));
                }
            }
        }
    };

    create_backend(provider_type, config)
        .await
        .map_err(|e| connection_error(provider_type, config, &e))
}

fn connection_error(
    provider_type: ProviderType,
    config: &imgbuild_config::GlobalConfig,
    underlying: &ProviderError,
) -> ProviderError {
    let socket_path = match provider_type {
        ProviderType::Docker => &config.providers.docker.socket,
        ProviderType::Podman => &config.providers.podman.socket,
    };
    let socket_exists = std::path::Path::new(socket_path).exists();
    ProviderError::ConnectionError(format_connection_error(
        provider_type,
        socket_path,
        socket_exists,
        underlying,
    ))
}

/// Format a connection error message with actionable instructions
fn format_connection_error(
    provider: ProviderType,
    socket_path: &str,
    socket_exists: bool,
    underlying: &ProviderError,
) -> String {
    let provider_name = match provider {
        ProviderType::Podman => "Podman",
        ProviderType::Docker => "Docker",
    };

    let mut msg = format!("Cannot connect to {}\n\n", provider_name);

    if !socket_exists {
        msg.push_str(&format!(
            "The {} API socket was not found at:\n  {}\n\n",
            provider_name, socket_path
        ));

        match provider {
            ProviderType::Podman => {
                msg.push_str("To enable the Podman socket, run:\n");
                msg.push_str("  systemctl --user enable --now podman.socket\n");
            }
            ProviderType::Docker => {
                msg.push_str("To start Docker, run:\n");
                msg.push_str("  sudo systemctl enable --now docker\n");
            }
        }
    } else {
        msg.push_str(&format!(
            "The socket exists at {} but the daemon is not responding.\n\n",
            socket_path
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}
