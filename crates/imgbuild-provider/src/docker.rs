//! Docker build backend implementation using bollard

use crate::{
    BuildBackend, BuildOptions, ContextStream, ProgressStream, ProviderError, ProviderInfo,
    ProviderType, Result,
};
use async_trait::async_trait;
use bollard::image::BuildImageOptions;
use bollard::models::BuildInfo;
use bollard::Docker;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;

/// Build backend talking to a Docker-compatible daemon through bollard
pub struct DockerBackend {
    client: Docker,
    provider_type: ProviderType,
    endpoint: String,
}

impl DockerBackend {
    /// Connect to a Docker daemon and verify it responds
    pub async fn new(socket_path: &str, timeout_secs: u64) -> Result<Self> {
        let client = if socket_path.starts_with("unix://") || socket_path.starts_with('/') {
            let path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else if socket_path.starts_with("http://") || socket_path.starts_with("https://") {
            Docker::connect_with_http(socket_path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else {
            // Assume it's a unix socket path
            Docker::connect_with_socket(socket_path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        };

        client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            provider_type: ProviderType::Docker,
            endpoint: socket_path.to_string(),
        })
    }

    /// Connect to Podman's Docker-compatible API
    pub async fn new_podman(socket_path: &str, timeout_secs: u64) -> Result<Self> {
        let mut backend = Self::new(socket_path, timeout_secs).await?;
        backend.provider_type = ProviderType::Podman;
        Ok(backend)
    }
}

#[async_trait]
impl BuildBackend for DockerBackend {
    async fn build_image(
        &self,
        context: ContextStream,
        options: &BuildOptions,
    ) -> Result<ProgressStream> {
        let request = build_request(options)?;
        let tar = collect_context(context).await?;
        tracing::debug!(
            "Starting {} build (tag={:?}, dockerfile={}, context={} bytes)",
            self.provider_type,
            options.tag,
            options.dockerfile,
            tar.len()
        );

        // The bollard stream borrows its client, so it is driven from a task
        // that owns a clone and forwards each encoded line.
        let client = self.client.clone();
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(32);
        tokio::spawn(async move {
            let mut stream = client.build_image(request, None, Some(tar));
            while let Some(item) = stream.next().await {
                let line = encode_progress_line(item);
                let failed = line.is_err();
                if tx.send(line).await.is_err() || failed {
                    break;
                }
            }
        });

        let feed = futures::stream::unfold(rx, |mut rx| async move {
            let line = rx.recv().await?;
            Some((line, rx))
        });
        Ok(feed.boxed())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: self.provider_type,
            api_version: bollard::API_DEFAULT_VERSION.to_string(),
            endpoint: self.endpoint.clone(),
        }
    }
}

fn build_request(options: &BuildOptions) -> Result<BuildImageOptions<String>> {
    if options.dockerfile.trim().is_empty() {
        return Err(ProviderError::InvalidOptions(
            "dockerfile path cannot be empty".to_string(),
        ));
    }
    if let Some(tag) = &options.tag {
        if tag.is_empty() || tag.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ProviderError::InvalidOptions(format!(
                "invalid image tag: {:?}",
                tag
            )));
        }
    }

    Ok(BuildImageOptions {
        dockerfile: options.dockerfile.clone(),
        t: options.tag.clone().unwrap_or_default(),
        buildargs: options.build_args.clone(),
        labels: options.labels.clone(),
        cachefrom: options.cache_from.clone(),
        nocache: options.no_cache,
        pull: options.pull,
        rm: options.rm,
        ..Default::default()
    })
}

/// Read the whole context stream into one request body
async fn collect_context(mut context: ContextStream) -> Result<Bytes> {
    let mut tar = BytesMut::new();
    while let Some(chunk) = context.next().await {
        tar.extend_from_slice(&chunk?);
    }
    Ok(tar.freeze())
}

/// Re-frame one decoded daemon message as a JSON line.
///
/// bollard decodes the daemon's feed for us; the build pipeline parses the
/// wire format itself, so each message is written back in the shape the
/// daemon sent. Errors the daemon reported in-band or through an HTTP error
/// status become `{"error": ...}` lines so they surface as build failures
/// rather than transport failures.
fn encode_progress_line(
    item: std::result::Result<BuildInfo, bollard::errors::Error>,
) -> std::io::Result<Bytes> {
    let value = match item {
        Ok(info) => build_info_json(info),
        Err(bollard::errors::Error::DockerStreamError { error }) => {
            serde_json::json!({ "error": error })
        }
        Err(bollard::errors::Error::DockerResponseServerError { message, .. }) => {
            serde_json::json!({ "error": message })
        }
        Err(e) => return Err(std::io::Error::other(e.to_string())),
    };

    let mut line = serde_json::to_vec(&value).map_err(std::io::Error::other)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

fn build_info_json(info: BuildInfo) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    if let Some(stream) = info.stream {
        object.insert("stream".into(), stream.into());
    }
    if let Some(error) = info.error {
        object.insert("error".into(), error.into());
    }
    if let Some(status) = info.status {
        object.insert("status".into(), status.into());
    }
    if let Some(id) = info.aux.and_then(|aux| aux.id) {
        object.insert("aux".into(), serde_json::json!({ "ID": id }));
    }
    serde_json::Value::Object(object)
}
