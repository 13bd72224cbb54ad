//! Test support utilities for imgbuild-core
//!
//! Provides MockBackend and helpers for testing the build pipeline without a
//! container daemon.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use imgbuild_provider::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    BuildImage { tag: Option<String>, dockerfile: String },
    Ping,
}

/// One item of the scripted progress feed
#[derive(Debug, Clone)]
pub enum MockChunk {
    Data(Bytes),
    /// The feed fails with an I/O error
    TransportError(String),
}

/// Configurable mock build backend.
///
/// Like a real daemon it reads the whole build context before it produces
/// any progress, then replays the scripted chunks.
pub struct MockBackend {
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    /// If set, `build_image` is rejected with this message
    pub reject_with: Arc<Mutex<Option<String>>>,
    /// Progress feed replayed for each build
    pub chunks: Arc<Mutex<Vec<MockChunk>>>,
    /// Keep the feed open after the script instead of ending it
    pub hold_open: Arc<Mutex<bool>>,
    received_context: Arc<Mutex<Vec<u8>>>,
    delivered: Arc<AtomicUsize>,
}

impl MockBackend {
    /// A backend whose feed ends immediately
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            reject_with: Arc::new(Mutex::new(None)),
            chunks: Arc::new(Mutex::new(Vec::new())),
            hold_open: Arc::new(Mutex::new(false)),
            received_context: Arc::new(Mutex::new(Vec::new())),
            delivered: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replay each line as its own chunk
    pub fn with_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let backend = Self::new();
        *backend.chunks.lock().unwrap() = lines
            .iter()
            .map(|l| MockChunk::Data(Bytes::from(l.as_ref().to_string())))
            .collect();
        backend
    }

    pub fn with_chunks(chunks: Vec<MockChunk>) -> Self {
        let backend = Self::new();
        *backend.chunks.lock().unwrap() = chunks;
        backend
    }

    /// Reject every build call
    pub fn rejecting(message: &str) -> Self {
        let backend = Self::new();
        *backend.reject_with.lock().unwrap() = Some(message.to_string());
        backend
    }

    pub fn holding_open(self) -> Self {
        *self.hold_open.lock().unwrap() = true;
        self
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Context bytes received so far
    pub fn received_context(&self) -> Vec<u8> {
        self.received_context.lock().unwrap().clone()
    }

    /// How many feed chunks the consumer has pulled
    pub fn delivered_chunks(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildBackend for MockBackend {
    async fn build_image(
        &self,
        mut context: ContextStream,
        options: &BuildOptions,
    ) -> Result<ProgressStream> {
        self.record(MockCall::BuildImage {
            tag: options.tag.clone(),
            dockerfile: options.dockerfile.clone(),
        });

        if let Some(message) = self.reject_with.lock().unwrap().clone() {
            return Err(ProviderError::BuildRejected(message));
        }

        let chunks = self.chunks.lock().unwrap().clone();
        let hold_open = *self.hold_open.lock().unwrap();
        let received = self.received_context.clone();
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(1);

        tokio::spawn(async move {
            while let Some(chunk) = context.next().await {
                match chunk {
                    Ok(bytes) => received.lock().unwrap().extend_from_slice(&bytes),
                    Err(_) => return,
                }
            }
            for chunk in chunks {
                let item = match chunk {
                    MockChunk::Data(bytes) => Ok(bytes),
                    MockChunk::TransportError(msg) => Err(std::io::Error::other(msg)),
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
            if hold_open {
                tx.closed().await;
            }
        });

        let delivered = self.delivered.clone();
        let feed = futures::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
        .inspect(move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
        });

        Ok(feed.boxed())
    }

    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: ProviderType::Docker,
            api_version: "mock".to_string(),
            endpoint: "mock://".to_string(),
        }
    }
}

/// A progress unit carrying `text`, as the daemon frames it
pub fn stream_line(text: &str) -> String {
    format!("{}\n", serde_json::json!({ "stream": text }))
}

/// A progress unit reporting a build error
pub fn error_line(message: &str) -> String {
    format!(
        "{}\n",
        serde_json::json!({ "error": message, "errorDetail": { "message": message } })
    )
}
