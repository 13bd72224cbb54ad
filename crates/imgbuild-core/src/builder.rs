//! Build orchestration
//!
//! A build runs as one spawned task that joins two concurrent pieces of work:
//!
//! 1. the pipeline: the backend's build call consumes the context stream,
//!    and its progress feed is parsed into progress text (sent to the
//!    [`ProgressReader`](crate::ProgressReader)) and session facts.
//! 2. the `build_stream` hook, handed the [`BuildStream`] so the caller can
//!    attach consumers.
//!
//! Every failure source reports into one [`FailureLatch`]. The first report
//! wins, aborts the pipeline (dropping the backend's progress feed and the
//! context receiver) and ends the progress output with that error. Once both
//! pieces have settled, exactly one of `build_success` / `build_failure` runs.

use crate::context::{collect_context_files, pack_context};
use crate::hooks::run_hook;
use crate::latch::FailureLatch;
use crate::stream::Outcome;
use crate::{
    BuildError, BuildSession, BuildStream, ContextWriter, ErrorHandler, Hooks, ProgressParser,
    ProgressReader, Result,
};
use bytes::Bytes;
use futures::StreamExt;
use imgbuild_config::{BuildDefaults, GlobalConfig};
use imgbuild_provider::{BuildBackend, BuildOptions, ContextStream};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Channel sizing for the two halves of a build
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Bounded capacity of the context and progress channels
    pub channel_capacity: usize,
    /// Chunk size used when feeding an in-memory archive
    pub chunk_size: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&BuildDefaults::default())
    }
}

impl From<&BuildDefaults> for StreamSettings {
    fn from(defaults: &BuildDefaults) -> Self {
        Self {
            channel_capacity: defaults.channel_capacity.max(1),
            chunk_size: defaults.context_chunk_size.max(1),
        }
    }
}

/// Starts image builds against a backend
#[derive(Clone)]
pub struct Builder {
    backend: Arc<dyn BuildBackend>,
    settings: StreamSettings,
}

impl Builder {
    pub fn new(backend: Arc<dyn BuildBackend>) -> Self {
        Self {
            backend,
            settings: StreamSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: StreamSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Connect to the backend described by `config`
    pub async fn connect(config: &GlobalConfig) -> Result<Self> {
        let backend = imgbuild_provider::create_default_backend(config).await?;
        Ok(Self::new(Arc::from(backend)).with_settings(StreamSettings::from(&config.build)))
    }

    pub fn backend(&self) -> &Arc<dyn BuildBackend> {
        &self.backend
    }

    /// Start a build whose context the caller writes through
    /// [`BuildStream::take_context`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_build_stream(
        &self,
        options: BuildOptions,
        hooks: Hooks,
        handler: ErrorHandler,
    ) -> BuildStream {
        let (stream, _) = self.start(options, hooks, handler, false);
        stream
    }

    /// Pack `dir` into a build context and build it.
    ///
    /// Fails before any build starts if a file cannot be read.
    pub async fn build_dir(
        &self,
        dir: impl AsRef<Path>,
        options: BuildOptions,
        hooks: Hooks,
        handler: ErrorHandler,
    ) -> Result<BuildStream> {
        let files = collect_context_files(dir.as_ref()).await?;
        let archive = Bytes::from(pack_context(&files)?);
        tracing::debug!(
            "Packed {} files into a {} byte build context",
            files.len(),
            archive.len()
        );

        let (stream, writer) = self.start(options, hooks, handler, true);
        if let Some(mut writer) = writer {
            let chunk_size = self.settings.chunk_size;
            tokio::spawn(async move {
                match writer.write_chunked(archive, chunk_size).await {
                    Ok(()) => writer.finish(),
                    Err(e) => tracing::debug!("Stopped sending build context: {}", e),
                }
            });
        }

        Ok(stream)
    }

    fn start(
        &self,
        options: BuildOptions,
        hooks: Hooks,
        handler: ErrorHandler,
        reserve_context: bool,
    ) -> (BuildStream, Option<ContextWriter>) {
        let latch = Arc::new(FailureLatch::new());
        let (context_tx, context_rx) = mpsc::channel(self.settings.channel_capacity);
        let (output_tx, output_rx) = mpsc::channel(self.settings.channel_capacity);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let writer = ContextWriter::new(context_tx, latch.clone());
        let (stream_writer, reserved) = if reserve_context {
            (None, Some(writer))
        } else {
            (Some(writer), None)
        };
        let stream = BuildStream::new(
            stream_writer,
            ProgressReader::new(output_rx, latch.clone()),
            latch.clone(),
            outcome_rx,
        );

        let run = BuildRun {
            backend: self.backend.clone(),
            options,
            hooks,
            handler,
            latch,
        };
        tokio::spawn(run.execute(stream.clone(), context_rx, output_tx, outcome_tx));

        (stream, reserved)
    }
}

/// Everything one build task owns
struct BuildRun {
    backend: Arc<dyn BuildBackend>,
    options: BuildOptions,
    hooks: Hooks,
    handler: ErrorHandler,
    latch: Arc<FailureLatch>,
}

impl BuildRun {
    async fn execute(
        self,
        stream: BuildStream,
        context_rx: mpsc::Receiver<std::io::Result<Bytes>>,
        output_tx: mpsc::Sender<String>,
        outcome_tx: watch::Sender<Outcome>,
    ) {
        let BuildRun {
            backend,
            options,
            mut hooks,
            handler,
            latch,
        } = self;
        tracing::info!("Starting image build (tag={:?})", options.tag);

        let mut session = BuildSession::new();
        let stream_hook = hooks.build_stream.take().map(|hook| hook(stream));

        {
            let session = &mut session;
            let build = async {
                tokio::select! {
                    result = pump_progress(
                        backend.as_ref(),
                        &options,
                        context_stream(context_rx),
                        output_tx,
                        session,
                        &latch,
                    ) => result,
                    error = latch.tripped() => Err(error),
                }
            };
            let stream_hook = async {
                if let Err(e) = run_hook("build_stream", stream_hook, &handler).await {
                    latch.trip(BuildError::Hook(format!("{:#}", e)));
                }
            };
            let (build_result, ()) = tokio::join!(build, stream_hook);
            if let Err(e) = build_result {
                latch.trip(e);
            }
        }

        let summary = session.summary();
        let outcome = match latch.settle() {
            None => {
                tracing::info!(
                    "Build succeeded: {} layers, last layer {:?}",
                    summary.layers.len(),
                    summary.last_layer
                );
                let hook = hooks.build_success.take().map(|hook| {
                    hook(
                        summary.last_layer.clone(),
                        summary.layers.clone(),
                        summary.from_tags.clone(),
                    )
                });
                // Hook errors go to the handler only; the build itself succeeded
                let _ = run_hook("build_success", hook, &handler).await;
                Ok(summary)
            }
            Some(error) => {
                tracing::warn!(
                    "Build failed after {} layers: {}",
                    summary.layers.len(),
                    error
                );
                let hook = hooks.build_failure.take().map(|hook| {
                    hook(
                        error.clone(),
                        summary.layers.clone(),
                        summary.from_tags.clone(),
                    )
                });
                let _ = run_hook("build_failure", hook, &handler).await;
                Err(error)
            }
        };

        outcome_tx.send_replace(Some(outcome));
    }
}

fn context_stream(rx: mpsc::Receiver<std::io::Result<Bytes>>) -> ContextStream {
    futures::stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((chunk, rx))
    })
    .boxed()
}

/// Run the backend build and forward parsed progress until the feed ends.
///
/// On failure the error is recorded before the output sender is dropped, so
/// readers always see the failure when their stream ends.
async fn pump_progress(
    backend: &dyn BuildBackend,
    options: &BuildOptions,
    context: ContextStream,
    output: mpsc::Sender<String>,
    session: &mut BuildSession,
    latch: &FailureLatch,
) -> Result<()> {
    let result = async {
        let feed = backend.build_image(context, options).await?;
        let mut parser = ProgressParser::new(feed, &mut *session);
        while let Some(line) = parser.next_line().await? {
            tracing::debug!("{}", line.trim_end());
            output
                .send(line)
                .await
                .map_err(|_| BuildError::OutputClosed)?;
        }
        // A failure recorded elsewhere still fails a feed that ended cleanly.
        // Past this point the reader ends cleanly and external aborts are refused.
        match latch.complete() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
    .await;

    if let Err(e) = &result {
        latch.trip(e.clone());
    }
    drop(output);
    result
}
