//! The caller-facing halves of a running build

use crate::latch::FailureLatch;
use crate::{BuildError, BuildSummary, Result};
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};

pub(crate) type Outcome = Option<Result<BuildSummary>>;

/// Handle to a running build.
///
/// Owns the two halves of the build pipeline: a [`ContextWriter`] that feeds
/// the build context to the backend and a [`ProgressReader`] that yields the
/// daemon's progress text. Each half can be taken once; the handle itself is
/// cheap to clone and is also what the `build_stream` hook receives.
#[derive(Clone)]
pub struct BuildStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    context: Mutex<Option<ContextWriter>>,
    output: Mutex<Option<ProgressReader>>,
    latch: Arc<FailureLatch>,
    outcome: watch::Receiver<Outcome>,
}

impl BuildStream {
    pub(crate) fn new(
        context: Option<ContextWriter>,
        output: ProgressReader,
        latch: Arc<FailureLatch>,
        outcome: watch::Receiver<Outcome>,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                context: Mutex::new(context),
                output: Mutex::new(Some(output)),
                latch,
                outcome,
            }),
        }
    }

    /// Take the writable half. `None` if it was already taken.
    pub fn take_context(&self) -> Option<ContextWriter> {
        self.inner
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Take the readable half. `None` if it was already taken.
    ///
    /// The progress channel is bounded: if nobody drains it the build stalls
    /// once it fills up.
    pub fn take_output(&self) -> Option<ProgressReader> {
        self.inner
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Abort the build.
    ///
    /// Recorded as the build's failure unless another failure came first or
    /// the progress output has already ended cleanly.
    pub fn destroy(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.inner.latch.trip_external(BuildError::Destroyed(reason.clone())) {
            tracing::info!("Build stream destroyed: {}", reason);
        }
    }

    /// The first recorded failure, if any
    pub fn error(&self) -> Option<BuildError> {
        self.inner.latch.error()
    }

    /// Wait until the build has settled and every hook has run.
    pub async fn finished(&self) -> Result<BuildSummary> {
        let mut outcome = self.inner.outcome.clone();
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| {
            Err(self.error().unwrap_or_else(|| {
                BuildError::Destroyed("build task ended without an outcome".to_string())
            }))
        })
    }
}

impl std::fmt::Debug for BuildStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildStream")
            .field("error", &self.error())
            .field("settled", &self.inner.latch.is_settled())
            .finish()
    }
}

/// Writable half: build context bytes on their way to the backend.
///
/// Dropping the writer or calling [`finish`](Self::finish) ends the context.
pub struct ContextWriter {
    tx: mpsc::Sender<std::io::Result<Bytes>>,
    latch: Arc<FailureLatch>,
}

impl ContextWriter {
    pub(crate) fn new(tx: mpsc::Sender<std::io::Result<Bytes>>, latch: Arc<FailureLatch>) -> Self {
        Self { tx, latch }
    }

    /// Send one chunk, waiting while the backend is behind.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<()> {
        if let Some(error) = self.latch.error() {
            return Err(error);
        }
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| self.closed_error())
    }

    /// Send `data` split into chunks of at most `chunk_size` bytes
    pub async fn write_chunked(&mut self, data: Bytes, chunk_size: usize) -> Result<()> {
        let chunk_size = chunk_size.max(1);
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            self.write(data.slice(offset..end)).await?;
            offset = end;
        }
        Ok(())
    }

    /// End the context stream
    pub fn finish(self) {}

    /// Give up on the context, failing the build
    pub fn fail(self, reason: impl Into<String>) {
        self.latch.trip_external(BuildError::Context(reason.into()));
    }

    fn closed_error(&self) -> BuildError {
        self.latch.error().unwrap_or_else(|| {
            BuildError::Context("backend stopped reading the build context".to_string())
        })
    }
}

/// Readable half: progress text in the order the daemon produced it.
///
/// Yields `Err` once, after the last line, if the build failed.
pub struct ProgressReader {
    rx: mpsc::Receiver<String>,
    latch: Arc<FailureLatch>,
    done: bool,
}

impl ProgressReader {
    pub(crate) fn new(rx: mpsc::Receiver<String>, latch: Arc<FailureLatch>) -> Self {
        Self {
            rx,
            latch,
            done: false,
        }
    }

    /// Next progress line, `None` when the output has ended
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }

    /// Drain every remaining line
    pub async fn collect_lines(mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await {
            lines.push(line?);
        }
        Ok(lines)
    }
}

impl Stream for ProgressReader {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(line)) => Poll::Ready(Some(Ok(line))),
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(self.latch.error().map(Err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_pair(capacity: usize) -> (mpsc::Sender<String>, ProgressReader, Arc<FailureLatch>) {
        let latch = Arc::new(FailureLatch::new());
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ProgressReader::new(rx, latch.clone()), latch)
    }

    #[tokio::test]
    async fn test_reader_ends_cleanly() {
        let (tx, reader, _latch) = reader_pair(4);
        tx.send("a\n".to_string()).await.unwrap();
        tx.send("b\n".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(reader.collect_lines().await.unwrap(), vec!["a\n", "b\n"]);
    }

    #[tokio::test]
    async fn test_reader_reports_failure_after_buffered_lines() {
        let (tx, mut reader, latch) = reader_pair(4);
        tx.send("a\n".to_string()).await.unwrap();
        latch.trip(BuildError::Daemon("no space left".into()));
        drop(tx);

        assert_eq!(reader.next_line().await.unwrap().unwrap(), "a\n");
        assert_eq!(
            reader.next_line().await.unwrap().unwrap_err(),
            BuildError::Daemon("no space left".into())
        );
        assert!(reader.next_line().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_chunks_data() {
        let latch = Arc::new(FailureLatch::new());
        let (tx, mut rx) = mpsc::channel(16);
        let mut writer = ContextWriter::new(tx, latch);

        writer
            .write_chunked(Bytes::from_static(b"0123456789"), 4)
            .await
            .unwrap();
        writer.finish();

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec![&b"0123"[..], &b"4567"[..], &b"89"[..]]);
    }

    #[tokio::test]
    async fn test_writer_refuses_after_failure() {
        let latch = Arc::new(FailureLatch::new());
        let (tx, _rx) = mpsc::channel(16);
        let mut writer = ContextWriter::new(tx, latch.clone());

        latch.trip(BuildError::Destroyed("cancelled".into()));
        assert_eq!(
            writer.write(Bytes::from_static(b"x")).await.unwrap_err(),
            BuildError::Destroyed("cancelled".into())
        );
    }

    #[tokio::test]
    async fn test_writer_fail_records_context_error() {
        let latch = Arc::new(FailureLatch::new());
        let (tx, _rx) = mpsc::channel(16);
        ContextWriter::new(tx, latch.clone()).fail("disk read error");
        assert_eq!(
            latch.error(),
            Some(BuildError::Context("disk read error".into()))
        );
    }

    #[tokio::test]
    async fn test_writer_closed_backend() {
        let latch = Arc::new(FailureLatch::new());
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let mut writer = ContextWriter::new(tx, latch);
        assert!(matches!(
            writer.write(Bytes::from_static(b"x")).await,
            Err(BuildError::Context(_))
        ));
    }
}
