//! Lifecycle hooks supplied by the caller

use crate::{BuildError, BuildStream, FromTag};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Outcome of a hook
pub type HookResult = anyhow::Result<()>;

type HookFuture = BoxFuture<'static, HookResult>;
type StreamHook = Box<dyn FnOnce(BuildStream) -> HookFuture + Send>;
type SuccessHook =
    Box<dyn FnOnce(Option<String>, Vec<String>, Vec<FromTag>) -> HookFuture + Send>;
type FailureHook = Box<dyn FnOnce(BuildError, Vec<String>, Vec<FromTag>) -> HookFuture + Send>;

/// Callbacks invoked at the milestones of one build. Each is optional and
/// runs at most once.
///
/// - `build_stream` receives the build's [`BuildStream`] as soon as the
///   build starts, so the caller can attach a progress consumer or write the
///   context. It runs concurrently with the build; the build is not settled
///   until it returns. An error here fails the build.
/// - `build_success` receives the last layer, all layers and the base images.
/// - `build_failure` receives the first recorded error and whatever layers
///   and base images were collected before it.
#[derive(Default)]
pub struct Hooks {
    pub(crate) build_stream: Option<StreamHook>,
    pub(crate) build_success: Option<SuccessHook>,
    pub(crate) build_failure: Option<FailureHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_build_stream<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(BuildStream) -> Fut + Send + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.build_stream = Some(Box::new(move |stream| {
            async move { hook(stream).await }.boxed()
        }));
        self
    }

    pub fn on_build_success<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Option<String>, Vec<String>, Vec<FromTag>) -> Fut + Send + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.build_success = Some(Box::new(move |last, layers, tags| {
            async move { hook(last, layers, tags).await }.boxed()
        }));
        self
    }

    pub fn on_build_failure<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(BuildError, Vec<String>, Vec<FromTag>) -> Fut + Send + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.build_failure = Some(Box::new(move |error, layers, tags| {
            async move { hook(error, layers, tags).await }.boxed()
        }));
        self
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("build_stream", &self.build_stream.is_some())
            .field("build_success", &self.build_success.is_some())
            .field("build_failure", &self.build_failure.is_some())
            .finish()
    }
}

/// Receives errors raised by hooks. Must not panic.
#[derive(Clone)]
pub struct ErrorHandler(Arc<dyn Fn(&anyhow::Error) + Send + Sync>);

impl ErrorHandler {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        Self(Arc::new(handler))
    }

    pub(crate) fn report(&self, error: &anyhow::Error) {
        (self.0)(error)
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(|error| tracing::warn!("Build hook failed: {:#}", error))
    }
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ErrorHandler")
    }
}

/// Run a hook if one was registered, reporting errors and panics to `handler`.
pub(crate) async fn run_hook(
    name: &str,
    hook: Option<HookFuture>,
    handler: &ErrorHandler,
) -> HookResult {
    let Some(hook) = hook else {
        return Ok(());
    };

    let result = match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "{} hook panicked: {}",
            name,
            panic_message(panic.as_ref())
        )),
    };

    if let Err(e) = &result {
        handler.report(e);
    }
    result
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
