//! Error types for imgbuild-core

use thiserror::Error;

/// Why a build failed.
///
/// Cloned freely: the first recorded error is handed to the failure hook,
/// to the progress reader and to [`BuildStream::finished`](crate::BuildStream::finished).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The backend refused to start the build
    #[error("Build request failed: {0}")]
    Backend(String),

    /// The daemon reported an error inside the progress feed
    #[error("Build failed: {0}")]
    Daemon(String),

    #[error("Malformed progress data: {0}")]
    Decode(String),

    /// Reading the progress feed failed
    #[error("Progress stream error: {0}")]
    Transport(String),

    /// Assembling or writing the build context failed
    #[error("Build context error: {0}")]
    Context(String),

    #[error("Build stream destroyed: {0}")]
    Destroyed(String),

    #[error("Progress output was dropped before the build finished")]
    OutputClosed,

    /// The `build_stream` hook returned an error
    #[error("Build stream hook failed: {0}")]
    Hook(String),
}

impl From<imgbuild_provider::ProviderError> for BuildError {
    fn from(e: imgbuild_provider::ProviderError) -> Self {
        BuildError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
