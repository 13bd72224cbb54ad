//! Error types for build backends

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to connect to container runtime: {0}")]
    ConnectionError(String),

    #[error("Build request rejected: {0}")]
    BuildRejected(String),

    #[error("Invalid build options: {0}")]
    InvalidOptions(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
