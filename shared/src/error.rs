//! Common error types shared across services.

use thiserror::Error;

/// Failures raised by the object-store gateway.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no such key: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },
    #[error("object store transport error: {0}")]
    Transport(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by the work-queue gateway.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),
}

/// Failures raised while translating a job descriptor into a prepared job.
#[derive(Error, Debug)]
pub enum TranslateError {
    /// Files the descriptor promised but the object store lacks.
    #[error("missing input files: {0:?}")]
    MissingFiles(Vec<String>),
    /// The descriptor itself is malformed or inconsistent.
    #[error("invalid job descriptor: {0}")]
    InvalidDescriptor(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
