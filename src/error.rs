use std::io;
use std::path::PathBuf;

use crate::pinning::PinError;

/// Everything that can stop a publishing run.
///
/// Errors tied to a single image carry its file name so the caller can tell
/// which entry broke the run.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("image source not found or unreadable: {path:?}: {source}")]
    NotFound { path: PathBuf, source: io::Error },
    #[error("failed to upload {file}: {source}")]
    Upload { file: String, source: PinError },
    #[error("failed to serialize metadata for {file}: {source}")]
    Serialization { file: String, source: serde_json::Error },
    #[error("invalid static token URI at index {index}: {uri:?}")]
    InvalidTokenUri { index: usize, uri: String },
    #[error("uploads are disabled but no static token URIs are configured")]
    NoStaticTokenUris,
    #[error("missing pinning service credential: {0} is not set")]
    MissingCredential(&'static str),
    #[error("failed to build upload worker pool: {source}")]
    WorkerPool {
        #[from]
        source: rayon::ThreadPoolBuildError,
    },
}

impl PublishError {
    /// File name of the image (or metadata record) the error originated from.
    pub fn file(&self) -> Option<&str> {
        match self {
            PublishError::Upload { file, .. } | PublishError::Serialization { file, .. } => Some(file),
            _ => None,
        }
    }
}
