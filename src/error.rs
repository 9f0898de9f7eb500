use thiserror::Error;

use crate::client::ClientError;

/// Errors produced by the rendering pipeline and its orchestration layer.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Input batch contained an unparseable or out-of-range value.
    /// The whole batch is rejected.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A collaborator request failed; the cycle is aborted.
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
