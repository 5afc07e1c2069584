//! CLI error types.

use thiserror::Error;
use webrpc_core::{RemoteError, TracingError};
use webrpc_peer::PeerError;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that end a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Engine or connection failure, including remote rejections.
    #[error("{0}")]
    Peer(#[from] PeerError),

    /// A pipe was failed by the remote side.
    #[error("{0}")]
    Remote(#[from] RemoteError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Output could not be rendered.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    /// Logging could not be set up.
    #[error("{0}")]
    Tracing(#[from] TracingError),
}
