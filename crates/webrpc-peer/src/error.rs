//! Engine error types.

use std::io;

use thiserror::Error;
use webrpc_core::RemoteError;
use webrpc_protocol::ProtocolError;

/// Result type for engine operations.
pub type PeerResult<T> = Result<T, PeerError>;

/// Errors surfaced to callers of a [`Peer`](crate::Peer).
#[derive(Debug, Error)]
pub enum PeerError {
    /// Framing or encoding failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The remote side rejected the request.
    #[error("{0}")]
    Remote(#[from] RemoteError),

    /// The connection was closed before the request completed.
    #[error("connection closed")]
    Closed,

    /// No response arrived in time.
    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    /// IO error (socket, file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Socket path already in use.
    #[error("Socket path already in use: {path}")]
    SocketInUse { path: String },

    /// Socket path parent directory does not exist.
    #[error("Socket path parent directory does not exist: {path}")]
    SocketPathInvalid { path: String },
}

impl PeerError {
    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a socket in use error.
    pub fn socket_in_use(path: impl Into<String>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    /// Creates a socket path invalid error.
    pub fn socket_path_invalid(path: impl Into<String>) -> Self {
        Self::SocketPathInvalid { path: path.into() }
    }

    /// Returns the remote error when the peer rejected the request.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(error) => Some(error),
            _ => None,
        }
    }
}

/// A dotted path or chain reference that does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// A path segment traverses a value that is not a mapping.
    #[error("Cannot read properties of {kind} (reading '{segment}') in '{path}'")]
    NotAMapping {
        path: String,
        segment: String,
        kind: &'static str,
    },

    /// A write targets a slot that cannot hold a value.
    #[error("Cannot set '{segment}' on {kind} in '{path}'")]
    NotWritable {
        path: String,
        segment: String,
        kind: &'static str,
    },

    /// A chain reference names a step that has not produced a result.
    #[error("result id#{index} not exists")]
    MissingResult { index: usize },
}

impl From<AddressError> for RemoteError {
    fn from(error: AddressError) -> Self {
        RemoteError::type_error(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_error_becomes_type_error() {
        let error: RemoteError = AddressError::MissingResult { index: 9 }.into();
        assert_eq!(error.name, "TypeError");
        assert_eq!(error.message, "result id#9 not exists");
    }

    #[test]
    fn remote_accessor() {
        let error = PeerError::from(RemoteError::from_parts("Error", "boom", Vec::new()));
        assert_eq!(error.remote().map(|e| e.message.as_str()), Some("boom"));
        assert!(PeerError::Closed.remote().is_none());
        assert_eq!(error.to_string(), "Error: boom");
    }
}
