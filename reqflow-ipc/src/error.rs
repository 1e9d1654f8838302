//! IPC error types

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors raised by the process channel and the worker loop
#[derive(Debug, Error)]
pub enum IpcError {
    /// The child process could not be started
    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer is gone: pipe closed, process exited or channel terminated
    #[error("Connection closed")]
    ConnectionClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A line arrived that is not a well-formed message
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// A second request was attempted before the first was answered
    #[error("Request {0} is still awaiting its response")]
    RequestOutstanding(JsonValue),

    /// The response does not answer the outstanding request
    #[error("Response id {actual} does not match request id {expected}")]
    CorrelationMismatch {
        expected: JsonValue,
        actual: JsonValue,
    },
}

impl IpcError {
    /// Whether the failure is in the transport itself rather than in a message
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IpcError::Spawn { .. } | IpcError::Io(_) | IpcError::ConnectionClosed
        )
    }

    /// Map a pipe error, folding broken pipes into `ConnectionClosed`
    pub(crate) fn from_pipe(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof => IpcError::ConnectionClosed,
            _ => IpcError::Io(err),
        }
    }
}

/// Errors a worker handler returns; reported to the caller as `{error, trace}`
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Failed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transport_class() {
        assert!(IpcError::ConnectionClosed.is_transport());
        assert!(IpcError::Io(std::io::Error::other("disk")).is_transport());
        assert!(!IpcError::InvalidMessage("bad format".to_string()).is_transport());
        assert!(!IpcError::RequestOutstanding(JsonValue::from(1)).is_transport());
    }

    #[test]
    fn test_broken_pipe_is_connection_closed() {
        let err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(IpcError::from_pipe(err), IpcError::ConnectionClosed));

        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(IpcError::from_pipe(err), IpcError::Io(_)));
    }
}
