//! Error types for the `notify` crate.
//!
//! Follows the same pattern as the other crates in the workspace: a root Error
//! struct holding an error kind and an optional source for chaining.

use crate::connection::ConnectionId;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Top-level error type for the notify crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in notify.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Connection(ConnectionErrorKind),
    /// The outbound message could not be encoded as JSON.
    Serialization,
    /// An inbound control frame could not be understood.
    InvalidClientMessage,
}

/// Errors tied to the lifecycle of a single connection.
#[derive(Debug, PartialEq)]
pub enum ConnectionErrorKind {
    /// The connection has not completed its accept handshake yet.
    NotAccepted,
    /// The connection was closed before or during the send.
    Closed,
    /// The connection is not tracked by the pool.
    NotFound,
    /// The transport refused the write.
    SendFailed,
    /// The write did not complete within the delivery timeout.
    TimedOut,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn is_connection_closed(&self) -> bool {
        self.error_kind == ErrorKind::Connection(ConnectionErrorKind::Closed)
    }

    /// Whether the failure means the connection is unusable and should be dropped.
    pub fn is_stale_connection(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Connection(ConnectionErrorKind::Closed)
                | ErrorKind::Connection(ConnectionErrorKind::SendFailed)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Connection(kind) => write!(f, "Connection error: {:?}", kind)?,
            ErrorKind::Serialization => write!(f, "Serialization error")?,
            ErrorKind::InvalidClientMessage => write!(f, "Invalid client message")?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Serialization,
        }
    }
}

/// Helper function to create connection errors.
pub fn connection_error(kind: ConnectionErrorKind, connection_id: &ConnectionId) -> Error {
    Error {
        source: Some(format!("connection {}", connection_id.as_str()).into()),
        error_kind: ErrorKind::Connection(kind),
    }
}

/// Helper function to create a delivery timeout error.
pub fn timed_out(connection_id: &ConnectionId, after: Duration) -> Error {
    Error {
        source: Some(
            format!(
                "connection {} did not accept the message within {}ms",
                connection_id.as_str(),
                after.as_millis()
            )
            .into(),
        ),
        error_kind: ErrorKind::Connection(ConnectionErrorKind::TimedOut),
    }
}

/// Helper function to create errors for malformed client frames.
pub fn invalid_client_message(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::InvalidClientMessage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_connection_kinds() {
        let id = ConnectionId::new();
        assert!(connection_error(ConnectionErrorKind::Closed, &id).is_stale_connection());
        assert!(connection_error(ConnectionErrorKind::SendFailed, &id).is_stale_connection());
        assert!(!connection_error(ConnectionErrorKind::NotFound, &id).is_stale_connection());
        assert!(!timed_out(&id, Duration::from_millis(10)).is_stale_connection());
    }

    #[test]
    fn test_display_includes_source() {
        let id = ConnectionId::new();
        let rendered = connection_error(ConnectionErrorKind::Closed, &id).to_string();
        assert!(rendered.starts_with("Connection error: Closed"));
        assert!(rendered.contains(id.as_str()));
    }

    #[test]
    fn test_serde_errors_map_to_serialization() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.error_kind, ErrorKind::Serialization);
    }
}
