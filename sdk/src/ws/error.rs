//! WebSocket error types.
//!
//! Provides error types for WebSocket client operations.

/// WebSocket errors.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server refused the upgrade (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// The server refused the upgrade with another status.
    #[error("upgrade rejected with status {0}")]
    Rejected(u16),

    /// WebSocket protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failed to serialize message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Connection closed.
    #[error("connection closed")]
    Closed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;

        match err {
            Error::Http(response) => match response.status().as_u16() {
                401 => Self::Unauthorized,
                status => Self::Rejected(status),
            },
            Error::Io(e) => Self::Connection(e.to_string()),
            Error::ConnectionClosed | Error::AlreadyClosed => Self::Closed,
            other => Self::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_error_display() {
        let err = WsError::Connection("timeout".to_string());
        assert_eq!(err.to_string(), "connection failed: timeout");
    }

    #[test]
    fn test_ws_error_rejected() {
        assert_eq!(
            WsError::Rejected(503).to_string(),
            "upgrade rejected with status 503"
        );
    }

    #[test]
    fn test_ws_error_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(WsError::Unauthorized);
        assert_eq!(err.to_string(), "unauthorized");
    }

    #[test]
    fn test_ws_error_from_closed() {
        let err = WsError::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, WsError::Closed));
    }
}
