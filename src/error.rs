use crate::schema::ValidationError;
use thiserror::Error;

/// Result type for LMS operations
pub type Result<T> = std::result::Result<T, LmsError>;

/// Errors that can occur when talking to a Logitech Media Server
#[derive(Error, Debug)]
pub enum LmsError {
    /// HTTP request failed or returned a non-success status
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket error on the notification connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// Payload did not match the expected message shape
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Server sent a value the protocol does not allow
    #[error("Protocol invariant violated: {0}")]
    ProtocolInvariant(String),

    /// CometD handshake was rejected or never answered
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// CometD channel subscription was rejected
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Server refused a published command
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Operation requires an established CometD session
    #[error("Session is not connected")]
    NotConnected,

    /// Session was unsubscribed and cannot be reused
    #[error("Session is closed")]
    SessionClosed,

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl LmsError {
    /// Whether this error came from the network rather than from payload content
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LmsError::Http(_)
                | LmsError::Io(_)
                | LmsError::Json(_)
                | LmsError::ConnectionClosed
                | LmsError::Timeout
        )
    }
}
