//! Error types for the storage and transport layers.
//!
//! Neither error escapes the public mutating calls of [`crate::ChatCore`]:
//! storage failures are logged and replaced by defaults, transport failures
//! become connection status changes.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed stored value: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("link task has shut down")]
    LinkClosed,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl TransportError {
    /// Short code for logs and status text.
    pub fn error_code(&self) -> &str {
        match self {
            Self::NotConnected => "not_connected",
            Self::LinkClosed => "link_closed",
            Self::Encode(_) => "encode",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::WebSocket(_) => "websocket",
        }
    }

    /// Whether a reconnect attempt can reasonably succeed after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WebSocket(err) => !matches!(
                err,
                tokio_tungstenite::tungstenite::Error::Url(_)
                    | tokio_tungstenite::tungstenite::Error::Http(_)
            ),
            Self::NotConnected | Self::LinkClosed => true,
            Self::Encode(_) | Self::InvalidEndpoint(_) => false,
        }
    }
}
