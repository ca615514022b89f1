use thiserror::Error;

/// Failure talking to a managed service or torrent client.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("authentication against {url} was rejected")]
    Auth { url: String },

    #[error("RPC call to {url} failed: {message}")]
    Rpc { url: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_decode() || err.is_body() {
            TransportError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else if err.is_builder() {
            TransportError::Other(err.to_string())
        } else {
            TransportError::Connection {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Transient failures: timeouts, connection errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. } | TransportError::Connection { .. } => true,
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            TransportError::Decode { .. }
            | TransportError::Auth { .. }
            | TransportError::Rpc { .. }
            | TransportError::Other(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportError::Timeout { .. } => "timeout",
            TransportError::Connection { .. } => "connection",
            TransportError::Status { .. } => "status",
            TransportError::Decode { .. } => "decode",
            TransportError::Auth { .. } => "auth",
            TransportError::Rpc { .. } => "rpc",
            TransportError::Other(_) => "other",
        }
    }
}
