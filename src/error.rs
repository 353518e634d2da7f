use std::fmt;

/// Error type returned by this crate.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CurlError {
    /// The transport call itself failed (DNS, connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// A response was obtained but its status is not 2xx.
    #[error("http error {status} {status_message}: {body}")]
    Http {
        status: u16,
        status_message: String,
        body: String,
    },
    /// A request or response interceptor rejected the value it was given.
    #[error("interceptor error: {0}")]
    Interceptor(String),
    /// The pending operation was cancelled before the next transport call.
    #[error("request cancelled")]
    Cancelled,
    /// The client was shut down and no longer accepts traffic.
    #[error("client has been shut down")]
    ShutDown,
    /// The background worker could not run or did not finish.
    #[error("worker error: {0}")]
    Worker(String),
    /// Response body decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

impl CurlError {
    /// Status code carried by this error; transport failures report `0`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Http { status, .. } => *status,
            _ => 0,
        }
    }

    /// Returns `true` for 5xx, 408 and 429 statuses.
    pub fn is_retryable_status(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<TransportError> for CurlError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// Broad classification of a transport failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Tls,
    InvalidRequest,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Tls => "tls",
            Self::InvalidRequest => "invalid request",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Failure reported by a [`crate::TransportHandle`] call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::{CurlError, TransportError};

    #[test]
    fn transport_failures_report_sentinel_status() {
        let err = CurlError::from(TransportError::connect("refused"));
        assert_eq!(err.status_code(), 0);
        assert!(err.is_transport());
        assert!(!err.is_retryable_status());
    }

    #[test]
    fn retryable_statuses() {
        let http = |status| CurlError::Http {
            status,
            status_message: String::new(),
            body: String::new(),
        };
        assert!(http(500).is_retryable_status());
        assert!(http(503).is_retryable_status());
        assert!(http(408).is_retryable_status());
        assert!(http(429).is_retryable_status());
        assert!(!http(404).is_retryable_status());
        assert!(!http(400).is_retryable_status());
    }
}
