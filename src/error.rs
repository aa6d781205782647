// Error handling module
// Defines the error taxonomy surfaced by the client layer

use thiserror::Error;

/// Classification of a failed network call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Decode,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connection_failed",
            TransportErrorKind::Request => "request_error",
            TransportErrorKind::Body => "body_error",
            TransportErrorKind::Decode => "decode_error",
            TransportErrorKind::Other => "unknown",
        }
    }
}

/// A request that never produced an HTTP response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("HTTP request failed: {message} (kind: {})", .kind.as_str())]
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

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if e.is_request() {
            TransportErrorKind::Request
        } else if e.is_body() {
            TransportErrorKind::Body
        } else if e.is_decode() {
            TransportErrorKind::Decode
        } else {
            TransportErrorKind::Other
        };

        TransportError::new(kind, e.to_string())
    }
}

/// Why a token refresh did not produce a new credential pair.
///
/// Cloneable because one failure is delivered to every request that was
/// queued behind the refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No refresh token was stored
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Refresh endpoint answered with a non-2xx status
    #[error("Token refresh rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Refresh endpoint answered 2xx with an unusable body
    #[error("Malformed token refresh response: {0}")]
    Malformed(String),

    /// Refresh call never reached the server or timed out
    #[error("Token refresh transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The request driving the refresh was dropped before it settled
    #[error("Token refresh was interrupted")]
    Interrupted,
}

/// Errors returned to callers of the API client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network failure on the original call or its replay
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Authentication failure after the single automatic retry
    #[error("Authentication failed: {status} - {message}")]
    Unauthorized { status: u16, message: String },

    /// The request was sent with credentials that have since been cleared
    #[error("Session expired, re-authentication required")]
    SessionExpired,

    /// Refresh could not recover the session
    #[error("Session refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    /// Non-authentication error status from the API
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Payload could not be encoded, or the response did not match the expected shape
    #[error("Invalid JSON payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Internal error (storage, setup)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// HTTP status attached to the error, if the server produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Unauthorized { status, .. } | ClientError::Api { status, .. } => {
                Some(*status)
            }
            ClientError::RefreshFailed(RefreshError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// True when the caller has to sign in again
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            ClientError::SessionExpired | ClientError::RefreshFailed(_)
        )
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
