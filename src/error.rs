//! Error types for scram-http.
//!
//! All errors in this crate are represented by [`ScramHttpError`], which covers:
//! - Mechanism negotiation failures (server offers nothing we support)
//! - Protocol errors (malformed challenge headers, bad base64, bad nonces)
//! - Authentication errors (server signature mismatch, server-reported failure)
//! - Body handling errors (a consumed stream that cannot be replayed)
//! - Transport and I/O errors from the collaborating HTTP client
//!
//! Retry-ceiling exhaustion is deliberately *not* an error: the last 401
//! response is handed back to the caller, who interprets the status code.

use thiserror::Error;

/// Error type for all scram-http operations.
#[derive(Debug, Error, Clone)]
pub enum ScramHttpError {
    /// The server offered no mechanism from the client's supported set.
    #[error("no common mechanism: {0}")]
    NoCommonMechanism(String),

    /// Challenge header missing, duplicated, or un-parseable.
    #[error("malformed challenge: {0}")]
    MalformedChallenge(String),

    /// Local verification failed - wrong credentials or a tampered reply,
    /// not a transport problem.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An exchange operation was invoked out of order.
    #[error("exchange state error: {0}")]
    Exchange(String),

    /// The request body was consumed and cannot be rewound for a retry.
    #[error("request body cannot be rewound for retransmission")]
    UnrewindableBody,

    /// The configured flow timeout elapsed mid-exchange.
    #[error("authentication flow deadline exceeded")]
    Deadline,

    /// Transport collaborator failure. Never retried by this crate.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    ///
    /// Note: `std::io::Error` is not `Clone`, so we store the message.
    #[error("io error: {0}")]
    Io(String),
}

impl ScramHttpError {
    /// Returns `true` if this is a credential or verification failure.
    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(self, ScramHttpError::AuthenticationFailed(_))
    }

    /// Returns `true` if this is a protocol-level failure (bad challenge,
    /// failed negotiation, out-of-order exchange).
    #[inline]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ScramHttpError::NoCommonMechanism(_)
                | ScramHttpError::MalformedChallenge(_)
                | ScramHttpError::Exchange(_)
        )
    }

    /// Returns `true` if this error is likely transient and retryable with a
    /// fresh flow. Auth and protocol errors typically require configuration
    /// changes instead.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScramHttpError::Io(_) | ScramHttpError::Transport(_) | ScramHttpError::Deadline
        )
    }
}

// Manual From impl since io::Error isn't Clone
impl From<std::io::Error> for ScramHttpError {
    fn from(err: std::io::Error) -> Self {
        ScramHttpError::Io(err.to_string())
    }
}

/// Result type alias for scram-http operations.
pub type Result<T> = std::result::Result<T, ScramHttpError>;
