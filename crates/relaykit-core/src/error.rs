//! Error taxonomy shared by every vendor client
//!
//! Only [`Error::Transient`] is retried by the executor. Configuration and
//! input validation errors surface before any network I/O; an exhausted retry
//! budget carries the last transient error that was observed.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown provider, unreadable provider file, malformed credentials
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller supplied an unusable request (checked before any I/O)
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// A single failed vendor call
    #[error(transparent)]
    Transient(#[from] TransientError),

    /// Terminal form of [`Error::Transient`] once every attempt failed
    #[error("giving up after {attempts} attempt(s): {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: TransientError,
    },
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::InputValidation(msg.into())
    }

    /// Whether the executor may try the call again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Failure of one attempt against a vendor endpoint
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// Vendor answered 2xx but reported a failure in the body
    #[error("vendor error {code}: {message}")]
    Vendor { code: String, message: String },

    /// Body could not be read as the expected structured response
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl TransientError {
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    /// HTTP status, when the vendor answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
