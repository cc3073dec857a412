//! Error types shared by the resolution pipeline and its service adapters.

use thiserror::Error;

/// Coarse classification of an outbound service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    RateLimited,
    ServerError,
    Hard,
}

impl FailureKind {
    /// Whether a failure of this kind may succeed if the same call is repeated.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::ServerError)
    }

    /// Classifies a `ureq` failure by status code or transport message.
    pub fn from_ureq(error: &ureq::Error) -> Self {
        match error {
            ureq::Error::Status(code, _) => Self::from_status(*code),
            ureq::Error::Transport(transport) => {
                let lowered = transport.to_string().to_ascii_lowercase();
                if lowered.contains("timed out") || lowered.contains("timeout") {
                    Self::Timeout
                } else {
                    Self::Hard
                }
            }
        }
    }

    pub fn from_status(code: u16) -> Self {
        match code {
            429 => Self::RateLimited,
            408 => Self::Timeout,
            500 | 502 | 503 | 504 | 529 => Self::ServerError,
            _ => Self::Hard,
        }
    }

    /// Classifies an I/O error raised while reading a response body.
    pub fn from_io(error: &std::io::Error) -> Self {
        let timed_out = matches!(
            error.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        ) || error.to_string().to_ascii_lowercase().contains("timed out");
        if timed_out {
            Self::Timeout
        } else {
            Self::Hard
        }
    }
}

/// A failed call to the catalog or recognition service.
#[derive(Debug, Clone, Error)]
#[error("{service} request failed ({kind:?}): {message}")]
pub struct ServiceError {
    pub service: &'static str,
    pub kind: FailureKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(service: &'static str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            service,
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Top-level failure of an identification or resolution run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed read: {0}")]
    MalformedRead(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}
