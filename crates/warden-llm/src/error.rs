use std::fmt;

/// Result type for warden-llm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur when calling a model provider
#[derive(Debug)]
pub enum Error {
    /// Provider returned an error or the transport failed
    Upstream(String),

    /// Per-call deadline exceeded
    Timeout(String),

    /// Response arrived but could not be interpreted
    Malformed(String),
}

impl Error {
    /// Callers treat timeouts and upstream failures the same way (fallback
    /// action / fail mode); this flags both.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::Malformed(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Upstream(err.to_string())
        }
    }
}
