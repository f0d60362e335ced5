use std::fmt;

/// Result type for warden-evolve operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the evolution layer
#[derive(Debug)]
pub enum Error {
    /// Store layer error
    Store(warden_store::Error),

    /// IO operation failed (version tree, prompt files)
    Io(std::io::Error),

    /// Model call failed; the cycle aborts and the next one retries
    Llm(warden_llm::Error),

    /// Version tree in an unusable state for the requested operation
    Version(String),

    /// Unparseable rollback trigger or config value
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Llm(err) => write!(f, "LLM error: {}", err),
            Error::Version(msg) => write!(f, "Version error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Llm(err) => Some(err),
            Error::Version(_) | Error::Config(_) => None,
        }
    }
}

impl From<warden_store::Error> for Error {
    fn from(err: warden_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<warden_llm::Error> for Error {
    fn from(err: warden_llm::Error) -> Self {
        Error::Llm(err)
    }
}
