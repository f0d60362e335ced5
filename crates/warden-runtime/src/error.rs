use std::fmt;

/// Result type for warden-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Malformed request (4xx-equivalent)
    Validation(String),

    /// Approval, session, agent or trace not found
    NotFound(String),

    /// Token missing, expired, or lacking the required role
    Unauthorized(String),

    /// Storage layer error
    Store(warden_store::Error),

    /// Policy layer error (compile failures on reload, …)
    Policy(warden_policy::Error),

    /// Evolution layer error
    Evolve(warden_evolve::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Unexpected internal fault (5xx-equivalent); never crashes the process
    Runtime(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Policy(err) => write!(f, "Policy error: {}", err),
            Error::Evolve(err) => write!(f, "Evolution error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Policy(err) => Some(err),
            Error::Evolve(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<warden_store::Error> for Error {
    fn from(err: warden_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<warden_policy::Error> for Error {
    fn from(err: warden_policy::Error) -> Self {
        Error::Policy(err)
    }
}

impl From<warden_evolve::Error> for Error {
    fn from(err: warden_evolve::Error) -> Self {
        Error::Evolve(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
