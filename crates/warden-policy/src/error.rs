use std::fmt;

/// Result type for warden-policy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the policy layer
#[derive(Debug)]
pub enum Error {
    /// Bad expression or unparseable policy document. Rejected at load time;
    /// the running ruleset is unchanged.
    Compile(String),

    /// Expression failed at evaluation time (degrades per fail_mode)
    Eval(String),

    /// IO operation failed
    Io(std::io::Error),

    /// Model call failed inside a judge rule
    Llm(warden_llm::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(msg) => write!(f, "Compile error: {}", msg),
            Error::Eval(msg) => write!(f, "Evaluation error: {}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Llm(err) => write!(f, "LLM error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Llm(err) => Some(err),
            Error::Compile(_) | Error::Eval(_) => None,
        }
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

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Compile(err.to_string())
    }
}
