use std::fmt;

/// Result type alias for estimator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for estimator operations
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration (bad schedule, zero batch window, ...).
    /// The only fatal class: returned synchronously from construction,
    /// before any thread is started.
    Config(String),

    /// Resource acquisition failures (thread spawn, I/O)
    Resource(std::io::Error),

    /// The pipeline has shut down and no longer accepts work
    Shutdown,

    /// Other errors
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
            Error::Resource(e) => write!(f, "Resource error: {e}"),
            Error::Shutdown => write!(f, "Estimator has shut down"),
            Error::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Resource(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
