use std::{fmt, io};

/// The harness's result type.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// All errors that can occur while configuring or driving a training session.
#[derive(Debug)]
pub enum HarnessError {
    /// An override key that exists nowhere in the tree it is merged into.
    UnknownKey(String),
    /// Invalid configuration, caught before any session resource is opened.
    InvalidConfig(String),
    /// A controller specification that cannot be built.
    InvalidController(String),
    /// A value outside the closed set of shapes a configuration tree may hold.
    Unsupported(String),
    /// An accumulation operation was called without a prior `start_accumulation`.
    AccumulationNotStarted,
    /// The execution context returned a result vector misaligned with the plan.
    ResultLengthMismatch { expected: usize, got: usize },
    /// The execution context failed to run a plan.
    Execution(String),
    /// An underlying I/O error.
    Io(io::Error),
    /// A configuration tree could not be read as the requested typed view.
    Json(serde_json::Error),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey(key) => write!(f, "wrong argument name '{key}'"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::InvalidController(msg) => write!(f, "invalid controller: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported value: {msg}"),
            Self::AccumulationNotStarted => {
                write!(f, "accumulation used without a matching start_accumulation")
            }
            Self::ResultLengthMismatch { expected, got } => {
                write!(f, "result length mismatch: expected {expected}, got {got}")
            }
            Self::Execution(msg) => write!(f, "execution error: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "config error: {e}"),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HarnessError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
