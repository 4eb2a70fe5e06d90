use crate::Value;
use std::{error, fmt};
use thiserror::Error;

/// The different control errors that can be produced by the runtime
///
/// All of these are recoverable: they propagate by the same unwind mechanism
/// as user-level non-local exits and are reported at the nearest recovery
/// point, normally the top level. Internal invariant violations (chain
/// corruption, stale pool ids) are not represented here — those panic.
#[derive(Error, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ErrorKind {
    #[error("{0}")]
    StringError(String),
    #[error("no live block named '{0}' to return from")]
    UnmatchedReturn(Value),
    #[error("no live catch for tag '{0}'")]
    UnmatchedThrow(Value),
    #[error("no live tag named '{0}'")]
    UnmatchedGo(Value),
    #[error("call depth limit exceeded ({limit})")]
    CallDepthExceeded { limit: usize },
    #[error("jump target's dynamic extent has already ended")]
    ExpiredTarget,
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An error produced by the Sable runtime
#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    /// The error's kind
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl error::Error for Error {}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Self::new(ErrorKind::StringError(error))
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Self::new(ErrorKind::StringError(error.into()))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// The Result type used by the runtime's non-control APIs
pub type Result<T> = std::result::Result<T, Error>;

/// Creates a control [Error](crate::Error) from a message (with format-like
/// behaviour), wrapped in `Err`
#[macro_export]
macro_rules! control_error {
    ($error:literal) => {
        Err($crate::Error::from(format!($error)))
    };
    ($error:expr) => {
        Err($crate::Error::from($error))
    };
    ($error:literal, $($y:expr),+ $(,)?) => {
        Err($crate::Error::from(format!($error, $($y),+)))
    };
}
