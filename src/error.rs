// ABOUTME: Error types for reader, resolution, and evaluation failures

use thiserror::Error;

/// Failure kinds surfaced through the evaluator's recover barrier.
///
/// The interpreter does not distinguish recoverable from fatal errors by
/// type; everything propagates to the task's run loop, which prints the
/// message as `oh: <msg>` and lets the session continue.
#[derive(Error, Debug, Clone)]
pub enum ShellError {
    /// Surface syntax the reader could not make sense of
    #[error("{0}")]
    Parse(String),

    /// Undefined symbol, unbound assignment, missing `else`, illegal name
    #[error("{0}")]
    Resolution(String),

    /// Wrong receiver, "can't evaluate", "not a conduit", and friends
    #[error("{0}")]
    Type(String),

    /// open/stat/exec/glob failures and numeric conversion failures
    #[error("{0}")]
    Os(String),
}

impl ShellError {
    pub fn parse(msg: impl Into<String>) -> Self {
        ShellError::Parse(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        ShellError::Resolution(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        ShellError::Type(msg.into())
    }

    pub fn os(msg: impl Into<String>) -> Self {
        ShellError::Os(msg.into())
    }

    /// Wrap an I/O failure with the operation that produced it
    pub fn io(op: &str, err: std::io::Error) -> Self {
        ShellError::Os(format!("{}: {}", op, err))
    }
}

pub type ShellResult<T> = Result<T, ShellError>;
