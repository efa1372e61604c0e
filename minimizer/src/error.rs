use std::io;

use thiserror::Error;

/// Fatal minimizer errors, everything else only lengthens the run.
#[derive(Debug, Error)]
pub enum MinimizerError {
    #[error("invalid minimizer configuration: {0}")]
    Configuration(String),

    #[error("buffers differ in length: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("unable to minimize: no crash")]
    NoCrashToMinimize,

    #[error("unable to minimize: already minimized")]
    AlreadyMinimal,

    #[error("resource failure")]
    Resource(#[source] io::Error),
}

/// Errors reported by a debugger invocation.
#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("debugger timed out")]
    Timeout,

    #[error("failed to spawn target program")]
    Spawn(#[source] io::Error),

    #[error("malformed debugger output: {0}")]
    MalformedOutput(String),

    #[error("debugger resource failure")]
    Resource(#[source] io::Error),
}

impl DebuggerError {
    /// Hard resource failures abort the run, all other errors count as a miss.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Resource(_))
    }
}
