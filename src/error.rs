//! Sweep-level error types.
//!
//! A probe batch either succeeds as a whole or fails with a single
//! diagnostic; there are no per-host error codes. A host that answered zero
//! packets is reported as normal statistics, never as an error.

use thiserror::Error;

/// Errors that can fail an entire probe batch.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Required pinger binary missing or address family mismatch.
    /// Raised before any subprocess is spawned.
    #[error("configuration error: {0}")]
    Config(String),

    /// Subprocess could not be spawned, terminated abnormally, or timed out.
    /// Never retried by this layer.
    #[error("execution error: {0}")]
    Execution(String),

    /// The pinger ran but produced no output at all.
    #[error("pinger produced no output")]
    NoOutput,

    /// Output was present but no line matched a known pinger format.
    #[error("pinger failed: {0}")]
    Protocol(String),

    /// Target file staging failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SweepError {
    /// Stable failure code for callers that log or count outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Execution(_) => "execution",
            Self::NoOutput => "no_output",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
        }
    }
}
