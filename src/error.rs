//! Error types for the judging pipeline.
//!
//! The split matters for verdict mapping: [`SandboxError`] means the
//! isolation runtime itself failed (never the submitted program), while
//! program failures travel through [`crate::sandbox::ExecReport`] and are
//! classified by the engine.

use thiserror::Error;

/// Infrastructure failure inside the sandbox runtime.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Docker daemon unreachable or the CLI could not be spawned.
    #[error("sandbox runtime unavailable: {0}")]
    Unavailable(String),

    /// Requested runtime image is not present and could not be pulled.
    #[error("sandbox image missing: {0}")]
    ImageMissing(String),

    /// The run was cancelled by the operator before completion.
    #[error("execution cancelled")]
    Cancelled,

    /// Host-side I/O failure while talking to the sandbox process.
    #[error("sandbox i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unclassified failure escaping the verdict engine.
///
/// Anything surfacing here did not reach a verdict; the state machine
/// downgrades it to a system error so the submission still terminates.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judging cancelled")]
    Cancelled,

    #[error("workspace i/o error: {0}")]
    Io(#[from] std::io::Error),
}
