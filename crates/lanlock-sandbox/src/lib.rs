//! Sandboxed compile-and-run of student C/C++ submissions
//!
//! Each job gets a throwaway workspace directory that is removed on every
//! exit path, and each spawned process runs in its own process group so a
//! timed-out submission cannot leave grandchildren behind.

mod runner;
mod workspace;

pub use runner::*;
pub use workspace::*;

use thiserror::Error;

/// Sandbox errors. Submission failures (bad code, timeouts, nonzero exits)
/// are not errors; they are reported in `RunStatus`. These are the server's
/// own problems: a missing compiler, an unwritable temp dir.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Workspace setup failed: {0}")]
    Setup(#[from] std::io::Error),

    #[error("Failed to spawn {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SandboxResult<T> = Result<T, SandboxError>;
