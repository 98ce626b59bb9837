//! Error types for the worker transport.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while running or talking to a worker process.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// No command was configured.
    #[error("Worker command is empty")]
    EmptyCommand,

    /// The worker process could not be started.
    #[error("Failed to spawn worker '{command}': {source}")]
    SpawnFailed {
        /// The program that failed to start.
        command: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The worker is stopped or has exited.
    #[error("Worker is not running")]
    NotRunning,

    /// No output line arrived in time.
    #[error("No response from worker within {0:?}")]
    ResponseTimeout(Duration),

    /// The worker never announced readiness.
    #[error("Worker did not report '{marker}' within {timeout:?}")]
    NotReady {
        /// The expected readiness marker.
        marker: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// The worker closed its streams mid-call.
    #[error("Worker exited during call")]
    WorkerExited,

    /// A request value cannot be framed as a single line.
    #[error("Invalid request argument: {0}")]
    InvalidArgument(String),

    /// IO error on a worker stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Signal delivery or readiness polling failed.
    #[error("System error: {0}")]
    Sys(#[from] nix::errno::Errno),
}

impl DaemonError {
    /// Returns true if the call timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ResponseTimeout(_) | Self::NotReady { .. })
    }

    /// Returns true if the worker could not be started.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::EmptyCommand | Self::SpawnFailed { .. })
    }
}

/// Result type alias for worker operations.
pub type DaemonResult<T> = std::result::Result<T, DaemonError>;
