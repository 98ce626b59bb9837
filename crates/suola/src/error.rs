//! Error types for the signature service.

use std::path::PathBuf;

use suola_daemon::DaemonError;
use suola_guest::GuestError;
use thiserror::Error;

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input was empty or too large. Always surfaced.
    Input,
    /// A module, file, or worker could not be set up.
    Resource,
    /// A fault on the transport boundary. Always logged loudly.
    Boundary,
    /// No response within the bound.
    Timeout,
    /// The rule engine has no signature for this URL.
    Domain,
}

/// Top-level error type for the signature service.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The URL was empty after trimming.
    #[error("URL cannot be empty")]
    EmptyInput,

    /// In-process transport error.
    #[error(transparent)]
    Guest(#[from] GuestError),

    /// Worker transport error.
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// The rule engine declined to sign the URL.
    #[error("No signature: {0}")]
    NoSignature(String),

    /// The worker answered with something that is not a signature.
    #[error("Unexpected worker response: {0:?}")]
    UnexpectedResponse(String),

    /// The configuration file could not be read.
    #[error("Failed to read config {}: {source}", .path.display())]
    ConfigRead {
        /// The config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this service.
    #[error("Invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl SignatureError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInput => ErrorKind::Input,
            Self::Guest(err) => guest_kind(err),
            Self::Daemon(err) => daemon_kind(err),
            Self::NoSignature(_) => ErrorKind::Domain,
            Self::UnexpectedResponse(_) => ErrorKind::Boundary,
            Self::ConfigRead { .. } | Self::ConfigParse(_) => {
                ErrorKind::Resource
            }
        }
    }

    /// Returns true if the caller's input was rejected.
    pub fn is_input(&self) -> bool {
        self.kind() == ErrorKind::Input
    }

    /// Returns true if the rule engine simply had no signature.
    pub fn is_domain(&self) -> bool {
        self.kind() == ErrorKind::Domain
    }
}

fn guest_kind(err: &GuestError) -> ErrorKind {
    match err {
        GuestError::EmptyInput | GuestError::InputTooLarge { .. } => ErrorKind::Input,
        GuestError::Engine(_) | GuestError::Module(_) => ErrorKind::Resource,
        GuestError::Boundary(_) => ErrorKind::Boundary,
        GuestError::GuestReported(_) => ErrorKind::Domain,
    }
}

fn daemon_kind(err: &DaemonError) -> ErrorKind {
    match err {
        DaemonError::InvalidArgument(_) => ErrorKind::Input,
        DaemonError::EmptyCommand | DaemonError::SpawnFailed { .. } => ErrorKind::Resource,
        DaemonError::ResponseTimeout(_) | DaemonError::NotReady { .. } => ErrorKind::Timeout,
        DaemonError::NotRunning
        | DaemonError::WorkerExited
        | DaemonError::Io(_)
        | DaemonError::Sys(_) => ErrorKind::Boundary,
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, SignatureError>;

#[cfg(test)]
mod tests {
    use super::*;
    use suola_guest::BoundaryError;

    #[test]
    fn test_guest_classification() {
        assert_eq!(SignatureError::EmptyInput.kind(), ErrorKind::Input);
        assert_eq!(
            SignatureError::from(GuestError::InputTooLarge { len: 2, max: 1 }).kind(),
            ErrorKind::Input
        );
        assert_eq!(
            SignatureError::from(GuestError::GuestReported("no rule".into())).kind(),
            ErrorKind::Domain
        );
        assert_eq!(
            SignatureError::from(GuestError::Boundary(BoundaryError::UnownedRelease(4))).kind(),
            ErrorKind::Boundary
        );
    }

    #[test]
    fn test_daemon_classification() {
        let timeout = SignatureError::from(DaemonError::ResponseTimeout(
            std::time::Duration::from_secs(5),
        ));
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            SignatureError::from(DaemonError::EmptyCommand).kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            SignatureError::from(DaemonError::WorkerExited).kind(),
            ErrorKind::Boundary
        );
    }

    #[test]
    fn test_domain_helpers() {
        let err = SignatureError::NoSignature("no matching rule".into());
        assert!(err.is_domain());
        assert!(!err.is_input());
    }
}
