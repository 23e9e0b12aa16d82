//! Error types and the failure taxonomy used by retry and re-authentication.

use std::path::PathBuf;
use std::time::Duration;

use ssokube_cloud::{CloudError, FailureClass};
use thiserror::Error;

/// Result alias for ssokube operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure taxonomy that drives every recovery decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network blip or throttling. Retried with backoff.
    Transient,
    /// Credentials are missing or expired. Handled by the refresh guard.
    AuthExpired,
    /// A task or the whole run ran out of time.
    Timeout,
    /// Invalid or contradictory settings. Rejected before scheduling.
    Configuration,
    /// The user rejected a device authorization.
    Denied,
    /// A device authorization expired before approval.
    Expired,
    /// The run was cancelled before the task finished.
    Cancelled,
    /// The addressed resource does not exist.
    NotFound,
    /// Anything else. Never retried.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::AuthExpired => "auth-expired",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not-found",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Errors produced by orchestration, authentication and provisioning.
#[derive(Error, Debug)]
pub enum Error {
    /// A remote call failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// Settings are invalid or contradictory.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No usable credentials for the identity.
    #[error("Credentials for identity '{0}' are missing or expired")]
    AuthExpired(String),

    /// The user rejected the device authorization.
    #[error("Device authorization was denied. Run `ssokube login` and approve the request")]
    Denied,

    /// The device code expired before approval.
    #[error("Device authorization expired before it was approved. Run `ssokube login` again")]
    Expired,

    /// Per-task or overall deadline reached.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// Retry budget spent on a retryable failure.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Role selection failed for an account, reported once per region.
    #[error("Role resolution failed for account {account_id}: {message}")]
    RoleResolution {
        account_id: String,
        kind: ErrorKind,
        message: String,
    },

    /// Applying local configuration failed.
    #[error("Provisioning failed: {0}")]
    Provision(String),

    /// Filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A local file could not be parsed.
    #[error("Failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cloud(e) => match e.class() {
                FailureClass::Transient => ErrorKind::Transient,
                FailureClass::Unauthorized => ErrorKind::AuthExpired,
                FailureClass::Timeout => ErrorKind::Timeout,
                FailureClass::NotFound => ErrorKind::NotFound,
                FailureClass::Invalid if matches!(e, CloudError::Config(_)) => {
                    ErrorKind::Configuration
                }
                FailureClass::Invalid => ErrorKind::Fatal,
            },
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::AuthExpired(_) => ErrorKind::AuthExpired,
            Self::Denied => ErrorKind::Denied,
            Self::Expired => ErrorKind::Expired,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::RetriesExhausted { source, .. } => source.kind(),
            Self::RoleResolution { kind, .. } => *kind,
            Self::Provision(_) | Self::Io { .. } | Self::Parse { .. } | Self::Internal(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Whether [`crate::retry::RetryPolicy`] may retry this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::RetriesExhausted { .. })
            && matches!(self.kind(), ErrorKind::Transient | ErrorKind::Timeout)
    }

    /// Whether the refresh guard should re-authenticate after this failure.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        self.kind() == ErrorKind::AuthExpired
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_errors_map_to_kinds() {
        let err = Error::from(CloudError::Throttled("rate".into()));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());

        let err = Error::from(CloudError::Unauthorized("expired".into()));
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert!(err.is_auth_failure());
        assert!(!err.is_retryable());

        let err = Error::from(CloudError::Config("bad endpoint".into()));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_exhausted_retries_keep_kind_but_stop_retrying() {
        let err = Error::RetriesExhausted {
            attempts: 3,
            source: Box::new(Error::from(CloudError::Transient("503".into()))),
        };
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_timeout_is_retryable() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Configuration("x".into()).is_retryable());
    }
}
