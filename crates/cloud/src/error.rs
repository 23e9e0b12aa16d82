//! Error type shared by every remote client in this crate.

use thiserror::Error;

/// How a caller should react to a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Throttling, 5xx, dropped connections. Worth retrying with backoff.
    Transient,
    /// Credentials are missing, expired or rejected.
    Unauthorized,
    /// The call did not finish in time.
    Timeout,
    /// The addressed resource does not exist.
    NotFound,
    /// The request itself is wrong; retrying will not help.
    Invalid,
}

/// Errors that can occur during remote API operations.
#[derive(Error, Debug)]
pub enum CloudError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response that has no more specific variant.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Request was throttled by the service.
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Credentials were rejected or have expired.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Temporary service-side failure.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CloudError {
    /// Classify this error for retry and re-authentication decisions.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Http(e) if e.is_timeout() => FailureClass::Timeout,
            Self::Http(e) if e.is_connect() || e.is_request() || e.is_body() => {
                FailureClass::Transient
            }
            Self::Http(e) => match e.status() {
                Some(status) => classify_status(status.as_u16()),
                None => FailureClass::Transient,
            },
            Self::Api { status, .. } => classify_status(*status),
            Self::Throttled(_) | Self::Transient(_) => FailureClass::Transient,
            Self::Unauthorized(_) => FailureClass::Unauthorized,
            Self::NotFound(_) => FailureClass::NotFound,
            Self::Timeout(_) => FailureClass::Timeout,
            Self::Config(_) | Self::Serialization(_) => FailureClass::Invalid,
        }
    }
}

fn classify_status(status: u16) -> FailureClass {
    match status {
        401 | 403 => FailureClass::Unauthorized,
        404 => FailureClass::NotFound,
        408 => FailureClass::Timeout,
        429 | 500..=599 => FailureClass::Transient,
        _ => FailureClass::Invalid,
    }
}

/// Map an HTTP error response to a [`CloudError`].
///
/// `error_code` is the service-specific error type when the body carried one
/// (for example `ThrottlingException` or `ExpiredTokenException`).
pub(crate) fn from_status(status: u16, error_code: Option<&str>, message: String) -> CloudError {
    match error_code {
        Some(
            "ThrottlingException" | "TooManyRequestsException" | "Throttling"
            | "RequestLimitExceeded",
        ) => return CloudError::Throttled(message),
        Some(
            "ExpiredTokenException"
            | "UnrecognizedClientException"
            | "InvalidSignatureException"
            | "UnauthorizedException"
            | "AccessDeniedException"
            | "InvalidClientTokenId",
        ) => return CloudError::Unauthorized(message),
        Some("ResourceNotFoundException") => return CloudError::NotFound(message),
        _ => {}
    }

    match status {
        401 | 403 => CloudError::Unauthorized(message),
        404 => CloudError::NotFound(message),
        429 => CloudError::Throttled(message),
        500..=599 => CloudError::Transient(format!("{status}: {message}")),
        _ => CloudError::Api { status, message },
    }
}
