//! Orchestrator errors

use std::fmt;

use thiserror::Error;

/// Result type for survey operations
pub type SurveyResult<T> = Result<T, SurveyError>;

/// Which dimension of the session identity changed mid-flight.
///
/// Reported with every staleness abort so diagnostics can say *what*
/// invalidated the operation, not just that something did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleDimension {
    /// Target contract address changed (network re-resolution)
    Address,
    /// Wallet switched chains
    Chain,
    /// Wallet switched accounts
    Signer,
}

impl fmt::Display for StaleDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => write!(f, "contract address"),
            Self::Chain => write!(f, "chain"),
            Self::Signer => write!(f, "signer"),
        }
    }
}

/// Survey orchestrator errors
#[derive(Debug, Error)]
pub enum SurveyError {
    /// Input rejected before any lock or I/O
    #[error("{0}")]
    Validation(String),

    /// A precondition is not met (missing wallet, operation in flight).
    /// Soft: surfaced as a short message, never as a hard failure.
    #[error("{0}")]
    NotReady(String),

    /// The session identity changed while the operation was in flight.
    /// Distinct from failure: the result is discarded, nothing is broken.
    #[error("session {0} changed while the operation was in flight")]
    Stale(StaleDimension),

    /// A remote collaborator failed
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// A collaborator returned data in an unrecognized shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// No contract deployed for the resolved network
    #[error("contract not deployed on this network")]
    NotDeployed,

    /// A remote call exceeded the configured timeout
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl SurveyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }
}

/// Failure reported by an external collaborator (ledger, encryption,
/// authorization, decryption). Carries whatever diagnostic context the
/// collaborator exposed.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct ServiceError {
    /// Primary error message
    pub message: String,
    /// Numeric error code, if the service reported one
    pub code: Option<i64>,
    /// Raw response data, if any
    pub data: Option<String>,
    /// Human-readable reason (e.g. a revert string), if any
    pub reason: Option<String>,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
            reason: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_dimension_display() {
        assert_eq!(StaleDimension::Chain.to_string(), "chain");
        assert_eq!(StaleDimension::Signer.to_string(), "signer");
        assert_eq!(StaleDimension::Address.to_string(), "contract address");
    }

    #[test]
    fn test_service_error_context() {
        let err = ServiceError::new("call reverted")
            .with_code(3)
            .with_reason("QuestionAlreadyAnswered");

        assert_eq!(err.to_string(), "call reverted");
        assert_eq!(err.code, Some(3));
        assert_eq!(err.reason.as_deref(), Some("QuestionAlreadyAnswered"));
    }

    #[test]
    fn test_service_error_converts() {
        let err: SurveyError = ServiceError::new("boom").into();
        assert!(matches!(err, SurveyError::Service(_)));
    }
}
