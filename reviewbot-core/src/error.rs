//! Closed error kinds for the review lifecycle.
//!
//! Callers branch on the variant, never on message contents: the webhook
//! layer maps `InvalidState` and `NotFound` to HTTP statuses, and the
//! orchestrator decides whether to post a fallback notice by matching on
//! `RemoteRetryableExhausted`.

use std::fmt;

use crate::record::ReviewStatus;

/// Error type for the review core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    /// A record (or other entity) could not be found.
    NotFound { what: String },
    /// A status transition or retry request was attempted from a status that
    /// does not permit it.
    InvalidState {
        operation: &'static str,
        status: ReviewStatus,
    },
    /// A remote collaborator failed in a way that is not worth retrying
    /// (auth failure, malformed request, quota exhaustion, network error on
    /// a non-retried call).
    RemoteFatal { message: String },
    /// The AI service stayed overloaded through every retry attempt.
    RemoteRetryableExhausted { attempts: u32, last_error: String },
    /// The record store itself failed.
    Storage { message: String },
}

impl ReviewError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// True when this failure came from the retry controller running out of
    /// attempts against an overloaded AI service.
    pub fn is_overload_exhausted(&self) -> bool {
        matches!(self, Self::RemoteRetryableExhausted { .. })
    }
}

impl fmt::Display for ReviewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "not found: {}", what),
            Self::InvalidState { operation, status } => {
                write!(f, "{} is not valid from status '{}'", operation, status)
            }
            Self::RemoteFatal { message } => write!(f, "remote call failed: {}", message),
            Self::RemoteRetryableExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "AI service still overloaded after {} attempts: {}",
                attempts, last_error
            ),
            Self::Storage { message } => write!(f, "record store error: {}", message),
        }
    }
}

impl std::error::Error for ReviewError {}

/// Failure classification for a single AI generation attempt.
///
/// Only `Overloaded` is eligible for backoff retry; everything else aborts
/// the retry loop immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// The service signalled transient overload or unavailability
    /// (HTTP 503, an "overloaded" error body, a failed connection).
    Overloaded { message: String },
    /// Any other failure: malformed request, auth failure, quota exhaustion.
    Fatal { message: String },
}

impl GenerateError {
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::Overloaded {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Overloaded { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Overloaded { message } | Self::Fatal { message } => message,
        }
    }
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overloaded { message } => write!(f, "AI service overloaded: {}", message),
            Self::Fatal { message } => write!(f, "AI request failed: {}", message),
        }
    }
}

impl std::error::Error for GenerateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_error_classification() {
        assert!(GenerateError::overloaded("503").is_retryable());
        assert!(!GenerateError::fatal("401 unauthorized").is_retryable());
    }

    #[test]
    fn test_overload_exhausted_detection() {
        let exhausted = ReviewError::RemoteRetryableExhausted {
            attempts: 5,
            last_error: "overloaded".to_string(),
        };
        assert!(exhausted.is_overload_exhausted());
        assert!(!ReviewError::not_found("record").is_overload_exhausted());
    }

    #[test]
    fn test_display_messages() {
        let err = ReviewError::InvalidState {
            operation: "increment_retry",
            status: ReviewStatus::Completed,
        };
        assert_eq!(
            err.to_string(),
            "increment_retry is not valid from status 'completed'"
        );
    }
}
