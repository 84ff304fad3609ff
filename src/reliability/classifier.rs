//! Error classifier: maps an [`EngineError`] to a [`RecoveryAction`]
//!
//! Layered on top of the base category taxonomy are domain-specific
//! recovery refinements: network errors always retry,
//! permission errors never retry, resource exhaustion pauses before a retry
//! is allowed, and "not found" errors retry only while the attempt count is
//! still below 2.

use std::time::Duration;

use crate::error::{EngineError, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    Escalate,
    GracefulDegradation,
}

/// Classify an error and decide whether attempt `next_attempt` (1-based,
/// the attempt about to be made) should proceed.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(error: &EngineError) -> RecoveryAction {
        match error.category() {
            ErrorCategory::Network => RecoveryAction::Retry,
            ErrorCategory::Authentication => RecoveryAction::Escalate,
            ErrorCategory::Timeout => RecoveryAction::Retry,
            ErrorCategory::Resource => RecoveryAction::GracefulDegradation,
            ErrorCategory::Validation => RecoveryAction::Escalate,
            ErrorCategory::System => RecoveryAction::GracefulDegradation,
            ErrorCategory::Unknown => RecoveryAction::Retry,
        }
    }

    /// Whether attempt `next_attempt` should actually be made, given the
    /// domain-specific refinements on top of the base category.
    pub fn should_retry(error: &EngineError, next_attempt: u32) -> bool {
        match error {
            EngineError::Transport(_) => true,
            EngineError::Remote { message, .. } if is_permission_denied(message) => false,
            EngineError::Remote { message, .. } if is_not_found(message) => next_attempt < 2,
            _ => matches!(Self::classify(error), RecoveryAction::Retry),
        }
    }

    /// Extra pause to insert before a retry, on top of the normal backoff
    /// delay, for resource-exhaustion style failures.
    pub fn extra_delay(error: &EngineError) -> Duration {
        match error.category() {
            ErrorCategory::Resource => Duration::from_secs(5),
            _ => Duration::ZERO,
        }
    }

    /// Grow the effective timeout for the next attempt after a timeout
    /// failure, capped at 10 minutes.
    pub fn grown_timeout(previous: Duration) -> Duration {
        let grown = previous.mul_f64(1.5);
        grown.min(Duration::from_secs(600))
    }
}

fn is_permission_denied(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("permission") || lower.contains("forbidden") || lower.contains("unauthorized")
}

fn is_not_found(message: &str) -> bool {
    message.to_lowercase().contains("not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_always_retryable() {
        let error = EngineError::Transport("connection reset".into());
        assert!(ErrorClassifier::should_retry(&error, 5));
    }

    #[test]
    fn permission_errors_never_retry() {
        let error = EngineError::Remote {
            code: 403,
            message: "Permission denied".into(),
        };
        assert!(!ErrorClassifier::should_retry(&error, 1));
    }

    #[test]
    fn not_found_retries_only_below_two_attempts() {
        let error = EngineError::Remote {
            code: 404,
            message: "resource not found".into(),
        };
        assert!(ErrorClassifier::should_retry(&error, 1));
        assert!(!ErrorClassifier::should_retry(&error, 2));
    }

    #[test]
    fn resource_errors_add_extra_delay() {
        let error = EngineError::Capacity("filesystem".into());
        assert_eq!(ErrorClassifier::extra_delay(&error), Duration::from_secs(5));
    }

    #[test]
    fn grown_timeout_is_capped() {
        let grown = ErrorClassifier::grown_timeout(Duration::from_secs(1000));
        assert_eq!(grown, Duration::from_secs(600));
    }
}
