// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for the expense engine
//!
//! Every fallible operation in `xpn-*` returns `Result<T, ExpenseError>`.
//! Each variant carries a stable machine-readable `code()` plus enough
//! context (entity kind/id, field name, retry count) that a caller can log
//! one structured line describing the user-visible failure.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// The error taxonomy every fallible operation in this workspace shares.
#[derive(Debug, thiserror::Error)]
pub enum ExpenseError {
    /// Receipt/transaction/match/report entity does not exist or is not
    /// owned by the caller.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind, e.g. `"receipt"`, `"transaction"`, `"match"`.
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// Illegal transition, e.g. confirming a non-`Proposed` match.
    #[error("invalid state for {entity} {id}: {message}")]
    InvalidState {
        /// Entity kind.
        entity: &'static str,
        /// The id whose state transition was rejected.
        id: String,
        /// Human-readable explanation.
        message: String,
    },

    /// Caller-supplied data failed a constraint.
    #[error("validation failed for {field}: {message}")]
    ValidationError {
        /// The offending field.
        field: String,
        /// Human-readable explanation.
        message: String,
    },

    /// Embedder, AI, or statement AI failed and no lower-tier fallback
    /// applies.
    #[error("{service} unavailable: {message}")]
    ServiceUnavailable {
        /// The external service that failed.
        service: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// Database timeout or transient SQL error. Retried with exponential
    /// backoff at the adapter boundary, up to [`MAX_TRANSIENT_RETRIES`]
    /// attempts.
    #[error("transient fault (attempt {attempt}/{max_attempts}): {message}")]
    TransientFault {
        /// Human-readable explanation.
        message: String,
        /// The attempt number that produced this error (1-indexed).
        attempt: u32,
        /// The configured retry ceiling.
        max_attempts: u32,
    },

    /// An AI response could not be interpreted as the expected JSON
    /// shape.
    #[error("failed to parse AI response: {message}")]
    ParseError {
        /// Human-readable explanation.
        message: String,
    },
}

/// Retry ceiling for [`ExpenseError::TransientFault`] at the adapter
/// boundary
pub const MAX_TRANSIENT_RETRIES: u32 = 3;

impl ExpenseError {
    /// Stable, machine-readable code for this error, suitable for a
    /// structured problem report
    pub fn code(&self) -> &'static str {
        match self {
            ExpenseError::NotFound { .. } => "NOT_FOUND",
            ExpenseError::InvalidState { .. } => "INVALID_STATE",
            ExpenseError::ValidationError { .. } => "VALIDATION_ERROR",
            ExpenseError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            ExpenseError::TransientFault { .. } => "TRANSIENT_FAULT",
            ExpenseError::ParseError { .. } => "PARSE_ERROR",
        }
    }

    /// The offending field or id this error concerns, if any.
    pub fn offending(&self) -> Option<&str> {
        match self {
            ExpenseError::NotFound { id, .. } => Some(id),
            ExpenseError::InvalidState { id, .. } => Some(id),
            ExpenseError::ValidationError { field, .. } => Some(field),
            _ => None,
        }
    }

    /// `true` for errors the adapter boundary should retry: only
    /// [`ExpenseError::TransientFault`], and only while `attempt <
    /// max_attempts`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExpenseError::TransientFault {
                attempt,
                max_attempts,
                ..
            } if attempt < max_attempts
        )
    }

    /// Builds a [`ProblemReport`] DTO suitable for returning to an outer
    /// layer.
    pub fn to_problem_report(&self) -> ProblemReport {
        ProblemReport {
            code: self.code().to_string(),
            message: self.to_string(),
            field: self.offending().map(str::to_string),
        }
    }
}

/// A structured, serializable failure report ("a stable `code`,
/// a human message, and the offending field or id").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemReport {
    /// Stable machine-readable code, e.g. `"NOT_FOUND"`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// The offending field or id, if applicable.
    pub field: Option<String>,
}

impl fmt::Display for ProblemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&ExpenseError> for ProblemReport {
    fn from(err: &ExpenseError) -> Self {
        err.to_problem_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_has_stable_code() {
        let err = ExpenseError::NotFound {
            entity: "receipt",
            id: "abc-123".into(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.offending(), Some("abc-123"));
    }

    #[test]
    fn validation_error_reports_field() {
        let err = ExpenseError::ValidationError {
            field: "amount_extracted".into(),
            message: "missing".into(),
        };
        let report = err.to_problem_report();
        assert_eq!(report.code, "VALIDATION_ERROR");
        assert_eq!(report.field.as_deref(), Some("amount_extracted"));
    }

    #[test]
    fn transient_fault_retryable_under_ceiling() {
        let err = ExpenseError::TransientFault {
            message: "timeout".into(),
            attempt: 1,
            max_attempts: MAX_TRANSIENT_RETRIES,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn transient_fault_not_retryable_at_ceiling() {
        let err = ExpenseError::TransientFault {
            message: "timeout".into(),
            attempt: MAX_TRANSIENT_RETRIES,
            max_attempts: MAX_TRANSIENT_RETRIES,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn non_transient_errors_are_never_retryable() {
        let err = ExpenseError::ParseError {
            message: "bad json".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn problem_report_serde_roundtrip() {
        let report = ProblemReport {
            code: "NOT_FOUND".into(),
            message: "receipt x not found".into(),
            field: Some("x".into()),
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: ProblemReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, back);
    }

    #[test]
    fn service_unavailable_display() {
        let err = ExpenseError::ServiceUnavailable {
            service: "embedder",
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "embedder unavailable: connection refused");
    }
}
