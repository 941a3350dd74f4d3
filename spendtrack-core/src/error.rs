//! Error taxonomy shared by every external call site.
//!
//! Backends report either a transient fault (worth retrying) or a fatal one
//! (propagated immediately). Per-candidate stage failures are modeled where
//! they occur (`ExtractError`, `ResolveError`, `ValidationError`) and never
//! abort a batch.

use thiserror::Error;

/// Error returned by mailbox, model, and sink backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// 5xx-equivalent, timeout, or rate-limit backpressure. Retryable.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// 4xx-equivalent, auth failure, or anything retrying cannot fix.
    #[error("backend error: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Rejected while constructing a `Transaction` from decoded model output.
///
/// Carries the field name and the offending value for diagnostics. The first
/// violation wins; no partially populated transaction is ever produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` rejected value {value:?}")]
    BadField { field: &'static str, value: String },
}

impl ValidationError {
    pub fn bad(field: &'static str, value: impl Into<String>) -> Self {
        ValidationError::BadField {
            field,
            value: value.into(),
        }
    }
}

/// Configuration rejected before the run starts. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no provider rules configured")]
    NoProviders,

    #[error("recency window must be at least one day")]
    ZeroDaysBack,

    #[error("model call limit must be at least one per minute")]
    ZeroCallLimit,

    #[error("unknown timezone {0:?}")]
    BadTimezone(String),

    #[error("provider {provider:?} has an invalid detail pattern: {source}")]
    BadPattern {
        provider: String,
        source: regex::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Transient("503".into()).is_transient());
        assert!(!BackendError::Fatal("401".into()).is_transient());
    }

    #[test]
    fn test_validation_error_carries_field_and_value() {
        let err = ValidationError::bad("time", "00:10 AM");
        assert_eq!(
            err.to_string(),
            "field `time` rejected value \"00:10 AM\""
        );
    }
}
