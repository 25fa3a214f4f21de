use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single rejected submission field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Field errors in the order the fields were checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first_field(&self) -> Option<&str> {
        self.0.first().map(|e| e.field.as_str())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was rejected.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CoordinatorError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Validation error: {0}")]
    Validation(FieldErrors),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage or network hiccup; safe to retry with backoff.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Internal invariant violation.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl CoordinatorError {
    /// Shorthand for a validation error on one field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::default();
        errors.push(field, message);
        CoordinatorError::Validation(errors)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinatorError::Transient(_))
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(err: std::io::Error) -> Self {
        CoordinatorError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Fatal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = CoordinatorError::NotFound("job 7".to_string());
        assert_eq!(err.to_string(), "Not found: job 7");
    }

    #[test]
    fn test_conflict_display() {
        let err = CoordinatorError::Conflict("job 7 is running".to_string());
        assert_eq!(err.to_string(), "Conflict: job 7 is running");
    }

    #[test]
    fn test_validation_display_lists_fields_in_order() {
        let mut errors = FieldErrors::default();
        errors.push("name", "is required");
        errors.push("mappersCount", "must be at least 1");
        let err = CoordinatorError::Validation(errors);
        assert_eq!(
            err.to_string(),
            "Validation error: name: is required; mappersCount: must be at least 1"
        );
    }

    #[test]
    fn test_invalid_shorthand_names_field() {
        match CoordinatorError::invalid("reducersCount", "must be at least 1") {
            CoordinatorError::Validation(errors) => {
                assert_eq!(errors.first_field(), Some("reducersCount"));
            }
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_empty_field_errors_are_ok() {
        assert!(FieldErrors::default().into_result().is_ok());
    }

    #[test]
    fn test_from_io_error_is_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk busy");
        let err: CoordinatorError = io_err.into();
        assert!(err.is_transient());
        assert!(err.to_string().contains("disk busy"));
    }

    #[test]
    fn test_from_serde_json_error_is_fatal() {
        let json_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err: CoordinatorError = json_err.into();
        match err {
            CoordinatorError::Fatal(_) => {}
            other => panic!("Expected Fatal, got: {:?}", other),
        }
    }
}
