//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A wire name did not match any known variant
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

impl DomainError {
    /// Shorthand for an unknown enum wire name.
    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
