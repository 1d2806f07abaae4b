use std::fmt;

use serde::{Deserialize, Serialize};

/// A single rejected field reported by a strategy validation hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub detail: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { field: field.into(), detail: detail.into() }
    }

    pub fn required(field: impl Into<String>) -> Self { Self::new(field, "Required value") }

    pub fn invalid(field: impl Into<String>, value: &str, detail: impl fmt::Display) -> Self {
        Self::new(field, format!("Invalid value: {:?}: {}", value, detail))
    }

    pub fn forbidden(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(field, format!("Forbidden: {}", detail.into()))
    }

    pub fn not_supported(field: impl Into<String>, value: &str, supported: &[&str]) -> Self {
        let quoted: Vec<String> = supported.iter().map(|s| format!("{:?}", s)).collect();
        Self::new(field, format!("Unsupported value: {:?}: supported values: {}", value, quoted.join(", ")))
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.detail)
    }
}

/// Errors surfaced by key derivation, the storage engine and the generic store.
///
/// Engine-level variants carry the raw key in `name` and an empty `resource`; the
/// store adapter rewrites them with [`StoreError::qualify`] before returning.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("namespace parameter required")]
    MissingNamespace,
    #[error("unexpected type: expected {expected}: {reason}")]
    UnexpectedType { expected: String, reason: String },
    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },
    #[error("{resource} \"{name}\" already exists")]
    AlreadyExists { resource: String, name: String },
    #[error("operation cannot be fulfilled on {resource} \"{name}\": {reason}")]
    Conflict { resource: String, name: String, reason: String },
    #[error("{resource} \"{name}\" is invalid: {}", join_errors(.errors))]
    ValidationFailed { resource: String, name: String, errors: Vec<FieldError> },
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
    #[error("expired: {0}")]
    Expired(String),
    #[error("storage engine unavailable: {0}")]
    EngineUnavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

fn join_errors(errors: &[FieldError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { resource: String::new(), name: key.into() }
    }

    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { resource: String::new(), name: key.into() }
    }

    pub fn conflict(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict { resource: String::new(), name: key.into(), reason: reason.into() }
    }

    /// Replace engine-level identity (raw key) with the resource and object name.
    pub fn qualify(self, resource: &str, name: &str) -> Self {
        match self {
            Self::NotFound { .. } => Self::NotFound { resource: resource.to_string(), name: name.to_string() },
            Self::AlreadyExists { .. } => Self::AlreadyExists { resource: resource.to_string(), name: name.to_string() },
            Self::Conflict { reason, .. } => Self::Conflict { resource: resource.to_string(), name: name.to_string(), reason },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
    pub fn is_conflict(&self) -> bool { matches!(self, Self::Conflict { .. }) }

    /// Short, stable label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "invalid_key",
            Self::MissingNamespace => "missing_namespace",
            Self::UnexpectedType { .. } => "unexpected_type",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Conflict { .. } => "conflict",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::InvalidSelector(_) => "invalid_selector",
            Self::Expired(_) => "expired",
            Self::EngineUnavailable(_) => "engine_unavailable",
        }
    }
}
