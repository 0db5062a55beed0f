//! Error handling for the provisioning pipeline.
//!
//! Errors are layered the same way the pipeline is: document and schema
//! problems are fatal before any remote call, API problems are scoped to
//! the entity that triggered them and only escalate when the whole run
//! cannot succeed (authentication).

use std::fmt;

use thiserror::Error;

/// Top-level error for the provisioning tool.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors loading, addressing, or rewriting the setup document.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Setup file not found: {path}")]
    NotFound { path: String },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Unexpected document shape at {path}: expected {expected}")]
    UnexpectedShape { path: String, expected: String },

    #[error("No node at path {path}")]
    PathNotFound { path: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Errors from schema loading, compilation, or instance validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema {path}: {message}")]
    Load { path: String, message: String },

    #[error("Schema did not compile: {0}")]
    Compile(String),

    #[error("{0}")]
    Violations(ViolationSet),
}

/// One failing schema constraint, with the structural path that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON pointer into the validated instance ("/tenants/0/name").
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// All violations found in one validation pass, never just the first.
#[derive(Debug, Clone, Default)]
pub struct ViolationSet {
    pub violations: Vec<Violation>,
}

impl ViolationSet {
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }
}

impl fmt::Display for ViolationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} schema violation(s)", self.violations.len())?;
        for v in &self.violations {
            write!(f, "\n  {v}")?;
        }
        Ok(())
    }
}

/// Errors from the remote management API.
///
/// Everything except [`ApiError::Unauthenticated`] is recoverable at the
/// entity boundary: the engine logs it and moves on to siblings.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid server address: {0}")]
    InvalidEndpoint(String),

    #[error("Server returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// A fatal error halts the whole run: once authentication fails,
    /// every subsequent call will fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Unauthenticated(_))
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_set_displays_every_entry() {
        let set = ViolationSet {
            violations: vec![
                Violation {
                    path: "/tenants/0/name".to_string(),
                    message: "\"name\" is a required property".to_string(),
                },
                Violation {
                    path: "/tenants/1/maxGatewayCount".to_string(),
                    message: "-1 is less than the minimum of 0".to_string(),
                },
            ],
        };
        let rendered = set.to_string();
        assert!(rendered.starts_with("2 schema violation(s)"));
        assert!(rendered.contains("/tenants/0/name"));
        assert!(rendered.contains("/tenants/1/maxGatewayCount"));
    }

    #[test]
    fn only_auth_errors_are_fatal() {
        assert!(ApiError::Unauthenticated("bad token".into()).is_fatal());
        assert!(!ApiError::AlreadyExists("tenant".into()).is_fatal());
        assert!(!ApiError::Unavailable("overloaded".into()).is_fatal());
    }
}
