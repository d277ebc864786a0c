//! Error types for the RBAC core

use crate::tree::Violation;
use std::sync::Arc;
use thiserror::Error;

/// RBAC core errors
#[derive(Debug, Error)]
pub enum RbacError {
    /// Malformed path, missing module suffix, empty normalized path
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource type outside the closed enumeration
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    /// One or more structural invariants would be broken
    #[error("Structural violation: {}", format_violations(.0))]
    StructuralViolation(Vec<Violation>),

    /// Role or resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A single-flight fetch failed; every waiter shares `source`
    #[error("Cache fetch failed for '{key}': {source}")]
    CacheFetchFailure {
        key: String,
        #[source]
        source: Arc<RbacError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RbacError {
    /// Violations carried by a `StructuralViolation`, empty otherwise
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::StructuralViolation(violations) => violations,
            _ => &[],
        }
    }

    /// Whether this error, or the shared fetch error it wraps, is `NotFound`
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::CacheFetchFailure { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for RBAC operations
pub type Result<T> = std::result::Result<T, RbacError>;
