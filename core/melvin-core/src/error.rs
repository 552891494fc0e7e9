//! Error types for the MELVIN query engine.
//!
//! All public APIs return `MelvinResult<T>` — no panics in library code.

use std::fmt;
use thiserror::Error;

/// Which namespace an unresolved name was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Measure,
    Dimension,
    /// Either namespace (filter predicates may reference both)
    Field,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Measure => f.write_str("measure"),
            FieldKind::Dimension => f.write_str("dimension"),
            FieldKind::Field => f.write_str("field"),
        }
    }
}

/// Renders `" (did you mean 'x'?)"` or nothing.
fn hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{s}'?)"),
        None => String::new(),
    }
}

/// Unified error type for all MELVIN operations.
#[derive(Debug, Error)]
pub enum MelvinError {
    /// Re-registration of a domain with a non-additive schema change
    #[error("schema conflict in domain '{domain}': {reason}")]
    SchemaConflict { domain: String, reason: String },

    /// Schema definition that fails validation
    #[error("invalid schema for domain '{domain}': {reason}")]
    InvalidSchema { domain: String, reason: String },

    /// Domain was never registered
    #[error("domain '{0}' not registered")]
    UnknownDomain(String),

    /// Measure or dimension not declared in the domain's schema
    #[error("unknown {kind} '{name}' in domain '{domain}'{}", hint(.suggestion))]
    UnknownField {
        kind: FieldKind,
        name: String,
        domain: String,
        suggestion: Option<String>,
    },

    /// Malformed query text
    #[error("syntax error at position {position}: {message}{}", hint(.suggestion))]
    SyntaxError {
        message: String,
        position: usize,
        suggestion: Option<String>,
    },

    /// Ingestion collision on an existing record id
    #[error("record id {id} already exists in domain '{domain}'")]
    DuplicateId { domain: String, id: u64 },

    /// Field value incompatible with its declared type
    #[error("type mismatch for field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// Time-based transform applied without a temporal group-by dimension
    #[error("transform '{transform}' requires grouping by a temporal dimension")]
    TransformRequiresTemporalGrouping { transform: String },

    /// Invalid arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Index lookup miss (recovered by the planner, never surfaced by queries)
    #[error("index not found: {0}")]
    NotFound(String),

    /// Storage layer error (corruption, bad keys, etc.)
    #[error("storage error: {0}")]
    Storage(String),

    /// sled embedded database error
    #[error("sled error: {source}")]
    Sled {
        #[from]
        source: sled::Error,
    },

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for all MELVIN operations.
pub type MelvinResult<T> = Result<T, MelvinError>;

impl From<serde_json::Error> for MelvinError {
    fn from(err: serde_json::Error) -> Self {
        MelvinError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for MelvinError {
    fn from(err: bincode::Error) -> Self {
        MelvinError::Serialization(err.to_string())
    }
}

impl MelvinError {
    pub(crate) fn syntax(message: impl Into<String>, position: usize) -> Self {
        MelvinError::SyntaxError {
            message: message.into(),
            position,
            suggestion: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_unknown_field_with_suggestion() {
        let err = MelvinError::UnknownField {
            kind: FieldKind::Dimension,
            name: "engin".to_string(),
            domain: "qa".to_string(),
            suggestion: Some("engine".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "unknown dimension 'engin' in domain 'qa' (did you mean 'engine'?)"
        );
    }

    #[test]
    fn error_display_unknown_field_without_suggestion() {
        let err = MelvinError::UnknownField {
            kind: FieldKind::Measure,
            name: "foo".to_string(),
            domain: "qa".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unknown measure 'foo' in domain 'qa'");
    }

    #[test]
    fn error_display_duplicate_id() {
        let err = MelvinError::DuplicateId {
            domain: "qa".to_string(),
            id: 42,
        };
        assert_eq!(err.to_string(), "record id 42 already exists in domain 'qa'");
    }

    #[test]
    fn error_display_syntax() {
        let err = MelvinError::SyntaxError {
            message: "unexpected token 'whre'".to_string(),
            position: 14,
            suggestion: Some("where".to_string()),
        };
        assert!(err.to_string().contains("position 14"));
        assert!(err.to_string().contains("did you mean 'where'"));
    }

    #[test]
    fn error_display_transform() {
        let err = MelvinError::TransformRequiresTemporalGrouping {
            transform: "rolling 7d avg".to_string(),
        };
        assert!(err.to_string().contains("rolling 7d avg"));
        assert!(err.to_string().contains("temporal"));
    }

    #[test]
    fn melvin_result_err() {
        let result: MelvinResult<i32> = Err(MelvinError::InvalidArgument("top 0".into()));
        assert!(result.is_err());
    }
}
