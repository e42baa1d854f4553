//! Error types for Grove.
//!
//! Library crates use [`GroveError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Grove operations.
#[derive(Debug, thiserror::Error)]
pub enum GroveError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A required file or node does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Malformed structured document, or service output that fails validation.
    #[error("schema error: {message}")]
    Schema {
        /// Id of the node where validation failed, when known.
        node_id: Option<String>,
        message: String,
    },

    /// A call to an external service failed.
    #[error("{service} service failure: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid caller input (unknown tool, missing argument, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GroveError>;

impl GroveError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a not-found error describing the missing thing.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a schema error not tied to a specific node.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
            node_id: None,
            message: msg.into(),
        }
    }

    /// Create a schema error reported against a node id.
    pub fn schema_at(node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self::Schema {
            message: format!("node '{node_id}': {}", msg.into()),
            node_id: Some(node_id),
        }
    }

    /// Create a service failure for the named service.
    pub fn service(service: &'static str, msg: impl Into<String>) -> Self {
        Self::Service {
            service,
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a [`GroveError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = GroveError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = GroveError::service("classification", "timed out");
        assert_eq!(err.to_string(), "classification service failure: timed out");

        let err = GroveError::not_found("node '3wire_busy'");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("3wire_busy"));
    }

    #[test]
    fn schema_at_reports_node_id() {
        let err = GroveError::schema_at("serial", "missing field `title`");
        match &err {
            GroveError::Schema { node_id, .. } => assert_eq!(node_id.as_deref(), Some("serial")),
            other => panic!("expected schema error, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "schema error: node 'serial': missing field `title`"
        );
    }
}
