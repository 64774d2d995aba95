//! Error types for patientsplit.
//!
//! Library crates use [`PatientSplitError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Insufficient evidence is never an error: ambiguous or empty pages come back
//! as unassigned decisions. The only fatal path in the resolution core is
//! configuration validation before processing starts.

use std::path::PathBuf;

/// Top-level error type for all patientsplit operations.
#[derive(Debug, thiserror::Error)]
pub enum PatientSplitError {
    /// Configuration loading or validation error (out-of-range weight,
    /// threshold outside [0,1], unparseable config file, bad regex).
    #[error("config error: {message}")]
    Config { message: String },

    /// Input data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Input parsing error (malformed JSON page records or page text).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Metadata serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PatientSplitError>;

impl PatientSplitError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Whether this error came from configuration validation.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PatientSplitError::config("merge_threshold must be within [0, 1]");
        assert_eq!(
            err.to_string(),
            "config error: merge_threshold must be within [0, 1]"
        );
        assert!(err.is_config());

        let err = PatientSplitError::validation("duplicate page_index 3");
        assert!(err.to_string().contains("page_index 3"));
        assert!(!err.is_config());
    }

    #[test]
    fn parse_error_names_the_input() {
        let err = PatientSplitError::parse("cannot parse 'pages.json': expected `[`");
        assert!(matches!(err, PatientSplitError::Parse { .. }));
        assert_eq!(
            err.to_string(),
            "parse error: cannot parse 'pages.json': expected `[`"
        );
        assert!(!err.is_config());
    }

    #[test]
    fn io_error_carries_path() {
        let err = PatientSplitError::io(
            "/tmp/missing.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("missing.json"));
        assert!(msg.contains("gone"));
    }
}
