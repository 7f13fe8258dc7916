//! Unified error handling for binspect
//!
//! This module provides the error type shared by the stream, field tree,
//! parser and editor layers. The field-set engine and the guesser recover
//! from some of these kinds locally (see [`Error::is_recoverable`]); the
//! others are surfaced to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all binspect operations
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ==================== Stream Errors ====================

    /// A read extends beyond the end of the stream
    #[error("Unable to read {nbits} bits at address {offset}")]
    BitRead {
        /// Bit offset of the read
        offset: u64,
        /// Number of requested bits
        nbits: u64,
    },

    /// Misuse of an output stream (unaligned byte write, bad width)
    #[error("Output stream error: {message}")]
    OutputStream {
        message: String,
    },

    // ==================== Field Tree Errors ====================

    /// Path lookup failed; `container` is the path of the last valid field set
    #[error("Can't get field \"{name}\" from {container}")]
    MissingField {
        container: String,
        name: String,
    },

    /// Two children of one field set share a name
    #[error("Duplicate field name \"{name}\"")]
    DuplicateField {
        name: String,
    },

    /// Malformed field path (empty key)
    #[error("Invalid field path: {path:?}")]
    InvalidPath {
        path: String,
    },

    // ==================== Parser Errors ====================

    /// A parser rejected the stream in its validate step
    #[error("validate() error: {0}")]
    Validate(String),

    /// A format-internal invariant failed while generating fields
    #[error("Parser error: {0}")]
    Parser(String),

    // ==================== Editor Errors ====================

    /// Invalid edit (bad value, read-only field, size mismatch)
    #[error("Editor error: {message}")]
    Editor {
        message: String,
    },

    // ==================== General Errors ====================

    /// Internal error (should not happen)
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },

    /// Custom error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Result type using the unified Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an error with additional context
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Create a parser error
    pub fn parser(message: impl Into<String>) -> Self {
        Error::Parser(message.into())
    }

    /// Create an editor error
    pub fn editor(message: impl Into<String>) -> Self {
        Error::Editor {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(container: impl Into<String>, name: impl Into<String>) -> Self {
        Error::MissingField {
            container: container.into(),
            name: name.into(),
        }
    }

    /// Strip any context wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this is a "not found" type error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::FileNotFound(_) | Error::MissingField { .. }
        )
    }

    /// Check if the field-set engine turns this error into a truncated set
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::BitRead { .. } | Error::Parser(_) | Error::Validate(_) | Error::MissingField { .. }
        )
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
