//! Error types for the Ember query engine.
//!
//! This module provides the error hierarchy used by all operations in the
//! engine fragment, plus [`PreservedError`]: the value that carries an error
//! across the pipeline/consumer boundary of a streaming result.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

/// The primary error type for Ember operations.
#[derive(Error, Debug)]
pub enum EmberError {
    /// Query planning error
    #[error("Planning error: {message}")]
    Plan { message: String },

    /// Query execution error
    #[error("Execution error: {message}")]
    Execution { message: String },

    /// The streaming result was closed before the operation ran
    #[error("Stream closed: {message}")]
    StreamClosed { message: String },

    /// Internal error (bug in the engine)
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Not implemented
    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Serialization or deserialization error
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Operation interrupted
    #[error("Operation interrupted")]
    Interrupted,

    /// Arrow error
    #[error("Arrow error: {message}")]
    Arrow { message: String },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl EmberError {
    /// Create a planning error.
    pub fn plan(message: impl Into<String>) -> Self {
        Self::Plan {
            message: message.into(),
        }
    }

    /// Create an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Create a closed-stream error.
    pub fn stream_closed(message: impl Into<String>) -> Self {
        Self::StreamClosed {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a not implemented error.
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// The [`ErrorKind`] classifying this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Plan { .. } => ErrorKind::Plan,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::StreamClosed { .. } => ErrorKind::StreamClosed,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::InvalidArgument { .. } => ErrorKind::InvalidInput,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::Arrow { .. } => ErrorKind::Execution,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// The message this error was constructed with, without the kind prefix.
    pub fn raw_message(&self) -> String {
        match self {
            Self::Plan { message }
            | Self::Execution { message }
            | Self::StreamClosed { message }
            | Self::Internal { message }
            | Self::InvalidArgument { message }
            | Self::Serialization { message }
            | Self::Arrow { message } => message.clone(),
            Self::NotImplemented { feature } => feature.clone(),
            Self::Interrupted => String::new(),
            Self::Io { source } => source.to_string(),
        }
    }
}

impl From<arrow::error::ArrowError> for EmberError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Arrow {
            message: err.to_string(),
        }
    }
}

/// Result type alias for Ember operations.
pub type Result<T> = std::result::Result<T, EmberError>;

// ---------------------------------------------------------------------------
// Preserved errors
// ---------------------------------------------------------------------------

/// Classification of a preserved error, mirroring the [`EmberError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Plan,
    Execution,
    StreamClosed,
    Internal,
    NotImplemented,
    InvalidInput,
    Serialization,
    Interrupted,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Plan => "Planning",
            ErrorKind::Execution => "Execution",
            ErrorKind::StreamClosed => "Stream Closed",
            ErrorKind::Internal => "Internal",
            ErrorKind::NotImplemented => "Not Implemented",
            ErrorKind::InvalidInput => "Invalid Input",
            ErrorKind::Serialization => "Serialization",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::Io => "IO",
        };
        write!(f, "{}", name)
    }
}

/// An error captured as a value so it can outlive the operation that raised
/// it.
///
/// A streaming result keeps the first failure it observes as a
/// `PreservedError` and re-raises it on every subsequent fetch. The final
/// message is derived lazily from the kind and the raw message; equality
/// deliberately ignores it and the extra info, so two errors compare equal
/// whenever they were raised with the same kind and message.
#[derive(Debug, Clone)]
pub struct PreservedError {
    kind: ErrorKind,
    raw_message: String,
    final_message: OnceLock<String>,
    extra_info: HashMap<String, String>,
}

impl PreservedError {
    /// Preserve an error from its kind and raw message.
    pub fn new(kind: ErrorKind, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            raw_message: raw_message.into(),
            final_message: OnceLock::new(),
            extra_info: HashMap::new(),
        }
    }

    /// Attach a key/value pair of extra information.
    pub fn with_extra_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_info.insert(key.into(), value.into());
        self
    }

    /// The kind of the preserved error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The message the error was constructed with, without the kind prefix.
    pub fn raw_message(&self) -> &str {
        &self.raw_message
    }

    /// Extra information attached to the error.
    pub fn extra_info(&self) -> &HashMap<String, String> {
        &self.extra_info
    }

    /// The final, client-facing message. Computed on first use and cached.
    pub fn message(&self) -> &str {
        self.final_message.get_or_init(|| {
            if self.raw_message.is_empty() {
                format!("{} Error", self.kind)
            } else {
                format!("{} Error: {}", self.kind, self.raw_message)
            }
        })
    }

    /// Re-raise the preserved error as an [`EmberError`], optionally
    /// prepending a context message.
    pub fn to_error(&self, prepended_message: &str) -> EmberError {
        let message = if prepended_message.is_empty() {
            self.raw_message.clone()
        } else {
            format!("{}: {}", prepended_message, self.raw_message)
        };
        match self.kind {
            ErrorKind::Plan => EmberError::Plan { message },
            ErrorKind::Execution => EmberError::Execution { message },
            ErrorKind::StreamClosed => EmberError::StreamClosed { message },
            ErrorKind::Internal => EmberError::Internal { message },
            ErrorKind::NotImplemented => EmberError::NotImplemented { feature: message },
            ErrorKind::InvalidInput => EmberError::InvalidArgument { message },
            ErrorKind::Serialization => EmberError::Serialization { message },
            ErrorKind::Interrupted => EmberError::Interrupted,
            ErrorKind::Io => EmberError::Execution { message },
        }
    }

    /// Render the error as a JSON object, including any extra info.
    pub fn to_json(&self) -> String {
        let mut object = serde_json::Map::new();
        object.insert(
            "exception_type".to_string(),
            serde_json::Value::String(self.kind.to_string()),
        );
        object.insert(
            "exception_message".to_string(),
            serde_json::Value::String(self.raw_message.clone()),
        );
        for (key, value) in &self.extra_info {
            object.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        serde_json::Value::Object(object).to_string()
    }
}

impl PartialEq for PreservedError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.raw_message == other.raw_message
    }
}

impl Eq for PreservedError {}

impl From<&EmberError> for PreservedError {
    fn from(error: &EmberError) -> Self {
        Self::new(error.kind(), error.raw_message())
    }
}

impl From<EmberError> for PreservedError {
    fn from(error: EmberError) -> Self {
        Self::from(&error)
    }
}

impl fmt::Display for PreservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EmberError::execution("worker failed");
        assert_eq!(err.to_string(), "Execution error: worker failed");

        let err = EmberError::stream_closed("result was released");
        assert_eq!(err.to_string(), "Stream closed: result was released");
    }

    #[test]
    fn test_preserved_error_message_is_lazy_and_cached() {
        let err = PreservedError::new(ErrorKind::Execution, "worker failed");
        assert_eq!(err.message(), "Execution Error: worker failed");
        // Second call returns the cached value.
        assert_eq!(err.message(), "Execution Error: worker failed");

        let empty = PreservedError::new(ErrorKind::Interrupted, "");
        assert_eq!(empty.message(), "Interrupted Error");
    }

    #[test]
    fn test_preserved_error_equality_ignores_extra_info() {
        let a = PreservedError::new(ErrorKind::Execution, "worker failed");
        let b = PreservedError::new(ErrorKind::Execution, "worker failed")
            .with_extra_info("position", "14");
        let c = PreservedError::new(ErrorKind::Internal, "worker failed");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_preserved_error_round_trip() {
        let original = EmberError::plan("unsupported join");
        let preserved = PreservedError::from(&original);
        let rebuilt = PreservedError::new(preserved.kind(), preserved.raw_message());
        assert_eq!(preserved, rebuilt);
    }

    #[test]
    fn test_preserved_error_reraise_prepends_context() {
        let preserved = PreservedError::new(ErrorKind::Execution, "worker failed");
        let raised = preserved.to_error("while fetching batch 3");
        assert_eq!(
            raised.to_string(),
            "Execution error: while fetching batch 3: worker failed"
        );

        let raised = preserved.to_error("");
        assert_eq!(raised.to_string(), "Execution error: worker failed");
    }

    #[test]
    fn test_preserved_error_to_json() {
        let preserved =
            PreservedError::new(ErrorKind::Execution, "worker failed").with_extra_info("line", "4");
        let value: serde_json::Value = serde_json::from_str(&preserved.to_json()).unwrap();
        assert_eq!(value["exception_type"], "Execution");
        assert_eq!(value["exception_message"], "worker failed");
        assert_eq!(value["line"], "4");
    }
}
