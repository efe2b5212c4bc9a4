//! Error types for remoteq.

use thiserror::Error;

/// The main error type for remoteq operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A host expression node has no portable mapping and cannot be evaluated locally.
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// The static type of an expression does not determine the requested result shape.
    #[error("Ambiguous result type: {0}")]
    AmbiguousResultType(String),

    /// A type descriptor could not be resolved against the local catalog.
    #[error("Unknown type: '{0}'")]
    UnknownType(String),

    /// Invalid provider or executor setup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested execution discipline has no data provider behind it.
    #[error("No data provider configured for {0} execution")]
    NoProviderConfigured(&'static str),

    /// A single-value request was answered by an empty stream.
    #[error("Remote stream returned no data")]
    EmptyStream,

    /// A single-value request was answered by a stream with more than one element.
    #[error("Remote stream returned more than one element")]
    MultipleElements,

    /// The raw result does not fit the requested shape.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Whatever the remote collaborator reported.
    #[error("Remote execution failed ({type_name}): {message}")]
    RemoteExecution { message: String, type_name: String },

    /// Local execution of a host form failed.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Cooperative cancellation was observed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Malformed wire frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payload (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an unsupported-expression error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedExpression(message.into())
    }

    /// Create an ambiguous-result-type error.
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::AmbiguousResultType(message.into())
    }

    /// Create a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping(message.into())
    }

    /// Create an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Stable name of the error kind, carried across the wire as the
    /// originating type name of a remote failure.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::UnsupportedExpression(_) => "UnsupportedExpressionError",
            Self::AmbiguousResultType(_) => "AmbiguousResultTypeError",
            Self::UnknownType(_) => "UnknownTypeError",
            Self::Configuration(_) => "ConfigurationError",
            Self::NoProviderConfigured(_) => "NoProviderConfiguredError",
            Self::EmptyStream => "EmptyStreamError",
            Self::MultipleElements => "MultipleElementsError",
            Self::Mapping(_) => "MappingError",
            Self::RemoteExecution { .. } => "RemoteExecutionError",
            Self::Execution(_) => "ExecutionError",
            Self::Cancelled => "CancelledError",
            Self::Protocol(_) => "ProtocolError",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type alias for remoteq operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RemoteExecution {
            message: "boom".to_string(),
            type_name: "ExecutionError".to_string(),
        };
        assert_eq!(err.to_string(), "Remote execution failed (ExecutionError): boom");
    }

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(Error::EmptyStream.kind_name(), "EmptyStreamError");
        assert_eq!(Error::mapping("x").kind_name(), "MappingError");
    }
}
