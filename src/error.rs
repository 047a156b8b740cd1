//! Error types for loading and querying series

use thiserror::Error;

/// Main error type for the series engine
#[derive(Error, Debug)]
pub enum Error {
    /// Metric source error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Key-value store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Query error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// The store holds data written by a newer schema than this build understands
    #[error("Schema version {found} is newer than supported version {supported}")]
    SchemaVersion {
        /// Version found in the store
        found: u32,
        /// Highest version this build can read
        supported: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Errors raised by a metric source
///
/// Only `Context`, `Unsupported` and `Fetch` abort a load run; the remaining
/// variants describe a single metric or sample and are skipped by the loader.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The source could not be opened
    #[error("Cannot open context {source_name}: {reason}")]
    Context {
        /// Source locator (archive path, host spec)
        source_name: String,
        /// Underlying cause
        reason: String,
    },

    /// The requested context type cannot be walked
    #[error("Context type {0} is not supported for loading")]
    Unsupported(String),

    /// No metric matches the given name
    #[error("Unknown metric name: {0}")]
    UnknownName(String),

    /// Descriptor lookup failed for a metric
    #[error("Descriptor lookup failed for {pmid}: {reason}")]
    Descriptor {
        /// Metric identifier in domain.cluster.item form
        pmid: String,
        /// Underlying cause
        reason: String,
    },

    /// Label lookup failed
    #[error("Label lookup failed for {scope}: {reason}")]
    Labels {
        /// Which level of the label hierarchy failed
        scope: String,
        /// Underlying cause
        reason: String,
    },

    /// Instance domain lookup failed
    #[error("Instance domain lookup failed for {indom}: {reason}")]
    InstanceDomain {
        /// Instance domain in domain.serial form
        indom: String,
        /// Underlying cause
        reason: String,
    },

    /// A single value could not be extracted from a sample
    #[error("Value extraction failed for {pmid}: {reason}")]
    Extract {
        /// Metric identifier
        pmid: String,
        /// Underlying cause
        reason: String,
    },

    /// Reading the next record failed
    #[error("Fetch failed: {0}")]
    Fetch(String),
}

impl SourceError {
    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SourceError::Context { .. } | SourceError::Unsupported(_) | SourceError::Fetch(_)
        )
    }
}

/// Errors raised by the key-value store adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The server answered with an error reply
    #[error("Server error: {0}")]
    Server(String),

    /// A script could not be registered
    #[error("Script registration failed: {0}")]
    Script(String),

    /// A reply had the wrong shape for the command issued
    #[error("Unexpected reply for {context}: expected {expected}, found {found}")]
    UnexpectedReply {
        /// Command or pass that issued the request
        context: String,
        /// Expected reply kind
        expected: &'static str,
        /// Reply kind actually received
        found: String,
    },

    /// More replies were read than commands issued
    #[error("Pipeline drained: no reply left for {0}")]
    Drained(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors raised while parsing or solving a query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The expression text could not be parsed
    #[error("Parse error at '{at}': {reason}")]
    Parse {
        /// Remaining input at the failure point
        at: String,
        /// Description of the failure
        reason: String,
    },

    /// The operator is recognised but cannot be solved against the store
    #[error("Unsupported operator: {0}")]
    Unsupported(String),

    /// A node is missing an operand it requires
    #[error("Malformed expression: {0}")]
    Malformed(String),

    /// A regular expression operand failed to compile
    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern {
        /// The pattern text
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_source_errors() {
        assert!(SourceError::Fetch("eof".into()).is_fatal());
        assert!(SourceError::Unsupported("host".into()).is_fatal());
        assert!(!SourceError::UnknownName("a.b".into()).is_fatal());
        assert!(!SourceError::Extract {
            pmid: "60.0.1".into(),
            reason: "bad".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_error_wrapping() {
        let err: Error = StoreError::Timeout("pipeline".into()).into();
        assert!(matches!(err, Error::Store(StoreError::Timeout(_))));
        assert_eq!(err.to_string(), "Store error: Timeout: pipeline");

        let err = Error::SchemaVersion {
            found: 3,
            supported: 2,
        };
        assert!(err.to_string().contains("newer"));
    }
}
