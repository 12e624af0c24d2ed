use crate::export::value::DataKind;
use thiserror::Error;

/// Errors surfaced by CSV export.
///
/// Variants carry string payloads and are `Clone` so that a failure detected
/// at construction time can be stored and handed back from every subsequent
/// export call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExportError {
    /// Malformed JSON while decoding a value or a stream element.
    #[error("failed to decode JSON: {0}")]
    Decode(String),

    /// The root value's kind cannot drive row generation.
    #[error("data type {0} is not supported for CSV generation")]
    UnsupportedRoot(DataKind),

    /// A formatter was invoked against a value of the wrong kind.
    #[error("formatter type mismatch with data type: expected {expected}, got {actual}")]
    FormatterTypeMismatch { expected: DataKind, actual: DataKind },

    /// A split predicate was invoked against a value of the wrong kind.
    #[error("split function type mismatch with data type: expected {expected}, got {actual}")]
    SplitTypeMismatch { expected: DataKind, actual: DataKind },

    /// A user-supplied formatter returned an error.
    #[error("error formatting data: {0}")]
    Format(String),

    /// A stream of objects was stringified directly instead of being
    /// consumed through row generation.
    #[error("data is a stream of objects, cannot convert to string")]
    StreamNotStringifiable,

    /// Compact JSON re-serialization of a nested value failed.
    #[error("failed to serialize value: {0}")]
    Serialize(String),

    /// The value being rendered carries an error from an earlier operation.
    #[error("data contains error: {0}")]
    Poisoned(Box<ExportError>),

    /// Rendering one column of a row failed.
    #[error("failed to get value for column {column}: {source}")]
    Column {
        column: String,
        #[source]
        source: Box<ExportError>,
    },

    /// The destination sink rejected a write or flush.
    #[error("csv write failed: {0}")]
    Write(String),
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Write(err.to_string())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Write(err.to_string())
    }
}
