use std::path::PathBuf;

use thiserror::Error;

/// Main conversion error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {file} at byte {position} - {source}")]
    Xml {
        file: PathBuf,
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML file not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("XML directory not found: {path}")]
    SourceDirectoryNotFound { path: PathBuf },

    #[error("No data element found in {path}")]
    NoDataElement { path: PathBuf },

    #[error("Unexpected end of file: {file} - {depth} element(s) left open")]
    UnexpectedEof { file: PathBuf, depth: usize },

    #[error("Output {output} would also be written from {other}")]
    OutputCollision { output: PathBuf, other: PathBuf },

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConversionError {
    /// True when the caller asked to stop, as opposed to a file failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConversionError::Cancelled)
    }
}

/// Schema-resolution error types
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema directory cannot be read: {path} - {reason}")]
    DirectoryUnreadable { path: PathBuf, reason: String },

    #[error("Invalid schema file: {path} - {details}")]
    InvalidSchemaFile { path: PathBuf, details: String },
}

/// A schema file that was skipped while resolving a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaFileWarning {
    pub path: PathBuf,
    pub message: String,
}

impl From<SchemaError> for SchemaFileWarning {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::InvalidSchemaFile { path, details } => SchemaFileWarning {
                path,
                message: details,
            },
            other => SchemaFileWarning {
                path: PathBuf::new(),
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ConversionError>;

/// Schema result type alias
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
