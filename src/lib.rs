//! # fias-xml-csv Library
//!
//! Streaming conversion of address-registry (FIAS/GAR) XML exports into
//! `;`-delimited CSV, with column layouts resolved from the accompanying XSD
//! schemas and sampled from the data when no schema matches.

pub mod batch;
pub mod cli;
pub mod config;
pub mod converter;
pub mod error;
pub mod file_discovery;
pub mod logging;
pub mod output;
pub mod schema;
pub mod schema_resolver;
pub mod xsd;

pub use batch::{
    BatchConfig, BatchSummary, ConversionOutcome, ConversionProgress, DirectoryConverter,
    ProgressCallback,
};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager};
pub use converter::{
    ColumnSource, ConverterOptions, CsvFormat, LineEnding, Record, XmlToCsvConverter,
    detect_record_type,
};
pub use error::{ConversionError, SchemaError, SchemaFileWarning};
pub use file_discovery::FileDiscovery;
pub use output::Output;
pub use schema::{ColumnDefinition, DeclaredType, RecordTypeSchema, SchemaTable};
pub use schema_resolver::{SchemaResolution, SchemaResolver};
pub use tokio_util::sync::CancellationToken;
