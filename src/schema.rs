//! Resolved record layouts
//!
//! A [`SchemaTable`] maps a record-type name (the tag of the repeating element
//! in a data file) to the ordered columns that make up one output row. The
//! table is built once and shared read-only between conversions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Advisory value type of a column; never used to coerce field values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    #[default]
    String,
    Int,
    Decimal,
    Bool,
    DateTime,
    Time,
}

impl DeclaredType {
    /// Map an XSD primitive type name (with or without a namespace prefix)
    pub fn from_xsd_name(type_name: &str) -> Self {
        let local = type_name.rsplit(':').next().unwrap_or(type_name);

        match local.to_ascii_lowercase().as_str() {
            "int" | "integer" | "long" | "short" | "byte" | "unsignedint" | "unsignedlong"
            | "unsignedshort" | "unsignedbyte" | "nonnegativeinteger" | "positiveinteger"
            | "nonpositiveinteger" | "negativeinteger" => DeclaredType::Int,
            "decimal" | "double" | "float" => DeclaredType::Decimal,
            "boolean" | "bool" => DeclaredType::Bool,
            "date" | "datetime" => DeclaredType::DateTime,
            "time" => DeclaredType::Time,
            _ => DeclaredType::String,
        }
    }
}

/// One output column, taken from an attribute or a child element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub declared_type: DeclaredType,
    pub is_required: bool,
    pub is_attribute: bool,
}

impl ColumnDefinition {
    pub fn attribute(name: impl Into<String>, declared_type: DeclaredType, required: bool) -> Self {
        Self {
            name: name.into(),
            declared_type,
            is_required: required,
            is_attribute: true,
        }
    }

    pub fn element(name: impl Into<String>, declared_type: DeclaredType, required: bool) -> Self {
        Self {
            name: name.into(),
            declared_type,
            is_required: required,
            is_attribute: false,
        }
    }
}

/// Ordered columns of one record type; the order is the header order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypeSchema {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl RecordTypeSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Immutable lookup from record-type name to its layout.
///
/// Keys are case-sensitive exact tag names. Record types without columns are
/// never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaTable {
    record_types: HashMap<String, RecordTypeSchema>,
}

impl SchemaTable {
    /// An empty table; every file falls back to sampling
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, record_type: &str) -> Option<&RecordTypeSchema> {
        self.record_types.get(record_type)
    }

    pub fn contains(&self, record_type: &str) -> bool {
        self.record_types.contains_key(record_type)
    }

    pub fn len(&self) -> usize {
        self.record_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_types.is_empty()
    }

    /// Record-type names in sorted order
    pub fn record_type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.record_types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn into_shared(self) -> Arc<SchemaTable> {
        Arc::new(self)
    }
}

impl FromIterator<RecordTypeSchema> for SchemaTable {
    /// Later entries with the same name do not replace earlier ones.
    fn from_iter<I: IntoIterator<Item = RecordTypeSchema>>(iter: I) -> Self {
        let mut record_types = HashMap::new();
        for schema in iter {
            if schema.is_empty() {
                continue;
            }
            record_types.entry(schema.name.clone()).or_insert(schema);
        }
        Self { record_types }
    }
}
