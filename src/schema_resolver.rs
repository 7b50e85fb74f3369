//! Builds record layouts from a directory of XSD files
//!
//! Each complex element becomes a [`RecordTypeSchema`] whose columns are its
//! attributes followed by the elements of its sequence.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{SchemaError, SchemaFileWarning, SchemaResult};
use crate::file_discovery::FileDiscovery;
use crate::schema::{ColumnDefinition, DeclaredType, RecordTypeSchema, SchemaTable};
use crate::xsd::{
    self, AttributeDecl, ComplexType, ContentModel, Derivation, ElementContent, ElementDecl,
    Particle, XsdDocument, XsdResult, local_part,
};

/// Bound on base-type, simple-type and nesting chains; schemas may be recursive
const MAX_TYPE_DEPTH: usize = 32;

/// Outcome of resolving a schema directory
#[derive(Debug, Clone, Default)]
pub struct SchemaResolution {
    pub table: SchemaTable,
    pub warnings: Vec<SchemaFileWarning>,
    pub files_read: usize,
}

/// Builds a [`SchemaTable`] from every `.xsd` file below a directory
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    discovery: FileDiscovery,
}

impl SchemaResolver {
    pub fn new() -> Self {
        Self {
            discovery: FileDiscovery::new().with_extensions(vec!["xsd".to_string()]),
        }
    }

    /// Resolve a directory; malformed schema files are logged and skipped
    pub async fn resolve(&self, schema_dir: &Path) -> SchemaResult<SchemaTable> {
        Ok(self.resolve_detailed(schema_dir).await?.table)
    }

    /// Resolve a directory and return the skipped files alongside the table
    pub async fn resolve_detailed(&self, schema_dir: &Path) -> SchemaResult<SchemaResolution> {
        info!(directory = %schema_dir.display(), "Loading XSD schemas");

        let unreadable = |reason: String| SchemaError::DirectoryUnreadable {
            path: schema_dir.to_path_buf(),
            reason,
        };

        let metadata = tokio::fs::metadata(schema_dir)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(unreadable("not a directory".to_string()));
        }

        let mut files = self
            .discovery
            .discover_files(schema_dir)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        files.sort();

        let mut set = SchemaSet::default();
        let mut warnings = Vec::new();
        let mut files_read = 0;

        for file in files {
            match load_document(&file).await {
                Ok(doc) => {
                    set.merge(doc);
                    files_read += 1;
                }
                Err(err) => {
                    warn!(schema = %file.display(), error = %err, "Failed to load schema");
                    warnings.push(SchemaFileWarning::from(err));
                }
            }
        }

        let table = set.build_table();
        info!(
            record_types = table.len(),
            files = files_read,
            skipped = warnings.len(),
            "Loaded schema definitions"
        );

        Ok(SchemaResolution {
            table,
            warnings,
            files_read,
        })
    }

    /// Build a table from in-memory XSD documents
    pub fn resolve_sources<'a>(
        sources: impl IntoIterator<Item = &'a str>,
    ) -> XsdResult<SchemaTable> {
        let mut set = SchemaSet::default();
        for source in sources {
            set.merge(xsd::parse_document(source)?);
        }
        Ok(set.build_table())
    }
}

impl Default for SchemaResolver {
    fn default() -> Self {
        Self::new()
    }
}

async fn load_document(path: &Path) -> SchemaResult<XsdDocument> {
    let invalid = |details: String| SchemaError::InvalidSchemaFile {
        path: path.to_path_buf(),
        details,
    };

    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    xsd::parse_document(text.trim_start_matches('\u{feff}')).map_err(|e| invalid(e.to_string()))
}

/// Combined declarations of all loaded documents, keyed by local name.
/// The first definition of a name wins.
#[derive(Debug, Default)]
struct SchemaSet {
    elements: Vec<ElementDecl>,
    element_index: HashMap<String, usize>,
    complex_types: HashMap<String, ComplexType>,
    simple_types: HashMap<String, Option<String>>,
    attributes: HashMap<String, AttributeDecl>,
}

impl SchemaSet {
    fn merge(&mut self, doc: XsdDocument) {
        for element in doc.elements {
            if element.is_reference || self.element_index.contains_key(&element.name) {
                debug!(element = %element.name, "Skipping duplicate element declaration");
                continue;
            }
            self.element_index
                .insert(element.name.clone(), self.elements.len());
            self.elements.push(element);
        }
        for (name, ct) in doc.complex_types {
            self.complex_types.entry(name).or_insert(ct);
        }
        for (name, base) in doc.simple_types {
            self.simple_types.entry(name).or_insert(base);
        }
        for attribute in doc.attributes {
            self.attributes
                .entry(attribute.name.clone())
                .or_insert(attribute);
        }
    }

    /// Top-level declarations first, then nested ones in document order
    fn build_table(&self) -> SchemaTable {
        let mut layouts = Vec::new();

        for element in &self.elements {
            if let Some(layout) = self.layout_for(element) {
                debug!(
                    element = %layout.name,
                    columns = layout.columns.len(),
                    "Parsed schema for element"
                );
                layouts.push(layout);
            }
        }
        for element in &self.elements {
            self.collect_nested(element, 0, &mut layouts);
        }

        layouts.into_iter().collect()
    }

    fn collect_nested(&self, element: &ElementDecl, depth: usize, out: &mut Vec<RecordTypeSchema>) {
        if depth >= MAX_TYPE_DEPTH {
            return;
        }
        let Some(ct) = self.complex_type_of(element) else {
            return;
        };
        for nested in ct.model.nested_elements() {
            if nested.is_reference {
                continue;
            }
            if let Some(layout) = self.layout_for(nested) {
                out.push(layout);
            }
            self.collect_nested(nested, depth + 1, out);
        }
    }

    fn top_level(&self, name: &str) -> Option<&ElementDecl> {
        self.element_index.get(name).map(|&i| &self.elements[i])
    }

    fn layout_for(&self, element: &ElementDecl) -> Option<RecordTypeSchema> {
        let decl = if element.is_reference {
            self.top_level(&element.name)?
        } else {
            element
        };
        let ct = self.complex_type_of(decl)?;
        Some(RecordTypeSchema::new(decl.name.clone(), self.columns_of(ct)))
    }

    fn complex_type_of<'a>(&'a self, decl: &'a ElementDecl) -> Option<&'a ComplexType> {
        match &decl.content {
            ElementContent::Complex(ct) => Some(ct),
            ElementContent::Simple { .. } => None,
            ElementContent::Referenced => decl
                .type_name
                .as_deref()
                .and_then(|t| self.complex_types.get(local_part(t))),
        }
    }

    /// Attributes first, then sequence elements; base types come before derived ones
    fn columns_of(&self, ct: &ComplexType) -> Vec<ColumnDefinition> {
        let mut attributes = Vec::new();
        let mut elements = Vec::new();
        self.split_columns(ct, 0, &mut attributes, &mut elements);
        attributes.extend(elements);
        attributes
    }

    fn split_columns(
        &self,
        ct: &ComplexType,
        depth: usize,
        attributes: &mut Vec<ColumnDefinition>,
        elements: &mut Vec<ColumnDefinition>,
    ) {
        if depth >= MAX_TYPE_DEPTH {
            return;
        }

        match &ct.derivation {
            Some(Derivation::Extension(base)) => {
                if let Some(base_ct) = self.complex_types.get(local_part(base)) {
                    self.split_columns(base_ct, depth + 1, attributes, elements);
                }
            }
            // A restriction restates its content model but inherits attributes
            Some(Derivation::Restriction(base)) => {
                if let Some(base_ct) = self.complex_types.get(local_part(base)) {
                    let mut restated = Vec::new();
                    self.split_columns(base_ct, depth + 1, attributes, &mut restated);
                }
            }
            None => {}
        }

        for attribute in &ct.attributes {
            let existing = attributes.iter().position(|c| c.name == attribute.name);
            if attribute.prohibited {
                if let Some(index) = existing {
                    attributes.remove(index);
                }
                continue;
            }

            let resolved = if attribute.is_reference {
                self.attributes.get(&attribute.name).unwrap_or(attribute)
            } else {
                attribute
            };
            let column = ColumnDefinition::attribute(
                attribute.name.clone(),
                self.declared_type(resolved.type_name.as_deref()),
                attribute.required,
            );
            match existing {
                Some(index) => attributes[index] = column,
                None => attributes.push(column),
            }
        }

        if let ContentModel::Sequence(items) = &ct.model {
            for item in items {
                let Particle::Element(element) = item else {
                    continue;
                };
                let decl = if element.is_reference {
                    self.top_level(&element.name).unwrap_or(element)
                } else {
                    element
                };
                elements.push(ColumnDefinition::element(
                    element.name.clone(),
                    self.element_type(decl),
                    element.min_occurs >= 1,
                ));
            }
        }
    }

    fn element_type(&self, decl: &ElementDecl) -> DeclaredType {
        match &decl.content {
            ElementContent::Simple { base } => self.declared_type(base.as_deref()),
            ElementContent::Complex(_) => DeclaredType::String,
            ElementContent::Referenced => self.declared_type(decl.type_name.as_deref()),
        }
    }

    /// Follow named simple types down to a built-in type name
    fn declared_type(&self, type_name: Option<&str>) -> DeclaredType {
        let Some(mut current) = type_name else {
            return DeclaredType::String;
        };
        for _ in 0..MAX_TYPE_DEPTH {
            match self.simple_types.get(local_part(current)) {
                Some(Some(base)) => current = base,
                _ => break,
            }
        }
        DeclaredType::from_xsd_name(current)
    }
}
