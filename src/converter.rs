//! Streaming XML to delimited-text conversion
//!
//! A data file is a root element wrapping many flat record elements:
//!
//! ```xml
//! <HOUSES>
//!   <HOUSE HOUSEID="1" HOUSENUM="5"><REGIONCODE>77</REGIONCODE></HOUSE>
//!   <HOUSE HOUSEID="2" HOUSENUM="6A"/>
//! </HOUSES>
//! ```
//!
//! The tag of the first child of the root is the record type. Its columns come
//! from the [`SchemaTable`] when the record type is known there, otherwise they
//! are sampled from the first record. Records are read one at a time with a
//! pull parser and written out immediately, so memory use does not depend on
//! the size of the file.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConversionError, Result};
use crate::schema::SchemaTable;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Row terminator of the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Lf,
    #[default]
    Crlf,
}

impl LineEnding {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::Crlf => b"\r\n",
        }
    }
}

/// Byte-level layout of the delimited output.
///
/// The default is the layout downstream loaders read: UTF-8 with a byte order
/// mark, `;` delimited, CRLF-terminated rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvFormat {
    pub delimiter: u8,
    pub quote: u8,
    pub line_ending: LineEnding,
    pub utf8_bom: bool,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: b';',
            quote: b'"',
            line_ending: LineEnding::Crlf,
            utf8_bom: true,
        }
    }
}

impl CsvFormat {
    fn writer_builder(&self) -> csv::WriterBuilder {
        let mut builder = csv::WriterBuilder::new();
        builder
            .delimiter(self.delimiter)
            .quote(self.quote)
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(match self.line_ending {
                LineEnding::Lf => csv::Terminator::Any(b'\n'),
                LineEnding::Crlf => csv::Terminator::CRLF,
            });
        builder
    }
}

/// Converter settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterOptions {
    pub csv: CsvFormat,
    /// Emit a progress log line every this many records
    pub progress_interval: u64,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            csv: CsvFormat::default(),
            progress_interval: 10_000,
        }
    }
}

/// Where the column set of a file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnSource {
    Schema,
    Sampled,
}

/// One buffered record element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub tag: String,
    /// Attributes in document order, namespace declarations excluded
    pub attributes: Vec<(String, String)>,
    /// Direct child elements in document order with their full text content
    pub children: Vec<(String, String)>,
}

impl Record {
    /// Attribute value, else first same-named child's text, else empty
    pub fn field(&self, column: &str) -> &str {
        self.attributes
            .iter()
            .find(|(name, _)| name == column)
            .or_else(|| self.children.iter().find(|(name, _)| name == column))
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }

    /// Attribute names, then names of children with non-blank text
    pub fn sampled_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        let candidates = self.attributes.iter().chain(
            self.children
                .iter()
                .filter(|(_, value)| !value.trim().is_empty()),
        );
        for (name, _) in candidates {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
        columns
    }
}

/// Schema-aware streaming converter.
///
/// Cloning is cheap; the schema table is shared.
#[derive(Debug, Clone)]
pub struct XmlToCsvConverter {
    schemas: Arc<SchemaTable>,
    options: ConverterOptions,
}

impl XmlToCsvConverter {
    pub fn new(schemas: Arc<SchemaTable>) -> Self {
        Self::with_options(schemas, ConverterOptions::default())
    }

    pub fn with_options(schemas: Arc<SchemaTable>, options: ConverterOptions) -> Self {
        Self { schemas, options }
    }

    /// A converter without schema definitions; every file is sampled
    pub fn sampling() -> Self {
        Self::new(Arc::new(SchemaTable::empty()))
    }

    pub fn schemas(&self) -> &Arc<SchemaTable> {
        &self.schemas
    }

    pub fn options(&self) -> &ConverterOptions {
        &self.options
    }

    /// Convert one XML file, returning the number of rows written.
    ///
    /// A file without any record element converts to zero rows and no output
    /// file is created. On cancellation the partially written output is left
    /// in place.
    pub async fn convert_file(
        &self,
        xml_path: &Path,
        csv_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if !tokio::fs::try_exists(xml_path).await.unwrap_or(false) {
            return Err(ConversionError::SourceNotFound {
                path: xml_path.to_path_buf(),
            });
        }

        let converter = self.clone();
        let xml_path = xml_path.to_path_buf();
        let csv_path = csv_path.to_path_buf();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            converter.convert_file_blocking(&xml_path, &csv_path, &cancel)
        })
        .await
        .map_err(|e| ConversionError::Concurrency {
            details: format!("Join error: {}", e),
        })?
    }

    /// Synchronous variant of [`convert_file`](Self::convert_file)
    pub fn convert_file_blocking(
        &self,
        xml_path: &Path,
        csv_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        info!(xml = %xml_path.display(), csv = %csv_path.display(), "Converting");
        let start = Instant::now();

        match self.convert_records(xml_path, csv_path, cancel) {
            Ok(records) => {
                info!(
                    records,
                    file = %file_name(xml_path),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Converted"
                );
                Ok(records)
            }
            Err(ConversionError::NoDataElement { path }) => {
                warn!(xml = %path.display(), "No data elements found");
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    fn convert_records(
        &self,
        xml_path: &Path,
        csv_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let file = File::open(xml_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConversionError::SourceNotFound {
                path: xml_path.to_path_buf(),
            },
            _ => ConversionError::Io(e),
        })?;
        self.convert_stream(BufReader::new(file), xml_path, csv_path, cancel)
    }

    fn convert_stream<R: BufRead>(
        &self,
        input: R,
        xml_path: &Path,
        csv_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut records = RecordReader::new(input, xml_path, cancel);

        let first = records
            .next_record(None)?
            .ok_or_else(|| ConversionError::NoDataElement {
                path: xml_path.to_path_buf(),
            })?;
        let record_type = first.tag.clone();
        let (columns, source) = self.columns_for(&first);
        debug!(record_type = %record_type, ?source, columns = %columns.join(", "), "Columns");

        if let Some(parent) = csv_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let output = File::create(csv_path)?;
        let mut rows = RowWriter::new(&output, &self.options.csv)?;
        rows.write_row(columns.iter().map(String::as_str))?;

        let written = self.write_records(&mut rows, &mut records, &columns, first);
        // Rows written before a failure or cancellation stay in the file
        let flushed = rows.flush();
        let count = written?;
        flushed?;

        if records.skipped > 0 {
            debug!(
                skipped = records.skipped,
                record_type = %record_type,
                "Skipped elements of another type"
            );
        }

        Ok(count)
    }

    fn write_records<R: BufRead>(
        &self,
        rows: &mut RowWriter<'_>,
        records: &mut RecordReader<'_, R>,
        columns: &[String],
        first: Record,
    ) -> Result<u64> {
        rows.write_row(columns.iter().map(|c| first.field(c)))?;
        let mut count: u64 = 1;

        while let Some(record) = records.next_record(Some(&first.tag))? {
            rows.write_row(columns.iter().map(|c| record.field(c)))?;
            count += 1;

            if count % self.options.progress_interval == 0 {
                debug!(records = count, file = %file_name(&records.path), "Processed records");
            }
        }

        Ok(count)
    }

    /// Column names for a file whose first record is `first`
    pub fn columns_for(&self, first: &Record) -> (Vec<String>, ColumnSource) {
        match self.schemas.get(&first.tag) {
            Some(schema) => {
                info!(
                    element = %first.tag,
                    columns = schema.columns.len(),
                    "Using XSD schema"
                );
                (schema.column_names(), ColumnSource::Schema)
            }
            None => {
                warn!(element = %first.tag, "Schema not found, using dynamic detection");
                let columns = first.sampled_columns();
                info!(columns = columns.len(), "Detected columns dynamically");
                (columns, ColumnSource::Sampled)
            }
        }
    }
}

/// Find the record-type name of a file without converting it
pub fn detect_record_type(xml_path: &Path) -> Result<Option<String>> {
    let file = File::open(xml_path)?;
    let cancel = CancellationToken::new();
    let mut records = RecordReader::new(BufReader::new(file), xml_path, &cancel);
    Ok(records.next_record(None)?.map(|r| r.tag))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Delimited rows written to an output file
struct RowWriter<'f> {
    csv: csv::Writer<&'f File>,
    file: &'f File,
    terminator: &'static [u8],
}

impl<'f> RowWriter<'f> {
    fn new(file: &'f File, format: &CsvFormat) -> Result<Self> {
        if format.utf8_bom {
            let mut raw = file;
            raw.write_all(UTF8_BOM)?;
        }
        Ok(Self {
            csv: format.writer_builder().from_writer(file),
            file,
            terminator: format.line_ending.as_bytes(),
        })
    }

    /// The csv writer renders a lone empty field, and an empty record, as
    /// `""`; those rows are written as a bare terminator.
    fn write_row<'a>(&mut self, fields: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let fields: Vec<&str> = fields.into_iter().collect();
        match fields.as_slice() {
            [] | [""] => {
                self.csv.flush()?;
                let mut raw = self.file;
                raw.write_all(self.terminator)?;
            }
            _ => self.csv.write_record(&fields)?,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.csv.flush()?;
        Ok(())
    }
}

/// Owned form of the parser events the record reader cares about
enum Token {
    Open {
        tag: String,
        attributes: Vec<(String, String)>,
        empty: bool,
    },
    Close,
    Text(String),
    Eof,
    Other,
}

/// Pulls record elements (children of the document root) one at a time
struct RecordReader<'c, R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    /// Open elements outside the record currently being read
    depth: usize,
    path: PathBuf,
    cancel: &'c CancellationToken,
    skipped: u64,
}

impl<'c, R: BufRead> RecordReader<'c, R> {
    fn new(source: R, path: &Path, cancel: &'c CancellationToken) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);

        Self {
            reader,
            buf: Vec::with_capacity(4096),
            depth: 0,
            path: path.to_path_buf(),
            cancel,
            skipped: 0,
        }
    }

    /// Next record element; with `record_type`, elements of other types are skipped
    fn next_record(&mut self, record_type: Option<&str>) -> Result<Option<Record>> {
        loop {
            match self.next_token()? {
                Token::Open {
                    tag,
                    attributes,
                    empty,
                } => {
                    self.check_cancelled()?;

                    if self.depth != 1 {
                        if !empty {
                            self.depth += 1;
                        }
                        continue;
                    }

                    let children = if empty {
                        Vec::new()
                    } else {
                        self.read_children()?
                    };

                    if record_type.is_some_and(|t| t != tag) {
                        self.skipped += 1;
                        continue;
                    }

                    return Ok(Some(Record {
                        tag,
                        attributes,
                        children,
                    }));
                }
                Token::Close => self.depth = self.depth.saturating_sub(1),
                Token::Eof => {
                    if self.depth > 0 {
                        return Err(ConversionError::UnexpectedEof {
                            file: self.path.clone(),
                            depth: self.depth,
                        });
                    }
                    return Ok(None);
                }
                Token::Text(_) | Token::Other => {}
            }
        }
    }

    /// Consume the rest of a record element, collecting its direct children
    fn read_children(&mut self) -> Result<Vec<(String, String)>> {
        let mut children = Vec::new();
        let mut current: Option<(String, String)> = None;
        // Depth below the record element; 0 means directly inside it
        let mut inner = 0usize;

        loop {
            match self.next_token()? {
                Token::Open { tag, empty, .. } => {
                    self.check_cancelled()?;
                    if inner == 0 {
                        if empty {
                            children.push((tag, String::new()));
                        } else {
                            current = Some((tag, String::new()));
                            inner = 1;
                        }
                    } else if !empty {
                        inner += 1;
                    }
                }
                Token::Text(text) => {
                    if let Some((_, value)) = current.as_mut() {
                        value.push_str(&text);
                    }
                }
                Token::Close => {
                    if inner == 0 {
                        return Ok(children);
                    }
                    inner -= 1;
                    if inner == 0
                        && let Some(child) = current.take()
                    {
                        children.push(child);
                    }
                }
                Token::Eof => {
                    return Err(ConversionError::UnexpectedEof {
                        file: self.path.clone(),
                        depth: self.depth + 1 + inner,
                    });
                }
                Token::Other => {}
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.buf.clear();
        let event = self
            .reader
            .read_event_into(&mut self.buf)
            .map_err(|source| ConversionError::Xml {
                file: self.path.clone(),
                position: self.reader.buffer_position() as u64,
                source,
            })?;

        let token: std::result::Result<Token, quick_xml::Error> = match event {
            Event::Start(e) => read_attributes(&e).map(|attributes| Token::Open {
                tag: tag_name(&e),
                attributes,
                empty: false,
            }),
            Event::Empty(e) => read_attributes(&e).map(|attributes| Token::Open {
                tag: tag_name(&e),
                attributes,
                empty: true,
            }),
            Event::End(_) => Ok(Token::Close),
            Event::Text(e) => e.unescape().map(|text| Token::Text(text.into_owned())),
            Event::CData(e) => std::str::from_utf8(&e)
                .map(|text| Token::Text(text.to_owned()))
                .map_err(quick_xml::Error::from),
            Event::Eof => Ok(Token::Eof),
            _ => Ok(Token::Other),
        };
        token.map_err(|source| self.xml_error(source))
    }

    fn xml_error(&self, source: quick_xml::Error) -> ConversionError {
        ConversionError::Xml {
            file: self.path.clone(),
            position: self.reader.buffer_position() as u64,
            source,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }
        Ok(())
    }
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attributes by local name; namespace declarations are skipped
fn read_attributes(
    e: &BytesStart<'_>,
) -> std::result::Result<Vec<(String, String)>, quick_xml::Error> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let name = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((name, value));
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDefinition, DeclaredType, RecordTypeSchema};
    use tempfile::TempDir;

    const HOUSES_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<HOUSES>
  <HOUSE HOUSEID="1" HOUSENUM="5"><REGIONCODE>77</REGIONCODE></HOUSE>
  <HOUSE HOUSEID="2" HOUSENUM="6A" />
</HOUSES>"#;

    fn house_table() -> Arc<SchemaTable> {
        let table: SchemaTable = vec![RecordTypeSchema::new(
            "HOUSE",
            vec![
                ColumnDefinition::attribute("HOUSEID", DeclaredType::Int, true),
                ColumnDefinition::attribute("HOUSENUM", DeclaredType::String, false),
                ColumnDefinition::element("REGIONCODE", DeclaredType::String, false),
            ],
        )]
        .into_iter()
        .collect();
        Arc::new(table)
    }

    /// LF rows without a byte order mark, as in the documented example
    fn plain(schemas: Arc<SchemaTable>) -> XmlToCsvConverter {
        let options = ConverterOptions {
            csv: CsvFormat {
                line_ending: LineEnding::Lf,
                utf8_bom: false,
                ..CsvFormat::default()
            },
            ..ConverterOptions::default()
        };
        XmlToCsvConverter::with_options(schemas, options)
    }

    fn plain_sampling() -> XmlToCsvConverter {
        plain(Arc::new(SchemaTable::empty()))
    }

    fn convert(converter: &XmlToCsvConverter, xml: &str) -> (u64, String, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let xml_path = temp_dir.path().join("input.xml");
        let csv_path = temp_dir.path().join("out/input.csv");
        std::fs::write(&xml_path, xml).unwrap();

        let count = converter
            .convert_file_blocking(&xml_path, &csv_path, &CancellationToken::new())
            .unwrap();
        let csv = std::fs::read_to_string(&csv_path).unwrap_or_default();
        (count, csv, temp_dir)
    }

    #[test]
    fn test_schema_driven_conversion() {
        let converter = plain(house_table());
        let (count, csv, _dir) = convert(&converter, HOUSES_XML);

        assert_eq!(count, 2);
        assert_eq!(csv, "HOUSEID;HOUSENUM;REGIONCODE\n1;5;77\n2;6A;\n");
    }

    #[test]
    fn test_schema_order_ignores_document_order() {
        let xml = r#"<HOUSES>
  <HOUSE HOUSENUM="5" HOUSEID="1"/>
  <HOUSE><REGIONCODE>50</REGIONCODE></HOUSE>
</HOUSES>"#;
        let converter = plain(house_table());
        let (_, csv, _dir) = convert(&converter, xml);

        assert_eq!(csv, "HOUSEID;HOUSENUM;REGIONCODE\n1;5;\n;;50\n");
    }

    #[test]
    fn test_sampling_from_first_record() {
        let xml = r#"<ADDRESSOBJECTS>
  <OBJECT ID="10" NAME="Lenina"><TYPENAME>ul</TYPENAME><EMPTY>  </EMPTY></OBJECT>
  <OBJECT ID="11" LEVEL="8"><TYPENAME>pr</TYPENAME></OBJECT>
</ADDRESSOBJECTS>"#;
        let converter = plain_sampling();
        let (count, csv, _dir) = convert(&converter, xml);

        assert_eq!(count, 2);
        // LEVEL was not on the first record and is dropped
        assert_eq!(csv, "ID;NAME;TYPENAME\n10;Lenina;ul\n11;;pr\n");
    }

    #[test]
    fn test_values_are_quoted_only_when_needed() {
        let xml = r#"<ROWS><ROW A="x;y" B="say &quot;hi&quot;" C="plain"><D>line1
line2</D></ROW></ROWS>"#;
        let converter = plain_sampling();
        let (_, csv, _dir) = convert(&converter, xml);

        assert_eq!(
            csv,
            "A;B;C;D\n\"x;y\";\"say \"\"hi\"\"\";plain;\"line1\nline2\"\n"
        );
    }

    #[test]
    fn test_entities_and_cdata_are_decoded() {
        let xml = r#"<ROWS><ROW N="a &amp; b"><T><![CDATA[<raw>]]></T></ROW></ROWS>"#;
        let converter = plain_sampling();
        let (_, csv, _dir) = convert(&converter, xml);

        assert_eq!(csv, "N;T\na & b;<raw>\n");
    }

    #[test]
    fn test_namespace_declarations_are_not_columns() {
        let xml = r#"<ROWS xmlns="urn:x">
  <ROW xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="1"/>
</ROWS>"#;
        let converter = plain_sampling();
        let (_, csv, _dir) = convert(&converter, xml);

        assert_eq!(csv, "ID\n1\n");
    }

    #[test]
    fn test_empty_root_yields_zero_rows_and_no_file() {
        let converter = XmlToCsvConverter::sampling();
        let temp_dir = TempDir::new().unwrap();
        let xml_path = temp_dir.path().join("empty.xml");
        let csv_path = temp_dir.path().join("empty.csv");
        std::fs::write(&xml_path, "<?xml version=\"1.0\"?><HOUSES/>").unwrap();

        let count = converter
            .convert_file_blocking(&xml_path, &csv_path, &CancellationToken::new())
            .unwrap();

        assert_eq!(count, 0);
        assert!(!csv_path.exists());
    }

    #[test]
    fn test_empty_file_yields_zero_rows() {
        let converter = plain_sampling();
        let (count, csv, _dir) = convert(&converter, "");

        assert_eq!(count, 0);
        assert!(csv.is_empty());
    }

    #[test]
    fn test_foreign_elements_are_not_rows() {
        let xml = r#"<HOUSES><HOUSE HOUSEID="1"/><NOTE>x</NOTE><HOUSE HOUSEID="2"/></HOUSES>"#;
        let converter = plain(house_table());
        let (count, csv, _dir) = convert(&converter, xml);

        assert_eq!(count, 2);
        assert_eq!(csv, "HOUSEID;HOUSENUM;REGIONCODE\n1;;\n2;;\n");
    }

    #[test]
    fn test_nested_child_text_is_concatenated() {
        let xml = r#"<ROWS><ROW><NAME><FIRST>Ivan</FIRST><LAST>Petrov</LAST></NAME></ROW></ROWS>"#;
        let converter = plain_sampling();
        let (_, csv, _dir) = convert(&converter, xml);

        assert_eq!(csv, "NAME\nIvanPetrov\n");
    }

    #[test]
    fn test_default_format_has_bom_and_crlf() {
        let converter = XmlToCsvConverter::new(house_table());
        let (_, csv, _dir) = convert(&converter, HOUSES_XML);

        assert_eq!(
            csv,
            "\u{feff}HOUSEID;HOUSENUM;REGIONCODE\r\n1;5;77\r\n2;6A;\r\n"
        );
    }

    #[test]
    fn test_single_empty_field_is_not_quoted() {
        let table: SchemaTable = vec![RecordTypeSchema::new(
            "HOUSE",
            vec![ColumnDefinition::element("REGIONCODE", DeclaredType::String, false)],
        )]
        .into_iter()
        .collect();
        let converter = plain(Arc::new(table));
        let xml = "<HOUSES><HOUSE><REGIONCODE>77</REGIONCODE></HOUSE><HOUSE/></HOUSES>";
        let (count, csv, _dir) = convert(&converter, xml);

        assert_eq!(count, 2);
        assert_eq!(csv, "REGIONCODE\n77\n\n");
    }

    #[test]
    fn test_records_without_columns_give_empty_rows() {
        let (count, csv, _dir) = convert(&plain_sampling(), r#"<ROWS><ROW/><ROW A="1"/></ROWS>"#);
        assert_eq!(count, 2);
        assert_eq!(csv, "\n\n\n");

        let (_, csv, _dir) = convert(
            &XmlToCsvConverter::sampling(),
            r#"<ROWS><ROW/><ROW A="1"/></ROWS>"#,
        );
        assert_eq!(csv, "\u{feff}\r\n\r\n\r\n");
    }

    #[test]
    fn test_invalid_utf8_in_cdata_fails() {
        let temp_dir = TempDir::new().unwrap();
        let xml_path = temp_dir.path().join("bad.xml");
        let mut xml = b"<ROWS><ROW><T><![CDATA[".to_vec();
        xml.extend_from_slice(&[0xFF, 0xFE]);
        xml.extend_from_slice(b"]]></T></ROW></ROWS>");
        std::fs::write(&xml_path, xml).unwrap();

        let result = plain_sampling().convert_file_blocking(
            &xml_path,
            &temp_dir.path().join("bad.csv"),
            &CancellationToken::new(),
        );

        assert!(matches!(result, Err(ConversionError::Xml { .. })));
    }

    #[test]
    fn test_mismatched_tags_fail() {
        let converter = XmlToCsvConverter::sampling();
        let temp_dir = TempDir::new().unwrap();
        let xml_path = temp_dir.path().join("bad.xml");
        std::fs::write(&xml_path, r#"<HOUSES><HOUSE ID="1"></HOUS></HOUSES>"#).unwrap();

        let result = converter.convert_file_blocking(
            &xml_path,
            &temp_dir.path().join("bad.csv"),
            &CancellationToken::new(),
        );

        assert!(matches!(result, Err(ConversionError::Xml { .. })));
    }

    #[test]
    fn test_truncated_file_fails() {
        let converter = XmlToCsvConverter::sampling();
        let temp_dir = TempDir::new().unwrap();
        let xml_path = temp_dir.path().join("cut.xml");
        std::fs::write(&xml_path, r#"<HOUSES><HOUSE ID="1"/><HOUSE ID="2">"#).unwrap();

        let result = converter.convert_file_blocking(
            &xml_path,
            &temp_dir.path().join("cut.csv"),
            &CancellationToken::new(),
        );

        assert!(matches!(result, Err(ConversionError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_cancelled_before_first_element() {
        let converter = XmlToCsvConverter::sampling();
        let temp_dir = TempDir::new().unwrap();
        let xml_path = temp_dir.path().join("input.xml");
        std::fs::write(&xml_path, HOUSES_XML).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = converter.convert_file_blocking(
            &xml_path,
            &temp_dir.path().join("input.csv"),
            &cancel,
        );
        assert!(matches!(result, Err(ConversionError::Cancelled)));
    }

    /// Cancels the token once `remaining` bytes have been read
    struct CancelAfter {
        inner: std::io::Cursor<Vec<u8>>,
        cancel: CancellationToken,
        remaining: usize,
    }

    impl std::io::Read for CancelAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            use std::io::Read;

            let n = self.inner.read(buf)?;
            self.remaining = self.remaining.saturating_sub(n);
            if self.remaining == 0 {
                self.cancel.cancel();
            }
            Ok(n)
        }
    }

    #[test]
    fn test_cancelled_mid_file_keeps_partial_output() {
        let total = 10_000;
        let mut xml = String::from("<ROWS>");
        for i in 0..total {
            xml.push_str(&format!("<ROW ID=\"{}\"/>", i));
        }
        xml.push_str("</ROWS>");

        let cancel = CancellationToken::new();
        let input = CancelAfter {
            inner: std::io::Cursor::new(xml.into_bytes()),
            cancel: cancel.clone(),
            remaining: 20_000,
        };
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("rows.csv");

        let result = plain_sampling().convert_stream(
            std::io::BufReader::with_capacity(1024, input),
            Path::new("rows.xml"),
            &csv_path,
            &cancel,
        );

        assert!(matches!(result, Err(ConversionError::Cancelled)));
        let csv = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "ID");
        assert_eq!(lines[1], "0");
        assert!(lines.len() > 2);
        assert!(lines.len() < total + 1);
        // Every row that made it to disk is complete
        assert!(csv.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_missing_source() {
        let converter = XmlToCsvConverter::sampling();
        let result = converter
            .convert_file(
                Path::new("/nonexistent/AS_HOUSES.xml"),
                Path::new("/tmp/out.csv"),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(ConversionError::SourceNotFound { .. })));
    }

    #[test]
    fn test_detect_record_type() {
        let temp_dir = TempDir::new().unwrap();
        let xml_path = temp_dir.path().join("input.xml");
        std::fs::write(&xml_path, HOUSES_XML).unwrap();

        assert_eq!(detect_record_type(&xml_path).unwrap().as_deref(), Some("HOUSE"));
    }

    #[test]
    fn test_record_field_lookup() {
        let record = Record {
            tag: "R".to_string(),
            attributes: vec![("A".to_string(), "attr".to_string())],
            children: vec![
                ("A".to_string(), "child".to_string()),
                ("B".to_string(), "first".to_string()),
                ("B".to_string(), "second".to_string()),
            ],
        };

        assert_eq!(record.field("A"), "attr");
        assert_eq!(record.field("B"), "first");
        assert_eq!(record.field("C"), "");
        assert_eq!(record.sampled_columns(), vec!["A", "B"]);
    }
}
