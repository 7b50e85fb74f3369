//! Typed XSD document model
//!
//! Only the parts of XML Schema that shape a flat record are modelled:
//! element and attribute declarations, named and anonymous complex types,
//! simple-type restriction bases, content models, and complex/simple content
//! derivation. Everything else (annotations, facets, identity constraints,
//! imports) is skipped while parsing.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XsdParseError {
    #[error("XML error at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Unexpected end of document inside <{element}>")]
    UnexpectedEof { element: String },

    #[error("Document has no <schema> root")]
    MissingSchemaRoot,

    #[error("Document root is <{found}>, expected <schema>")]
    NotASchema { found: String },

    #[error("Invalid minOccurs value '{value}'")]
    InvalidOccurs { value: String },
}

pub type XsdResult<T> = std::result::Result<T, XsdParseError>;

/// One parsed `.xsd` document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XsdDocument {
    pub elements: Vec<ElementDecl>,
    pub complex_types: Vec<(String, ComplexType)>,
    pub simple_types: Vec<(String, Option<String>)>,
    pub attributes: Vec<AttributeDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementDecl {
    pub name: String,
    /// Set when the declaration was `ref="..."`; `name` then holds the target
    pub is_reference: bool,
    pub type_name: Option<String>,
    pub min_occurs: u32,
    pub content: ElementContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementContent {
    /// Content comes from `type_name` (or is unspecified)
    Referenced,
    Complex(ComplexType),
    Simple { base: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDecl {
    pub name: String,
    pub is_reference: bool,
    pub type_name: Option<String>,
    pub required: bool,
    /// `use="prohibited"`; removes an inherited attribute in a restriction
    pub prohibited: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComplexType {
    pub derivation: Option<Derivation>,
    pub attributes: Vec<AttributeDecl>,
    pub model: ContentModel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Derivation {
    Extension(String),
    Restriction(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ContentModel {
    #[default]
    Empty,
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    All(Vec<Particle>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Particle {
    Element(ElementDecl),
    Group(ContentModel),
    Other,
}

impl ContentModel {
    /// Element declarations anywhere inside this model, in document order
    pub fn nested_elements(&self) -> Vec<&ElementDecl> {
        let mut out = Vec::new();
        self.collect_elements(&mut out);
        out
    }

    fn collect_elements<'a>(&'a self, out: &mut Vec<&'a ElementDecl>) {
        let particles = match self {
            ContentModel::Empty => return,
            ContentModel::Sequence(p) | ContentModel::Choice(p) | ContentModel::All(p) => p,
        };
        for particle in particles {
            match particle {
                Particle::Element(decl) => out.push(decl),
                Particle::Group(model) => model.collect_elements(out),
                Particle::Other => {}
            }
        }
    }
}

/// Strip a namespace prefix from a QName-valued attribute
pub fn local_part(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

/// Parse a complete XSD document
pub fn parse_document(source: &str) -> XsdResult<XsdDocument> {
    XsdParser::new(source).parse()
}

struct XsdParser<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> XsdParser<'a> {
    fn new(source: &'a str) -> Self {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(true);
        Self { reader }
    }

    fn next_event(&mut self) -> XsdResult<Event<'a>> {
        self.reader.read_event().map_err(|source| XsdParseError::Xml {
            position: self.reader.buffer_position() as u64,
            source,
        })
    }

    fn skip(&mut self, start: &BytesStart<'_>) -> XsdResult<()> {
        self.reader
            .read_to_end(start.name())
            .map(|_| ())
            .map_err(|source| XsdParseError::Xml {
                position: self.reader.buffer_position() as u64,
                source,
            })
    }

    fn parse(mut self) -> XsdResult<XsdDocument> {
        loop {
            match self.next_event()? {
                Event::Start(e) => {
                    let name = local_name(&e);
                    if name != "schema" {
                        return Err(XsdParseError::NotASchema { found: name });
                    }
                    return self.parse_schema_body();
                }
                Event::Empty(e) => {
                    let name = local_name(&e);
                    if name != "schema" {
                        return Err(XsdParseError::NotASchema { found: name });
                    }
                    return Ok(XsdDocument::default());
                }
                Event::Eof => return Err(XsdParseError::MissingSchemaRoot),
                _ => {}
            }
        }
    }

    fn parse_schema_body(&mut self) -> XsdResult<XsdDocument> {
        let mut doc = XsdDocument::default();

        loop {
            let (e, empty) = match self.next_event()? {
                Event::Start(e) => (e, false),
                Event::Empty(e) => (e, true),
                Event::End(_) => return Ok(doc),
                Event::Eof => {
                    return Err(XsdParseError::UnexpectedEof {
                        element: "schema".to_string(),
                    });
                }
                _ => continue,
            };

            match local_name(&e).as_str() {
                "element" => doc.elements.push(self.parse_element(&e, empty)?),
                "complexType" => {
                    let name = attribute(&e, "name")?;
                    let mut ct = ComplexType::default();
                    if !empty {
                        self.parse_type_body(&mut ct, "complexType")?;
                    }
                    if let Some(name) = name {
                        doc.complex_types.push((name, ct));
                    }
                }
                "simpleType" => {
                    let name = attribute(&e, "name")?;
                    let base = self.parse_simple_type(empty)?;
                    if let Some(name) = name {
                        doc.simple_types.push((name, base));
                    }
                }
                "attribute" => doc.attributes.push(self.parse_attribute(&e, empty)?),
                _ if !empty => self.skip(&e)?,
                _ => {}
            }
        }
    }

    fn parse_element(&mut self, start: &BytesStart<'_>, empty: bool) -> XsdResult<ElementDecl> {
        let (name, is_reference) = match attribute(start, "name")? {
            Some(name) => (name, false),
            None => (
                attribute(start, "ref")?
                    .map(|r| local_part(&r).to_string())
                    .unwrap_or_default(),
                true,
            ),
        };
        let type_name = attribute(start, "type")?;
        let min_occurs = match attribute(start, "minOccurs")? {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| XsdParseError::InvalidOccurs { value })?,
            None => 1,
        };

        let mut content = ElementContent::Referenced;
        if !empty {
            loop {
                let (e, child_empty) = match self.next_event()? {
                    Event::Start(e) => (e, false),
                    Event::Empty(e) => (e, true),
                    Event::End(_) => break,
                    Event::Eof => return Err(XsdParseError::UnexpectedEof { element: name }),
                    _ => continue,
                };
                match local_name(&e).as_str() {
                    "complexType" => {
                        let mut ct = ComplexType::default();
                        if !child_empty {
                            self.parse_type_body(&mut ct, "complexType")?;
                        }
                        content = ElementContent::Complex(ct);
                    }
                    "simpleType" => {
                        content = ElementContent::Simple {
                            base: self.parse_simple_type(child_empty)?,
                        };
                    }
                    _ if !child_empty => self.skip(&e)?,
                    _ => {}
                }
            }
        }

        Ok(ElementDecl {
            name,
            is_reference,
            type_name,
            min_occurs,
            content,
        })
    }

    /// Body of `complexType`, `complexContent`, `simpleContent`, `extension`
    /// and `restriction`; all of them contribute to the same type.
    fn parse_type_body(&mut self, ct: &mut ComplexType, element: &str) -> XsdResult<()> {
        loop {
            let (e, empty) = match self.next_event()? {
                Event::Start(e) => (e, false),
                Event::Empty(e) => (e, true),
                Event::End(_) => return Ok(()),
                Event::Eof => {
                    return Err(XsdParseError::UnexpectedEof {
                        element: element.to_string(),
                    });
                }
                _ => continue,
            };

            let name = local_name(&e);
            match name.as_str() {
                "attribute" => ct.attributes.push(self.parse_attribute(&e, empty)?),
                "sequence" | "choice" | "all" => ct.model = self.parse_model(&name, empty)?,
                "complexContent" | "simpleContent" if !empty => {
                    self.parse_type_body(ct, &name)?
                }
                "extension" | "restriction" => {
                    if let Some(base) = attribute(&e, "base")? {
                        ct.derivation = Some(if name == "extension" {
                            Derivation::Extension(base)
                        } else {
                            Derivation::Restriction(base)
                        });
                    }
                    if !empty {
                        self.parse_type_body(ct, &name)?;
                    }
                }
                _ if !empty => self.skip(&e)?,
                _ => {}
            }
        }
    }

    fn parse_model(&mut self, kind: &str, empty: bool) -> XsdResult<ContentModel> {
        let mut particles = Vec::new();

        if !empty {
            loop {
                let (e, child_empty) = match self.next_event()? {
                    Event::Start(e) => (e, false),
                    Event::Empty(e) => (e, true),
                    Event::End(_) => break,
                    Event::Eof => {
                        return Err(XsdParseError::UnexpectedEof {
                            element: kind.to_string(),
                        });
                    }
                    _ => continue,
                };

                let name = local_name(&e);
                match name.as_str() {
                    "element" => {
                        particles.push(Particle::Element(self.parse_element(&e, child_empty)?))
                    }
                    "sequence" | "choice" | "all" => {
                        particles.push(Particle::Group(self.parse_model(&name, child_empty)?))
                    }
                    "annotation" => {
                        if !child_empty {
                            self.skip(&e)?;
                        }
                    }
                    _ => {
                        if !child_empty {
                            self.skip(&e)?;
                        }
                        particles.push(Particle::Other);
                    }
                }
            }
        }

        Ok(match kind {
            "sequence" => ContentModel::Sequence(particles),
            "choice" => ContentModel::Choice(particles),
            _ => ContentModel::All(particles),
        })
    }

    fn parse_attribute(&mut self, start: &BytesStart<'_>, empty: bool) -> XsdResult<AttributeDecl> {
        let (name, is_reference) = match attribute(start, "name")? {
            Some(name) => (name, false),
            None => (
                attribute(start, "ref")?
                    .map(|r| local_part(&r).to_string())
                    .unwrap_or_default(),
                true,
            ),
        };
        let mut type_name = attribute(start, "type")?;
        let usage = attribute(start, "use")?;
        let required = usage.as_deref() == Some("required");
        let prohibited = usage.as_deref() == Some("prohibited");

        if !empty {
            loop {
                let (e, child_empty) = match self.next_event()? {
                    Event::Start(e) => (e, false),
                    Event::Empty(e) => (e, true),
                    Event::End(_) => break,
                    Event::Eof => return Err(XsdParseError::UnexpectedEof { element: name }),
                    _ => continue,
                };
                if local_name(&e) == "simpleType" {
                    if let Some(base) = self.parse_simple_type(child_empty)? {
                        type_name.get_or_insert(base);
                    }
                } else if !child_empty {
                    self.skip(&e)?;
                }
            }
        }

        Ok(AttributeDecl {
            name,
            is_reference,
            type_name,
            required,
            prohibited,
        })
    }

    /// Returns the restriction base of a `simpleType`, if it has one
    fn parse_simple_type(&mut self, empty: bool) -> XsdResult<Option<String>> {
        let mut base = None;
        if empty {
            return Ok(base);
        }

        loop {
            let (e, child_empty) = match self.next_event()? {
                Event::Start(e) => (e, false),
                Event::Empty(e) => (e, true),
                Event::End(_) => return Ok(base),
                Event::Eof => {
                    return Err(XsdParseError::UnexpectedEof {
                        element: "simpleType".to_string(),
                    });
                }
                _ => continue,
            };
            if local_name(&e) == "restriction" {
                base = attribute(&e, "base")?;
            }
            if !child_empty {
                self.skip(&e)?;
            }
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> XsdResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XsdParseError::Xml {
            position: 0,
            source: quick_xml::Error::from(err),
        })?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|source| XsdParseError::Xml {
                    position: 0,
                    source,
                })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
