//! Schema equivalence checking
//!
//! Decides whether two schema documents are interchangeable for storage
//! purposes. Byte equality is too strict: an XML declaration, `import`
//! scaffolding or a different prefix spelling must not cause a second copy
//! of the same schema to be stored.
//!
//! Two strategies sit behind [`SchemaComparator`]:
//!
//! - [`StructuralComparator`] walks the start-element streams of both
//!   documents in lock-step, skipping the XSD `schema` wrapper and `import`
//!   elements, and compares names and attribute values with any `prefix:`
//!   stripped from the values.
//! - [`StrictComparator`] canonicalizes both documents into one line per
//!   markup event and diffs them, ignoring only whitespace.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::NsReader;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fmt;

use crate::error::{RepositoryError, Result};
use crate::xsd::{self, XSD_NAMESPACE};

/// Compares two schema documents for storage deduplication
pub trait SchemaComparator: Send + Sync {
    /// Short name used in logs and configuration
    fn name(&self) -> &'static str;

    /// Whether `left` and `right` describe the same schema.
    ///
    /// Malformed XML on either side is an error, not a mismatch.
    fn equivalent(&self, left: &str, right: &str) -> Result<bool>;
}

/// Comparator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStrategy {
    /// Lock-step element walk that tolerates cosmetic noise
    Structural,
    /// Whitespace-insensitive diff of the full document
    Strict,
}

impl Default for ComparisonStrategy {
    fn default() -> Self {
        if cfg!(feature = "strict-comparison") {
            ComparisonStrategy::Strict
        } else {
            ComparisonStrategy::Structural
        }
    }
}

impl ComparisonStrategy {
    /// Build the comparator for this strategy
    pub fn comparator(self) -> Box<dyn SchemaComparator> {
        match self {
            ComparisonStrategy::Structural => Box::new(StructuralComparator),
            ComparisonStrategy::Strict => Box::new(StrictComparator),
        }
    }
}

impl fmt::Display for ComparisonStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonStrategy::Structural => write!(f, "structural"),
            ComparisonStrategy::Strict => write!(f, "strict"),
        }
    }
}

/// Lock-step start-element comparison
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralComparator;

impl SchemaComparator for StructuralComparator {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn equivalent(&self, left: &str, right: &str) -> Result<bool> {
        let mut left = ElementStream::new(left);
        let mut right = ElementStream::new(right);
        loop {
            match (left.next_element()?, right.next_element()?) {
                (None, None) => return Ok(true),
                (Some(a), Some(b)) => {
                    if !a.matches(&b) {
                        tracing::trace!(left = %a.name, right = %b.name, "elements differ");
                        return Ok(false);
                    }
                }
                _ => return Ok(false),
            }
        }
    }
}

#[derive(Debug)]
struct ElementEvent {
    namespace: Option<String>,
    name: String,
    attributes: Vec<AttributeEvent>,
}

#[derive(Debug)]
struct AttributeEvent {
    namespace: Option<String>,
    name: String,
    value: String,
}

impl ElementEvent {
    fn matches(&self, other: &ElementEvent) -> bool {
        self.namespace == other.namespace
            && self.name == other.name
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .zip(&other.attributes)
                .all(|(a, b)| {
                    a.namespace == b.namespace
                        && a.name == b.name
                        && unprefixed(&a.value) == unprefixed(&b.value)
                })
    }
}

/// Drop everything up to and including the first colon
fn unprefixed(value: &str) -> &str {
    value.split_once(':').map_or(value, |(_, rest)| rest)
}

struct ElementStream<'a> {
    reader: NsReader<&'a [u8]>,
}

impl<'a> ElementStream<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            reader: NsReader::from_str(xsd::strip_prolog(content)),
        }
    }

    /// Next start element that is not `schema` or `import` scaffolding
    fn next_element(&mut self) -> Result<Option<ElementEvent>> {
        loop {
            let start = match self.reader.read_event().map_err(RepositoryError::malformed)? {
                Event::Start(e) | Event::Empty(e) => e,
                Event::Eof => return Ok(None),
                _ => continue,
            };

            let (resolved, local) = self.reader.resolve_element(start.name());
            let namespace = xsd::namespace_of(&resolved)?;
            let name = xsd::utf8(local.as_ref())?;
            if namespace.as_deref() == Some(XSD_NAMESPACE) && (name == "schema" || name == "import") {
                continue;
            }

            let attributes = self.attributes(&start)?;
            return Ok(Some(ElementEvent {
                namespace,
                name,
                attributes,
            }));
        }
    }

    fn attributes(&self, start: &BytesStart<'_>) -> Result<Vec<AttributeEvent>> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(RepositoryError::malformed)?;
            if xsd::is_namespace_declaration(attr.key.as_ref()) {
                continue;
            }
            let (resolved, local) = self.reader.resolve_attribute(attr.key);
            attributes.push(AttributeEvent {
                namespace: xsd::namespace_of(&resolved)?,
                name: xsd::utf8(local.as_ref())?,
                value: attr
                    .unescape_value()
                    .map_err(RepositoryError::malformed)?
                    .into_owned(),
            });
        }
        Ok(attributes)
    }
}

/// Whitespace-insensitive comparison of the complete documents
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictComparator;

impl SchemaComparator for StrictComparator {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn equivalent(&self, left: &str, right: &str) -> Result<bool> {
        let left = canonical_lines(left)?;
        let right = canonical_lines(right)?;

        let diff = TextDiff::from_lines(&left, &right);
        let mut changes = diff
            .iter_all_changes()
            .filter(|change| change.tag() != ChangeTag::Equal)
            .peekable();
        if changes.peek().is_none() {
            return Ok(true);
        }
        for change in changes.take(8) {
            tracing::debug!(tag = ?change.tag(), line = change.value().trim_end(), "schema difference");
        }
        Ok(false)
    }
}

/// One line per markup event, names in `{uri}local` form, attributes sorted
fn canonical_lines(content: &str) -> Result<String> {
    let mut reader = NsReader::from_str(xsd::strip_prolog(content));
    let mut out = String::new();
    loop {
        match reader.read_event().map_err(RepositoryError::malformed)? {
            Event::Start(e) => {
                out.push_str(&open_tag(&reader, &e)?);
                out.push('\n');
            }
            Event::Empty(e) => {
                out.push_str(&open_tag(&reader, &e)?);
                out.push('\n');
                out.push_str(&close_tag(&reader, &e)?);
                out.push('\n');
            }
            Event::End(e) => {
                let (resolved, local) = reader.resolve_element(e.name());
                let name = clark_name(xsd::namespace_of(&resolved)?, xsd::utf8(local.as_ref())?);
                out.push_str(&format!("</{}>\n", name));
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(RepositoryError::malformed)?;
                push_text(&mut out, &text);
            }
            Event::CData(data) => {
                push_text(&mut out, &String::from_utf8_lossy(&data));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn push_text(out: &mut String, text: &str) {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        out.push_str(&collapsed);
        out.push('\n');
    }
}

fn open_tag(reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<String> {
    let (resolved, local) = reader.resolve_element(start.name());
    let mut tag = format!(
        "<{}",
        clark_name(xsd::namespace_of(&resolved)?, xsd::utf8(local.as_ref())?)
    );

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(RepositoryError::malformed)?;
        if xsd::is_namespace_declaration(attr.key.as_ref()) {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let name = clark_name(xsd::namespace_of(&resolved)?, xsd::utf8(local.as_ref())?);
        let value = attr.unescape_value().map_err(RepositoryError::malformed)?;
        attributes.push(format!("{}={:?}", name, value));
    }
    attributes.sort();
    for attribute in attributes {
        tag.push(' ');
        tag.push_str(&attribute);
    }
    tag.push('>');
    Ok(tag)
}

fn close_tag(reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<String> {
    let (resolved, local) = reader.resolve_element(start.name());
    let name = clark_name(xsd::namespace_of(&resolved)?, xsd::utf8(local.as_ref())?);
    Ok(format!("</{}>", name))
}

fn clark_name(namespace: Option<String>, local: String) -> String {
    match namespace {
        Some(uri) => format!("{{{}}}{}", uri, local),
        None => local,
    }
}
