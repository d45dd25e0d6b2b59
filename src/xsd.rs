//! XSD document helpers
//!
//! Reads the pieces of a schema document the repository keys on (the
//! `targetNamespace` and the `import` statements) and rewrites import
//! locations so that stored siblings point at each other's final file names.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, Result};

/// The W3C XML Schema namespace
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// An `import` statement found in a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    /// Imported namespace, if declared
    pub namespace: Option<String>,
    /// Location hint, if declared
    pub schema_location: Option<String>,
}

/// Drop a leading XML declaration and anything before the first `<`
pub fn strip_prolog(content: &str) -> &str {
    let mut rest = content.trim_start_matches('\u{feff}').trim_start();
    let is_declaration = rest
        .strip_prefix("<?xml")
        .and_then(|tail| tail.chars().next())
        .map_or(false, |c| c.is_whitespace() || c == '?');
    if is_declaration {
        if let Some(end) = rest.find("?>") {
            rest = &rest[end + 2..];
        }
    }
    match rest.find('<') {
        Some(start) => &rest[start..],
        None => "",
    }
}

/// Read the `targetNamespace` declared on the document element
pub fn target_namespace(content: &str) -> Result<String> {
    let mut reader = NsReader::from_str(strip_prolog(content));
    loop {
        match reader.read_event().map_err(RepositoryError::malformed)? {
            Event::Start(root) | Event::Empty(root) => {
                return match attribute_value(&root, "targetNamespace")? {
                    Some(namespace) if !namespace.trim().is_empty() => Ok(namespace),
                    _ => Err(RepositoryError::NoTargetNamespace),
                };
            }
            Event::Eof => {
                return Err(RepositoryError::MalformedSchema(
                    "document has no root element".to_string(),
                ))
            }
            _ => {}
        }
    }
}

/// List every XSD `import` statement in document order
pub fn imports(content: &str) -> Result<Vec<ImportRef>> {
    let mut reader = NsReader::from_str(strip_prolog(content));
    let mut found = Vec::new();
    loop {
        match reader.read_event().map_err(RepositoryError::malformed)? {
            Event::Start(e) | Event::Empty(e) => {
                if xsd_local_name(&reader, &e)?.as_deref() == Some("import") {
                    found.push(ImportRef {
                        namespace: attribute_value(&e, "namespace")?,
                        schema_location: attribute_value(&e, "schemaLocation")?,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

/// Point each `import` of a namespace in `locations` at its mapped location.
///
/// The `schemaLocation` attribute is replaced, or added when missing. Every
/// other event is written back unchanged.
pub fn rewrite_imports(content: &str, locations: &BTreeMap<String, String>) -> Result<String> {
    let mut reader = NsReader::from_str(content);
    let mut writer = Writer::new(Vec::with_capacity(content.len()));
    loop {
        let event = match reader.read_event().map_err(RepositoryError::malformed)? {
            Event::Eof => break,
            Event::Start(e) => match relocated(&reader, &e, locations)? {
                Some(rewritten) => Event::Start(rewritten),
                None => Event::Start(e),
            },
            Event::Empty(e) => match relocated(&reader, &e, locations)? {
                Some(rewritten) => Event::Empty(rewritten),
                None => Event::Empty(e),
            },
            other => other,
        };
        writer.write_event(event).map_err(RepositoryError::malformed)?;
    }
    String::from_utf8(writer.into_inner()).map_err(RepositoryError::malformed)
}

fn relocated(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    locations: &BTreeMap<String, String>,
) -> Result<Option<BytesStart<'static>>> {
    if xsd_local_name(reader, start)?.as_deref() != Some("import") {
        return Ok(None);
    }
    let Some(namespace) = attribute_value(start, "namespace")? else {
        return Ok(None);
    };
    let Some(location) = locations.get(&namespace) else {
        return Ok(None);
    };

    let name = utf8(start.name().as_ref())?;
    let mut rewritten = BytesStart::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(RepositoryError::malformed)?;
        if attr.key.as_ref() != b"schemaLocation" {
            rewritten.push_attribute(attr);
        }
    }
    rewritten.push_attribute(("schemaLocation", location.as_str()));
    Ok(Some(rewritten))
}

/// Local name of an element bound to the XSD namespace
pub(crate) fn xsd_local_name(reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<Option<String>> {
    let (resolved, local) = reader.resolve_element(start.name());
    if namespace_of(&resolved)?.as_deref() == Some(XSD_NAMESPACE) {
        Ok(Some(utf8(local.as_ref())?))
    } else {
        Ok(None)
    }
}

/// Unescaped value of an unprefixed attribute
pub(crate) fn attribute_value(start: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in start.attributes() {
        let attr = attr.map_err(RepositoryError::malformed)?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr.unescape_value().map_err(RepositoryError::malformed)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Namespace URI of a resolved name; unknown prefixes are malformed
pub(crate) fn namespace_of(resolved: &ResolveResult<'_>) -> Result<Option<String>> {
    match resolved {
        ResolveResult::Bound(Namespace(uri)) => Ok(Some(utf8(uri)?)),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(RepositoryError::MalformedSchema(format!(
            "unbound namespace prefix '{}'",
            String::from_utf8_lossy(prefix)
        ))),
    }
}

pub(crate) fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(RepositoryError::malformed)
}

/// True for `xmlns` and `xmlns:*` declarations
pub(crate) fn is_namespace_declaration(key: &[u8]) -> bool {
    key == b"xmlns" || key.starts_with(b"xmlns:")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:tns="urn:shop:order"
           xmlns:cust="urn:shop:customer"
           targetNamespace="urn:shop:order">
  <xs:import namespace="urn:shop:customer" schemaLocation="customer.xsd"/>
  <xs:import namespace="urn:shop:address"/>
  <xs:element name="order" type="tns:Order"/>
</xs:schema>"#;

    #[test]
    fn test_strip_prolog() {
        assert_eq!(strip_prolog("<?xml version=\"1.0\"?>\n<a/>"), "<a/>");
        assert_eq!(strip_prolog("\u{feff}  junk<a/>"), "<a/>");
        assert_eq!(strip_prolog("<a/>"), "<a/>");
        assert_eq!(
            strip_prolog("<?xml-stylesheet href=\"s.xsl\"?><a/>"),
            "<?xml-stylesheet href=\"s.xsl\"?><a/>"
        );
        assert_eq!(strip_prolog("no markup"), "");
    }

    #[test]
    fn test_target_namespace() {
        assert_eq!(target_namespace(ORDER).unwrap(), "urn:shop:order");
    }

    #[test]
    fn test_missing_target_namespace() {
        let schema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"/>"#;
        assert!(matches!(
            target_namespace(schema),
            Err(RepositoryError::NoTargetNamespace)
        ));
    }

    #[test]
    fn test_target_namespace_without_root() {
        assert!(matches!(
            target_namespace("<?xml version=\"1.0\"?>"),
            Err(RepositoryError::MalformedSchema(_))
        ));
    }

    #[test]
    fn test_imports() {
        let found = imports(ORDER).unwrap();
        assert_eq!(
            found,
            vec![
                ImportRef {
                    namespace: Some("urn:shop:customer".to_string()),
                    schema_location: Some("customer.xsd".to_string()),
                },
                ImportRef {
                    namespace: Some("urn:shop:address".to_string()),
                    schema_location: None,
                },
            ]
        );
    }

    #[test]
    fn test_imports_ignore_foreign_namespace() {
        let schema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
            xmlns:other="urn:other" targetNamespace="urn:x">
            <other:import namespace="urn:y"/>
        </xs:schema>"#;
        assert!(imports(schema).unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_imports() {
        let mut locations = BTreeMap::new();
        locations.insert("urn:shop:customer".to_string(), "svc-customer_1.xsd".to_string());
        locations.insert("urn:shop:address".to_string(), "svc-address.xsd".to_string());

        let rewritten = rewrite_imports(ORDER, &locations).unwrap();
        assert!(rewritten.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(rewritten.contains(r#"<xs:element name="order" type="tns:Order"/>"#));

        let found = imports(&rewritten).unwrap();
        assert_eq!(found[0].schema_location.as_deref(), Some("svc-customer_1.xsd"));
        assert_eq!(found[1].schema_location.as_deref(), Some("svc-address.xsd"));
        assert!(!rewritten.contains("\"customer.xsd\""));
    }

    #[test]
    fn test_rewrite_leaves_unmapped_imports() {
        let rewritten = rewrite_imports(ORDER, &BTreeMap::new()).unwrap();
        assert_eq!(rewritten, ORDER);
    }
}
