//! OASIS XML catalog persistence
//!
//! The catalog file is the single source of truth for which schemas the
//! repository holds. Each registration is one `<uri name=".." uri=".."/>`
//! entry. The file is always regenerated in full; there is no incremental
//! patching.
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <!DOCTYPE catalog PUBLIC "-//OASIS//DTD XML Catalogs V1.1//EN" "...">
//! <catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog" prefer="public">
//!   <uri name="urn:example:orders" uri="orders.xsd"/>
//! </catalog>
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use tempfile::NamedTempFile;

use crate::error::{RepositoryError, Result};
use crate::schema::CatalogEntry;

/// Namespace of OASIS XML catalog documents
pub const CATALOG_NAMESPACE: &str = "urn:oasis:names:tc:entity:xmlns:xml:catalog";

/// Public identifier of the catalog DTD
pub const CATALOG_PUBLIC_ID: &str = "-//OASIS//DTD XML Catalogs V1.1//EN";

/// System identifier of the catalog DTD; never fetched
pub const CATALOG_SYSTEM_ID: &str = "http://www.oasis-open.org/committees/entity/release/1.1/catalog.dtd";

/// Namespace to locations, locations kept in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogIndex {
    entries: BTreeMap<String, Vec<String>>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a location; false if the pair was already present
    pub fn insert(&mut self, namespace: &str, location: &str) -> bool {
        let locations = self.entries.entry(namespace.to_string()).or_default();
        if locations.iter().any(|l| l == location) {
            return false;
        }
        locations.push(location.to_string());
        true
    }

    /// Remove a location, dropping the namespace once it has none left
    pub fn remove(&mut self, namespace: &str, location: &str) -> bool {
        let Some(locations) = self.entries.get_mut(namespace) else {
            return false;
        };
        let before = locations.len();
        locations.retain(|l| l != location);
        let removed = locations.len() != before;
        if locations.is_empty() {
            self.entries.remove(namespace);
        }
        removed
    }

    /// Locations registered for a namespace
    pub fn locations(&self, namespace: &str) -> &[String] {
        self.entries.get(namespace).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, namespace: &str, location: &str) -> bool {
        self.locations(namespace).iter().any(|l| l == location)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Flatten into entries, namespaces sorted, locations in registration order
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.entries
            .iter()
            .flat_map(|(namespace, locations)| {
                locations
                    .iter()
                    .map(move |location| CatalogEntry::new(namespace.clone(), location.clone()))
            })
            .collect()
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a catalog file
pub fn parse(path: &Path) -> Result<CatalogIndex> {
    let content = fs::read_to_string(path)?;
    parse_str(&content).map_err(|reason| RepositoryError::CatalogCorrupt {
        path: path.display().to_string(),
        reason,
    })
}

/// Parse catalog text; the error is a human-readable reason.
///
/// Unknown elements, and `uri` elements from any namespace other than the
/// catalog's own (or none), are ignored. The DOCTYPE is skipped without being
/// resolved and entity references other than the predefined ones expand
/// to nothing, so no external resource is ever read.
pub fn parse_str(content: &str) -> std::result::Result<CatalogIndex, String> {
    let mut reader = NsReader::from_str(content);
    let mut index = CatalogIndex::new();
    let mut saw_root = false;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) => {
                saw_root = true;
                let (resolved, local) = reader.resolve_element(e.name());
                let in_catalog = match resolved {
                    ResolveResult::Bound(Namespace(uri)) => uri == CATALOG_NAMESPACE.as_bytes(),
                    ResolveResult::Unbound => true,
                    ResolveResult::Unknown(_) => false,
                };
                if !in_catalog || local.as_ref() != b"uri" {
                    continue;
                }
                let mut name = None;
                let mut uri = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| e.to_string())?;
                    let value = attr
                        .unescape_value_with(predefined_entity)
                        .map_err(|e| e.to_string())?
                        .into_owned();
                    match attr.key.local_name().as_ref() {
                        b"name" => name = Some(value),
                        b"uri" => uri = Some(value),
                        _ => {}
                    }
                }
                match (name, uri) {
                    (Some(name), Some(uri)) => {
                        index.insert(&name, &uri);
                    }
                    _ => tracing::debug!("skipping catalog uri entry without name or uri"),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err("no catalog element".to_string());
    }
    Ok(index)
}

fn predefined_entity(entity: &str) -> Option<&'static str> {
    Some(match entity {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "apos" => "'",
        "quot" => "\"",
        _ => "",
    })
}

/// Serialize the whole index as a catalog document
pub fn to_xml_string(index: &CatalogIndex) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<!DOCTYPE catalog PUBLIC \"{}\" \"{}\">\n",
        CATALOG_PUBLIC_ID, CATALOG_SYSTEM_ID
    ));
    out.push_str(&format!(
        "<catalog xmlns=\"{}\" prefer=\"public\">\n",
        CATALOG_NAMESPACE
    ));
    for entry in index.entries() {
        out.push_str(&format!(
            "  <uri name=\"{}\" uri=\"{}\"/>\n",
            escape(entry.namespace.as_str()),
            escape(entry.location.as_str())
        ));
    }
    out.push_str("</catalog>\n");
    out
}

/// Rewrite the catalog file from scratch.
///
/// The document goes to a temporary file in the same directory which then
/// replaces `path`, so readers see either the old or the new catalog.
pub fn write(index: &CatalogIndex, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(to_xml_string(index).as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    tracing::info!(path = %path.display(), entries = index.len(), "catalog written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> CatalogIndex {
        let mut index = CatalogIndex::new();
        index.insert("urn:b", "b.xsd");
        index.insert("urn:a", "a.xsd");
        index.insert("urn:a", "a_1.xsd");
        index
    }

    #[test]
    fn test_index_insert_and_remove() {
        let mut index = sample();
        assert!(!index.insert("urn:a", "a.xsd"));
        assert_eq!(index.locations("urn:a"), ["a.xsd", "a_1.xsd"]);
        assert_eq!(index.len(), 3);

        assert!(index.remove("urn:a", "a.xsd"));
        assert!(!index.remove("urn:a", "a.xsd"));
        assert!(index.remove("urn:a", "a_1.xsd"));
        assert!(index.locations("urn:a").is_empty());
        assert_eq!(index.namespaces().collect::<Vec<_>>(), vec!["urn:b"]);
    }

    #[test]
    fn test_write_then_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        let index = sample();

        write(&index, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(CATALOG_PUBLIC_ID));
        assert!(text.contains("prefer=\"public\""));

        let parsed = parse(&path).unwrap();
        assert_eq!(parsed, index);

        write(&parsed, &path).unwrap();
        assert_eq!(parse(&path).unwrap().entries(), index.entries());
    }

    #[test]
    fn test_escaping() {
        let mut index = CatalogIndex::new();
        index.insert("urn:x?a=1&b=2", "odd \"name\".xsd");
        let parsed = parse_str(&to_xml_string(&index)).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_parse_foreign_catalog() {
        let text = r#"<?xml version="1.0"?>
<!DOCTYPE catalog PUBLIC "-//OASIS//DTD XML Catalogs V1.0//EN" "http://127.0.0.1:9/catalog.dtd">
<cat:catalog xmlns:cat="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <cat:system systemId="http://example.com/x.dtd" uri="x.dtd"/>
  <cat:group>
    <cat:uri name="urn:grouped" uri="grouped.xsd"/>
  </cat:group>
  <cat:uri name="urn:top" uri="http://example.com/top.xsd"/>
  <cat:uri name="urn:broken"/>
</cat:catalog>"#;
        let index = parse_str(text).unwrap();
        assert_eq!(
            index.entries(),
            vec![
                CatalogEntry::new("urn:grouped", "grouped.xsd"),
                CatalogEntry::new("urn:top", "http://example.com/top.xsd"),
            ]
        );
    }

    #[test]
    fn test_foreign_uri_elements_are_ignored() {
        let text = r#"<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog"
         xmlns:ext="urn:example:extension">
  <uri name="urn:kept" uri="kept.xsd"/>
  <ext:uri name="urn:foreign" uri="foreign.xsd"/>
  <other:uri name="urn:unbound" uri="unbound.xsd"/>
</catalog>"#;
        let index = parse_str(text).unwrap();
        assert_eq!(index.entries(), vec![CatalogEntry::new("urn:kept", "kept.xsd")]);

        let bare = r#"<catalog><uri name="urn:plain" uri="plain.xsd"/></catalog>"#;
        assert_eq!(
            parse_str(bare).unwrap().entries(),
            vec![CatalogEntry::new("urn:plain", "plain.xsd")]
        );
    }

    #[test]
    fn test_unknown_entities_expand_to_nothing() {
        let text = r#"<!DOCTYPE catalog [<!ENTITY ext SYSTEM "file:///etc/passwd">]>
<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <uri name="urn:a&ext;" uri="a&amp;b.xsd"/>
</catalog>"#;
        let index = parse_str(text).unwrap();
        assert_eq!(index.entries(), vec![CatalogEntry::new("urn:a", "a&b.xsd")]);
    }

    #[test]
    fn test_corrupt_catalog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        fs::write(&path, "<catalog><uri name=\"a\" uri=\"b\"></catalog>").unwrap();
        assert!(matches!(parse(&path), Err(RepositoryError::CatalogCorrupt { .. })));

        fs::write(&path, "").unwrap();
        assert!(matches!(parse(&path), Err(RepositoryError::CatalogCorrupt { .. })));
    }
}
