//! Schema repository data types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single catalog registration: namespace mapped to a storage location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Target namespace URI of the schema
    pub namespace: String,
    /// Path relative to the catalog directory, or an absolute URL
    pub location: String,
}

impl CatalogEntry {
    pub fn new(namespace: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.namespace, self.location)
    }
}

/// Content supplied for one imported namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImportSource {
    /// One schema document
    Single(String),
    /// Several documents sharing the namespace
    Multiple(Vec<String>),
}

impl ImportSource {
    /// All documents, in the order supplied
    pub fn documents(&self) -> Vec<&str> {
        match self {
            ImportSource::Single(content) => vec![content.as_str()],
            ImportSource::Multiple(contents) => contents.iter().map(String::as_str).collect(),
        }
    }

    /// The document used when a single representative is needed
    pub fn primary(&self) -> Option<&str> {
        self.documents().into_iter().next()
    }
}

impl From<String> for ImportSource {
    fn from(content: String) -> Self {
        ImportSource::Single(content)
    }
}

impl From<&str> for ImportSource {
    fn from(content: &str) -> Self {
        ImportSource::Single(content.to_string())
    }
}

impl From<Vec<String>> for ImportSource {
    fn from(contents: Vec<String>) -> Self {
        ImportSource::Multiple(contents)
    }
}

/// A root schema together with the raw content of the schemas it imports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSchemas {
    /// The root schema document
    pub root: String,
    /// Imported schema content keyed by namespace
    #[serde(default)]
    pub imports: BTreeMap<String, ImportSource>,
}

impl ServiceSchemas {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            imports: BTreeMap::new(),
        }
    }

    /// Add an imported schema for a namespace
    pub fn with_import(mut self, namespace: impl Into<String>, source: impl Into<ImportSource>) -> Self {
        self.imports.insert(namespace.into(), source.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_source_primary() {
        let single = ImportSource::from("<a/>");
        assert_eq!(single.primary(), Some("<a/>"));

        let many = ImportSource::from(vec!["<b/>".to_string(), "<c/>".to_string()]);
        assert_eq!(many.documents(), vec!["<b/>", "<c/>"]);
        assert_eq!(many.primary(), Some("<b/>"));

        assert_eq!(ImportSource::Multiple(Vec::new()).primary(), None);
    }

    #[test]
    fn test_import_source_untagged_json() {
        let imports: BTreeMap<String, ImportSource> =
            serde_json::from_str(r#"{"urn:a": "<a/>", "urn:b": ["<b/>", "<b2/>"]}"#).unwrap();
        assert_eq!(imports["urn:a"], ImportSource::Single("<a/>".to_string()));
        assert_eq!(imports["urn:b"].documents().len(), 2);
    }
}
