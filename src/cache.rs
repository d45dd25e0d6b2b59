//! In-memory catalog cache
//!
//! Holds the parsed [`CatalogIndex`] and the modification time of the
//! catalog file at the last successful parse. [`CatalogCache::ensure_fresh`]
//! is the only place the file is re-read.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::catalog::{self, CatalogIndex};
use crate::error::Result;
use crate::schema::CatalogEntry;

/// Cached view of the catalog file
#[derive(Debug)]
pub struct CatalogCache {
    catalog_path: PathBuf,
    index: CatalogIndex,
    /// Catalog mtime at the last parse or write; `None` forces a parse
    parsed_at: Option<SystemTime>,
}

impl CatalogCache {
    /// Create an empty, stale cache over `catalog_path`
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            index: CatalogIndex::new(),
            parsed_at: None,
        }
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    /// Re-parse the catalog if its mtime moved past the last parse.
    ///
    /// On parse failure the previous index is kept and the error returned.
    pub fn ensure_fresh(&mut self) -> Result<()> {
        let modified = match fs::metadata(&self.catalog_path) {
            Ok(metadata) => metadata.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if !self.index.is_empty() {
                    tracing::debug!(path = %self.catalog_path.display(), "catalog file gone, clearing cache");
                }
                self.index = CatalogIndex::new();
                self.parsed_at = None;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if self.parsed_at.map_or(true, |parsed| modified > parsed) {
            let index = catalog::parse(&self.catalog_path)?;
            tracing::debug!(
                path = %self.catalog_path.display(),
                entries = index.len(),
                "catalog reparsed"
            );
            self.index = index;
            self.parsed_at = Some(modified);
        }
        Ok(())
    }

    /// Locations registered for a namespace
    pub fn lookup(&self, namespace: &str) -> &[String] {
        self.index.locations(namespace)
    }

    pub fn contains(&self, namespace: &str, location: &str) -> bool {
        self.index.contains(namespace, location)
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.index.entries()
    }

    pub fn index(&self) -> &CatalogIndex {
        &self.index
    }

    /// Drop the cached index and force a reparse on next access
    pub fn reset(&mut self) {
        self.index = CatalogIndex::new();
        self.parsed_at = None;
    }

    /// Register a location in memory; call [`commit`](Self::commit) to persist
    pub fn insert(&mut self, namespace: &str, location: &str) -> bool {
        self.index.insert(namespace, location)
    }

    /// Remove a location in memory; call [`commit`](Self::commit) to persist
    pub fn remove(&mut self, namespace: &str, location: &str) -> bool {
        self.index.remove(namespace, location)
    }

    /// Rewrite the catalog file and move the watermark to its new mtime
    pub fn commit(&mut self) -> Result<()> {
        catalog::write(&self.index, &self.catalog_path)?;
        self.parsed_at = Some(fs::metadata(&self.catalog_path)?.modified()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch_forward(path: &Path) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_missing_catalog_is_empty() {
        let dir = tempdir().unwrap();
        let mut cache = CatalogCache::new(dir.path().join("catalog.xml"));
        cache.ensure_fresh().unwrap();
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_commit_then_fresh_keeps_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        let mut cache = CatalogCache::new(&path);
        cache.ensure_fresh().unwrap();
        cache.insert("urn:a", "a.xsd");
        cache.commit().unwrap();

        cache.ensure_fresh().unwrap();
        assert_eq!(cache.lookup("urn:a"), ["a.xsd"]);

        let mut other = CatalogCache::new(&path);
        other.ensure_fresh().unwrap();
        assert_eq!(other.entries(), cache.entries());
    }

    #[test]
    fn test_external_edit_is_picked_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        let mut cache = CatalogCache::new(&path);
        cache.insert("urn:a", "a.xsd");
        cache.commit().unwrap();

        let mut edited = CatalogIndex::new();
        edited.insert("urn:b", "b.xsd");
        fs::write(&path, catalog::to_xml_string(&edited)).unwrap();
        touch_forward(&path);

        cache.ensure_fresh().unwrap();
        assert!(cache.lookup("urn:a").is_empty());
        assert_eq!(cache.lookup("urn:b"), ["b.xsd"]);
    }

    #[test]
    fn test_failed_reparse_keeps_previous_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        let mut cache = CatalogCache::new(&path);
        cache.insert("urn:a", "a.xsd");
        cache.commit().unwrap();

        fs::write(&path, "<catalog><uri").unwrap();
        touch_forward(&path);

        assert!(cache.ensure_fresh().is_err());
        assert_eq!(cache.lookup("urn:a"), ["a.xsd"]);
    }

    #[test]
    fn test_reset_forces_reparse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        let mut cache = CatalogCache::new(&path);
        cache.insert("urn:a", "a.xsd");
        cache.commit().unwrap();

        cache.reset();
        assert!(cache.entries().is_empty());
        cache.ensure_fresh().unwrap();
        assert_eq!(cache.lookup("urn:a"), ["a.xsd"]);
    }
}
