//! Schema Store
//!
//! The façade callers use to add, look up and remove schemas. It owns the
//! repository directory, the catalog cache and the comparator, and
//! serializes every operation behind one mutex: the catalog is rewritten
//! wholesale on each mutation, so concurrent writers would race.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use url::Url;

use crate::cache::CatalogCache;
use crate::config::RepositoryConfig;
use crate::equivalence::{ComparisonStrategy, SchemaComparator};
use crate::error::{RepositoryError, Result};
use crate::namer::FileNamer;
use crate::schema::{CatalogEntry, ServiceSchemas};
use crate::xsd::{self, ImportRef};

/// Catalog file name used when none is configured
pub const DEFAULT_CATALOG_FILE: &str = "catalog.xml";

/// Namespace-indexed, deduplicating schema store
pub struct SchemaStore {
    /// Canonical repository directory
    root: PathBuf,
    catalog_path: PathBuf,
    comparator: Box<dyn SchemaComparator>,
    cache: Mutex<CatalogCache>,
}

/// A schema taking part in a service write
struct PendingSchema<'a> {
    /// Namespace other schemas in the set import it under
    key: String,
    /// Namespace the document declares
    namespace: String,
    content: &'a str,
    file_name: String,
}

enum Resolution {
    Reused(String),
    New { path: PathBuf, location: String },
}

impl SchemaStore {
    /// Open (creating if needed) a repository with the default catalog and comparator
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_comparator(root, DEFAULT_CATALOG_FILE, ComparisonStrategy::default().comparator())
    }

    /// Open the repository described by a configuration
    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        let root = config.repository_path();
        if !config.repository.create_if_missing && !root.is_dir() {
            return Err(RepositoryError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("repository directory {} does not exist", root.display()),
            )));
        }
        Self::with_comparator(
            root,
            &config.repository.catalog_file,
            config.comparison.strategy.comparator(),
        )
    }

    /// Open a repository with an explicit catalog file name and comparator
    pub fn with_comparator(
        root: impl AsRef<Path>,
        catalog_file: &str,
        comparator: Box<dyn SchemaComparator>,
    ) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        let catalog_path = root.join(catalog_file);
        tracing::debug!(
            root = %root.display(),
            comparator = comparator.name(),
            "schema store opened"
        );
        Ok(Self {
            cache: Mutex::new(CatalogCache::new(&catalog_path)),
            root,
            catalog_path,
            comparator,
        })
    }

    /// Get the repository directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the catalog file path
    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    pub fn comparator_name(&self) -> &'static str {
        self.comparator.name()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CatalogCache>> {
        self.cache.lock().map_err(|_| RepositoryError::LockPoisoned)
    }

    /// Store a schema, reusing an equivalent stored copy unless `overwrite` is set.
    ///
    /// Returns the location registered for the schema.
    pub fn add_schema(&self, content: &str, file_name: &str, overwrite: bool) -> Result<String> {
        let mut cache = self.lock()?;
        self.store_schema(&mut cache, content, file_name, overwrite, None)
    }

    /// Like [`add_schema`](Self::add_schema), but a stored copy is only reused
    /// when each namespace it imports resolves to content equivalent to the
    /// matching entry of `imports`.
    pub fn add_schema_with_imports(
        &self,
        content: &str,
        file_name: &str,
        overwrite: bool,
        imports: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut cache = self.lock()?;
        self.store_schema(&mut cache, content, file_name, overwrite, Some(imports))
    }

    fn store_schema(
        &self,
        cache: &mut CatalogCache,
        content: &str,
        file_name: &str,
        overwrite: bool,
        imports: Option<&BTreeMap<String, String>>,
    ) -> Result<String> {
        let namespace = xsd::target_namespace(content)?;
        let file_name = sanitize_file_name(file_name)?;
        cache.ensure_fresh()?;

        if !overwrite {
            if let Some(location) = self.find_equivalent(cache, &namespace, content, imports)? {
                tracing::debug!(%namespace, %location, "equivalent schema already stored");
                return Ok(location);
            }
        }

        let path = FileNamer::new().next_available(&self.root.join(file_name));
        let location = self.location_of(&path)?;
        fs::write(&path, content)?;
        tracing::info!(%namespace, %location, "schema written");

        self.register(cache, &[(namespace, location.clone())])?;
        Ok(location)
    }

    /// Store a root schema together with the schemas it imports.
    ///
    /// Every final location is decided before anything is written, so
    /// schemas that import each other end up pointing at each other's
    /// actual file names. Returns namespace to location for the root and
    /// every imported namespace.
    pub fn add_service_schemas(
        &self,
        schemas: &ServiceSchemas,
        owner: &str,
    ) -> Result<BTreeMap<String, String>> {
        let prefix = sanitize_segment(owner);
        if prefix.is_empty() {
            return Err(RepositoryError::InvalidFileName(owner.to_string()));
        }

        let mut cache = self.lock()?;
        cache.ensure_fresh()?;

        let root_namespace = xsd::target_namespace(&schemas.root)?;
        // Content each member of the set is imported as, root included;
        // stored copies are only reused when their imports resolve to it
        let mut siblings = BTreeMap::new();
        siblings.insert(root_namespace.clone(), schemas.root.clone());
        let mut pending = vec![PendingSchema {
            key: root_namespace.clone(),
            namespace: root_namespace,
            content: &schemas.root,
            file_name: format!("{}.xsd", prefix),
        }];
        for (key, source) in &schemas.imports {
            for content in source.documents() {
                let namespace = xsd::target_namespace(content)?;
                if namespace != *key {
                    tracing::warn!(import = %key, declared = %namespace, "imported schema declares a different namespace");
                }
                siblings.entry(key.clone()).or_insert_with(|| content.to_string());
                pending.push(PendingSchema {
                    key: key.clone(),
                    namespace,
                    content,
                    file_name: service_file_name(&prefix, key),
                });
            }
        }

        // Phase 1: decide every location; nothing touches the disk
        let mut namer = FileNamer::new();
        let mut locations = BTreeMap::new();
        let mut plan: Vec<(PendingSchema<'_>, Resolution)> = Vec::with_capacity(pending.len());
        for schema in pending {
            let stored = self.find_equivalent(&cache, &schema.namespace, schema.content, Some(&siblings))?;
            let resolution = match stored {
                Some(location) => Resolution::Reused(location),
                None => match self.find_planned_equivalent(&plan, &schema)? {
                    Some(location) => {
                        tracing::debug!(namespace = %schema.namespace, %location, "duplicate document in service set");
                        Resolution::Reused(location)
                    }
                    None => {
                        let path = namer.reserve(&self.root.join(&schema.file_name));
                        let location = self.location_of(&path)?;
                        Resolution::New { path, location }
                    }
                },
            };
            let location = match &resolution {
                Resolution::Reused(location) | Resolution::New { location, .. } => location.clone(),
            };
            locations.entry(schema.key.clone()).or_insert(location);
            plan.push((schema, resolution));
        }

        // Phase 2: render against the completed map, then write
        let mut rendered = Vec::new();
        for (schema, resolution) in &plan {
            match resolution {
                Resolution::Reused(location) => {
                    tracing::debug!(namespace = %schema.namespace, %location, "reusing stored schema");
                }
                Resolution::New { path, location } => {
                    let body = xsd::rewrite_imports(schema.content, &locations)?;
                    rendered.push((schema.namespace.clone(), location.clone(), path, body));
                }
            }
        }

        let mut written: Vec<&PathBuf> = Vec::with_capacity(rendered.len());
        for (namespace, location, path, body) in &rendered {
            if let Err(e) = fs::write(path, body) {
                for path in &written {
                    if let Err(cleanup) = fs::remove_file(path) {
                        tracing::warn!(path = %path.display(), error = %cleanup, "could not remove partially written schema");
                    }
                }
                return Err(e.into());
            }
            tracing::info!(%namespace, %location, "schema written");
            written.push(*path);
        }

        let entries: Vec<(String, String)> = rendered
            .into_iter()
            .map(|(namespace, location, _, _)| (namespace, location))
            .collect();
        if !entries.is_empty() {
            self.register(&mut cache, &entries)?;
        }
        Ok(locations)
    }

    /// Location already planned in this service write for an equivalent document
    fn find_planned_equivalent(
        &self,
        plan: &[(PendingSchema<'_>, Resolution)],
        schema: &PendingSchema<'_>,
    ) -> Result<Option<String>> {
        for (planned, resolution) in plan {
            let Resolution::New { location, .. } = resolution else {
                continue;
            };
            if planned.namespace == schema.namespace
                && self.comparator.equivalent(planned.content, schema.content)?
            {
                return Ok(Some(location.clone()));
            }
        }
        Ok(None)
    }

    /// Remove a registration and delete its file
    pub fn remove_schema(&self, namespace: &str, location: &str) -> Result<bool> {
        self.remove_schema_entry(namespace, location, true)
    }

    /// Remove a registration, optionally deleting the backing file.
    ///
    /// Returns false when the pair was not registered. A file whose
    /// canonical path is outside the repository directory is never deleted;
    /// the registration is still removed and `UnsafeDeletePath` returned.
    pub fn remove_schema_entry(&self, namespace: &str, location: &str, delete_file: bool) -> Result<bool> {
        let mut cache = self.lock()?;
        cache.ensure_fresh()?;
        if !cache.remove(namespace, location) {
            return Ok(false);
        }
        if let Err(e) = cache.commit() {
            cache.reset();
            return Err(e);
        }
        tracing::info!(%namespace, %location, "schema unregistered");

        if delete_file {
            self.delete_backing_file(namespace, location)?;
        }
        Ok(true)
    }

    fn delete_backing_file(&self, namespace: &str, location: &str) -> Result<()> {
        let path = match self.resolve_location(namespace, location) {
            Ok(path) => path,
            Err(e) if e.is_not_found() => {
                tracing::debug!(%location, "remote location, nothing to delete");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let canonical = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "backing file already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !canonical.starts_with(&self.root) || canonical == self.catalog_path {
            tracing::warn!(path = %canonical.display(), "refusing to delete file outside the repository");
            return Err(RepositoryError::UnsafeDeletePath {
                path: canonical.display().to_string(),
            });
        }
        fs::remove_file(&canonical)?;
        tracing::info!(path = %canonical.display(), "schema file deleted");
        Ok(())
    }

    /// Read the bytes stored at a location
    pub fn get_schema(&self, namespace: &str, location: &str) -> Result<Vec<u8>> {
        let mut cache = self.lock()?;
        cache.ensure_fresh()?;
        self.read_location(namespace, location)
    }

    /// Read a stored schema as UTF-8 text
    pub fn get_schema_as_string(&self, namespace: &str, location: &str) -> Result<String> {
        let bytes = self.get_schema(namespace, location)?;
        String::from_utf8(bytes).map_err(RepositoryError::malformed)
    }

    /// Whether the pair is registered in the catalog
    pub fn has_schema(&self, namespace: &str, location: &str) -> Result<bool> {
        let mut cache = self.lock()?;
        cache.ensure_fresh()?;
        Ok(cache.contains(namespace, location))
    }

    /// Every registration, namespaces sorted
    pub fn list_all_schemas(&self) -> Result<Vec<CatalogEntry>> {
        let mut cache = self.lock()?;
        cache.ensure_fresh()?;
        Ok(cache.entries())
    }

    /// Locations registered for a namespace, first registered first
    pub fn locations(&self, namespace: &str) -> Result<Vec<String>> {
        let mut cache = self.lock()?;
        cache.ensure_fresh()?;
        Ok(cache.lookup(namespace).to_vec())
    }

    /// Local path of the preferred schema for a namespace.
    ///
    /// Remote locations are skipped.
    pub fn resolve(&self, namespace: &str) -> Result<Option<PathBuf>> {
        let mut cache = self.lock()?;
        cache.ensure_fresh()?;
        for location in cache.lookup(namespace) {
            match self.resolve_location(namespace, location) {
                Ok(path) => return Ok(Some(path)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Forget the cached catalog; the next operation reparses it
    pub fn reset(&self) -> Result<()> {
        self.lock()?.reset();
        Ok(())
    }

    fn register(&self, cache: &mut CatalogCache, entries: &[(String, String)]) -> Result<()> {
        for (namespace, location) in entries {
            cache.insert(namespace, location);
        }
        if let Err(e) = cache.commit() {
            cache.reset();
            return Err(e);
        }
        Ok(())
    }

    /// First stored location whose content is equivalent to `content`
    fn find_equivalent(
        &self,
        cache: &CatalogCache,
        namespace: &str,
        content: &str,
        imports: Option<&BTreeMap<String, String>>,
    ) -> Result<Option<String>> {
        for location in cache.lookup(namespace) {
            let existing = match self.read_string(namespace, location) {
                Ok(existing) => existing,
                Err(e) if e.is_not_found() => {
                    tracing::warn!(%namespace, %location, "catalog entry has no readable file");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !self.comparator.equivalent(&existing, content)? {
                continue;
            }
            if let Some(imports) = imports {
                if !self.imports_match(cache, location, &existing, content, imports)? {
                    tracing::debug!(%namespace, %location, "equivalent schema rejected: imported content differs");
                    continue;
                }
            }
            return Ok(Some(location.clone()));
        }
        Ok(None)
    }

    /// Every namespace `content` imports that the caller supplied must
    /// resolve, from the stored copy, to equivalent content
    fn imports_match(
        &self,
        cache: &CatalogCache,
        stored_location: &str,
        stored: &str,
        content: &str,
        imports: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let stored_imports = xsd::imports(stored)?;
        for import in xsd::imports(content)? {
            let Some(namespace) = import.namespace else {
                continue;
            };
            let Some(expected) = imports.get(&namespace) else {
                continue;
            };
            if !self.stored_import_matches(cache, stored_location, &stored_imports, &namespace, expected)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn stored_import_matches(
        &self,
        cache: &CatalogCache,
        stored_location: &str,
        stored_imports: &[ImportRef],
        namespace: &str,
        expected: &str,
    ) -> Result<bool> {
        let mut candidates: Vec<String> = stored_imports
            .iter()
            .filter(|import| import.namespace.as_deref() == Some(namespace))
            .filter_map(|import| import.schema_location.as_deref())
            .map(|hint| sibling_location(stored_location, hint))
            .collect();
        if candidates.is_empty() {
            candidates = cache.lookup(namespace).to_vec();
        }

        for candidate in candidates {
            let imported = match self.read_string(namespace, &candidate) {
                Ok(imported) => imported,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if self.comparator.equivalent(&imported, expected)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read_string(&self, namespace: &str, location: &str) -> Result<String> {
        let bytes = self.read_location(namespace, location)?;
        String::from_utf8(bytes).map_err(RepositoryError::malformed)
    }

    fn read_location(&self, namespace: &str, location: &str) -> Result<Vec<u8>> {
        let path = self.resolve_location(namespace, location)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(namespace, location)),
            Err(e) => Err(e.into()),
        }
    }

    /// `file:` URLs map to their path, other URLs are unreachable, anything
    /// else is relative to the repository directory
    fn resolve_location(&self, namespace: &str, location: &str) -> Result<PathBuf> {
        match absolute_url(location) {
            Some(url) if url.scheme() == "file" => {
                url.to_file_path().map_err(|_| not_found(namespace, location))
            }
            Some(_) => Err(not_found(namespace, location)),
            None => Ok(self.root.join(location)),
        }
    }

    /// Catalog location for a path inside the repository
    fn location_of(&self, path: &Path) -> Result<String> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| RepositoryError::InvalidFileName(path.display().to_string()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }
}

fn not_found(namespace: &str, location: &str) -> RepositoryError {
    RepositoryError::NotFound {
        namespace: namespace.to_string(),
        location: location.to_string(),
    }
}

/// Parse as an absolute URL; single-letter schemes are drive letters
fn absolute_url(location: &str) -> Option<Url> {
    Url::parse(location).ok().filter(|url| url.scheme().len() > 1)
}

/// Resolve an import hint against the location of the importing schema
fn sibling_location(base: &str, hint: &str) -> String {
    if absolute_url(hint).is_some() || Path::new(hint).is_absolute() {
        return hint.to_string();
    }
    if let Some(base_url) = absolute_url(base) {
        return base_url
            .join(hint)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| hint.to_string());
    }
    match base.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, hint),
        None => hint.to_string(),
    }
}

/// Keep only the final, normal path component of a suggested name
fn sanitize_file_name(file_name: &str) -> Result<String> {
    match Path::new(file_name).components().last() {
        Some(Component::Normal(name)) => Ok(name.to_string_lossy().into_owned()),
        _ => Err(RepositoryError::InvalidFileName(file_name.to_string())),
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// `{owner}-{last namespace segment}.xsd`
fn service_file_name(owner: &str, namespace: &str) -> String {
    let segment = namespace
        .rsplit(|c| c == '/' || c == ':' || c == '#')
        .find(|s| !s.is_empty())
        .unwrap_or("");
    let segment = sanitize_segment(segment.strip_suffix(".xsd").unwrap_or(segment));
    if segment.is_empty() {
        format!("{}-import.xsd", owner)
    } else {
        format!("{}-{}.xsd", owner, segment)
    }
}
