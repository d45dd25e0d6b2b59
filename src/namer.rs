//! Collision-free file naming inside the repository directory

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

fn numbered_stem() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.*)_(\d+)$").expect("valid numbered stem pattern"))
}

/// Allocates file names that neither exist on disk nor are reserved by
/// the operation in progress
#[derive(Debug, Default)]
pub struct FileNamer {
    reserved: HashSet<PathBuf>,
}

impl FileNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// First free path starting at `candidate`.
    ///
    /// `dir/name_3.xsd` that is taken becomes `dir/name_4.xsd`; a name with
    /// no numeric suffix starts at `_1`.
    pub fn next_available(&self, candidate: &Path) -> PathBuf {
        if self.is_free(candidate) {
            return candidate.to_path_buf();
        }

        let stem = candidate
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = candidate
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let (mut base, mut counter) = match numbered_stem().captures(&stem) {
            Some(caps) => match caps[2].parse::<u64>() {
                Ok(n) => (caps[1].to_string(), n),
                Err(_) => (stem.clone(), 0),
            },
            None => (stem.clone(), 0),
        };

        loop {
            counter = match counter.checked_add(1) {
                Some(next) => next,
                None => {
                    // suffix already at the maximum; number the full stem instead
                    base = stem.clone();
                    1
                }
            };
            let next = candidate.with_file_name(format!("{}_{}{}", base, counter, extension));
            if self.is_free(&next) {
                tracing::debug!(requested = %candidate.display(), allocated = %next.display(), "name taken, renamed");
                return next;
            }
        }
    }

    /// Allocate a free path and hold it for the rest of the operation
    pub fn reserve(&mut self, candidate: &Path) -> PathBuf {
        let path = self.next_available(candidate);
        self.reserved.insert(path.clone());
        path
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.reserved.contains(path)
    }

    fn is_free(&self, path: &Path) -> bool {
        !self.reserved.contains(path) && !path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_free_name_unchanged() {
        let dir = tempdir().unwrap();
        let candidate = dir.path().join("orders.xsd");
        assert_eq!(FileNamer::new().next_available(&candidate), candidate);
    }

    #[test]
    fn test_taken_names_are_numbered() {
        let dir = tempdir().unwrap();
        let namer = FileNamer::new();
        let candidate = dir.path().join("orders.xsd");

        fs::write(&candidate, "x").unwrap();
        let first = namer.next_available(&candidate);
        assert_eq!(first, dir.path().join("orders_1.xsd"));

        fs::write(&first, "x").unwrap();
        assert_eq!(namer.next_available(&candidate), dir.path().join("orders_2.xsd"));
    }

    #[test]
    fn test_existing_suffix_is_incremented() {
        let dir = tempdir().unwrap();
        let candidate = dir.path().join("orders_7.xsd");
        fs::write(&candidate, "x").unwrap();
        assert_eq!(
            FileNamer::new().next_available(&candidate),
            dir.path().join("orders_8.xsd")
        );
    }

    #[test]
    fn test_maximum_suffix_does_not_overflow() {
        let dir = tempdir().unwrap();
        let candidate = dir.path().join(format!("c_{}.xsd", u64::MAX));
        fs::write(&candidate, "x").unwrap();
        assert_eq!(
            FileNamer::new().next_available(&candidate),
            dir.path().join(format!("c_{}_1.xsd", u64::MAX))
        );
    }

    #[test]
    fn test_reserved_names_are_skipped() {
        let dir = tempdir().unwrap();
        let mut namer = FileNamer::new();
        let candidate = dir.path().join("svc.xsd");

        let first = namer.reserve(&candidate);
        let second = namer.reserve(&candidate);
        assert_eq!(first, candidate);
        assert_eq!(second, dir.path().join("svc_1.xsd"));
        assert!(namer.is_reserved(&second));
        assert!(!second.exists());
    }

    #[test]
    fn test_name_without_extension() {
        let dir = tempdir().unwrap();
        let candidate = dir.path().join("schema");
        fs::write(&candidate, "x").unwrap();
        assert_eq!(
            FileNamer::new().next_available(&candidate),
            dir.path().join("schema_1")
        );
    }
}
