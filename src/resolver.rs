//! Resource resolution for external references
//!
//! Schema imports, DTD system identifiers and `document()` targets are usually
//! bare file names, while the files themselves live in a resource directory
//! chosen by the caller. The [`ResourceResolver`] maps such a reference onto
//! the first known location whose path ends with the reference; anything it
//! does not know is passed through unchanged and resolved as a normal
//! relative path.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{Result, ValidationError};

/// Suffix-matching resolver over a fixed list of candidate locations
///
/// The candidate list is immutable once built and cheap to clone, so one
/// resolver can be handed to any number of concurrent validation calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceResolver {
    locations: Arc<[PathBuf]>,
}

impl ResourceResolver {
    /// Create a resolver over explicit candidate locations (full paths)
    pub fn new<I, P>(locations: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            locations: locations.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a resolver from resource directories and individual files
    ///
    /// Every file beneath each directory becomes a candidate, symlinks
    /// included. Entries are visited in file name order so that the
    /// first-match rule of [`resolve`](Self::resolve) is deterministic;
    /// explicit `files` come before directory contents.
    pub fn from_resources(directories: &[PathBuf], files: &[PathBuf]) -> Result<Self> {
        let mut locations: Vec<PathBuf> = files.to_vec();

        for directory in directories {
            let found = collect_files(directory)?;
            debug!(
                directory = %directory.display(),
                files = found.len(),
                "registered resource directory"
            );
            locations.extend(found);
        }

        Ok(Self::new(locations))
    }

    /// Candidate locations, in match order
    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    /// Map a requested reference onto a candidate location
    ///
    /// Returns the first candidate whose path ends with `reference`, or
    /// `reference` unchanged when no candidate matches.
    pub fn resolve(&self, reference: &str) -> String {
        if reference.is_empty() {
            return String::new();
        }

        match self
            .locations
            .iter()
            .find(|location| location.to_string_lossy().ends_with(reference))
        {
            Some(location) => {
                trace!(reference, resolved = %location.display(), "resolved resource");
                location.to_string_lossy().into_owned()
            }
            None => reference.to_string(),
        }
    }

    /// Map a reference that may already be joined to a base directory
    ///
    /// libxml2 hands external identifiers over joined to the base URL of the
    /// referring document, and `document()` paths are joined to the working
    /// directory. When no candidate ends with the joined reference and it does
    /// not exist locally, the suffix match is retried with ever shorter
    /// trailing parts of the path, down to the bare file name.
    pub fn resolve_joined(&self, reference: &str) -> String {
        let resolved = self.resolve(reference);
        if resolved != reference {
            return resolved;
        }
        let Some(path) = local_path(reference) else {
            return resolved;
        };
        if path.exists() {
            return resolved;
        }

        let parts: Vec<_> = path
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        for start in 0..parts.len() {
            let suffix: PathBuf = parts[start..].iter().collect();
            let suffix = suffix.to_string_lossy();
            let candidate = self.resolve(&suffix);
            if candidate != suffix {
                return candidate;
            }
        }
        resolved
    }

    /// Resolve `reference` and read the resource it points at
    ///
    /// A resource that cannot be opened is reported as
    /// [`ValidationError::ResourceNotFound`].
    pub fn open(&self, reference: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve_joined(reference);
        let path = local_path(&resolved).ok_or_else(|| ValidationError::ResourceNotFound {
            reference: reference.to_string(),
        })?;

        std::fs::read(&path).map_err(|err| {
            debug!(reference, path = %path.display(), error = %err, "resource could not be opened");
            ValidationError::ResourceNotFound {
                reference: reference.to_string(),
            }
        })
    }
}

/// Local file system path for a resolved reference
///
/// `file://` URLs are reduced to their path; other URL schemes have no local
/// path and yield `None`.
pub fn local_path(resolved: &str) -> Option<PathBuf> {
    if let Some(path) = resolved.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if resolved.contains("://") {
        return None;
    }
    Some(PathBuf::from(resolved))
}

fn collect_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(directory)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| ValidationError::FileSystemTraversal {
            path: err
                .path()
                .map_or_else(|| directory.to_path_buf(), Path::to_path_buf),
            reason: err.to_string(),
        })?;
        if entry.file_type().is_file() {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_suffix_match() {
        let resolver = ResourceResolver::new([
            "/opt/resources/codes/currency.xml",
            "/opt/resources/FACTUR-X_EXTENDED_codedb.xml",
        ]);

        assert_eq!(
            resolver.resolve("FACTUR-X_EXTENDED_codedb.xml"),
            "/opt/resources/FACTUR-X_EXTENDED_codedb.xml"
        );
        assert_eq!(
            resolver.resolve("codes/currency.xml"),
            "/opt/resources/codes/currency.xml"
        );
    }

    #[test]
    fn test_resolve_first_candidate_wins() {
        let resolver = ResourceResolver::new(["/a/schema.dtd", "/b/schema.dtd"]);
        assert_eq!(resolver.resolve("schema.dtd"), "/a/schema.dtd");
    }

    #[test]
    fn test_resolve_unknown_reference_passes_through() {
        let resolver = ResourceResolver::new(["/opt/resources/other.xml"]);
        assert_eq!(resolver.resolve("missing.dtd"), "missing.dtd");
        assert_eq!(ResourceResolver::default().resolve("x.xml"), "x.xml");
    }

    #[test]
    fn test_local_path() {
        assert_eq!(
            local_path("file:///tmp/a.xml"),
            Some(PathBuf::from("/tmp/a.xml"))
        );
        assert_eq!(local_path("relative/a.xml"), Some(PathBuf::from("relative/a.xml")));
        assert_eq!(local_path("http://example.com/a.dtd"), None);
    }

    #[test]
    fn test_from_resources_walks_directories() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp_dir.path().join("b.xml"), "<b/>").unwrap();
        std::fs::write(nested.join("a.xml"), "<a/>").unwrap();

        let explicit = PathBuf::from("/explicit/a.xml");
        let resolver =
            ResourceResolver::from_resources(&[temp_dir.path().to_path_buf()], &[explicit.clone()])
                .unwrap();

        assert_eq!(resolver.locations().len(), 3);
        assert_eq!(resolver.locations()[0], explicit);
        assert_eq!(resolver.resolve("a.xml"), "/explicit/a.xml");
        assert!(resolver.resolve("b.xml").ends_with("b.xml"));
        assert_ne!(resolver.resolve("b.xml"), "b.xml");
    }

    #[test]
    fn test_resolve_joined_retries_trailing_parts() {
        let resolver = ResourceResolver::new([
            "/opt/resources/a/codes.xml",
            "/opt/resources/b/codes.xml",
            "/opt/resources/dtd/invoice.dtd",
        ]);

        assert_eq!(
            resolver.resolve_joined("/srv/documents/invoice.dtd"),
            "/opt/resources/dtd/invoice.dtd"
        );
        // The longest matching tail wins.
        assert_eq!(
            resolver.resolve_joined("/srv/work/b/codes.xml"),
            "/opt/resources/b/codes.xml"
        );
        assert_eq!(
            resolver.resolve_joined("file:///srv/documents/invoice.dtd"),
            "/opt/resources/dtd/invoice.dtd"
        );
        assert_eq!(
            resolver.resolve_joined("/srv/documents/unknown.dtd"),
            "/srv/documents/unknown.dtd"
        );
    }

    #[test]
    fn test_resolve_joined_keeps_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("invoice.dtd");
        std::fs::write(&local, "<!ELEMENT invoice ANY>").unwrap();

        let resolver = ResourceResolver::new(["/opt/resources/invoice.dtd"]);
        let reference = local.to_string_lossy();
        assert_eq!(resolver.resolve_joined(&reference), reference);
    }

    #[test]
    fn test_from_resources_orders_by_file_name() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["c.xml", "a.xml", "b.xml"] {
            std::fs::write(temp_dir.path().join(name), "<x/>").unwrap();
        }

        let resolver =
            ResourceResolver::from_resources(&[temp_dir.path().to_path_buf()], &[]).unwrap();
        let names: Vec<_> = resolver
            .locations()
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.xml", "b.xml", "c.xml"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_from_resources_follows_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("shared.dtd");
        std::fs::write(&target, "<!ELEMENT root EMPTY>").unwrap();
        let resources = temp_dir.path().join("resources");
        std::fs::create_dir_all(&resources).unwrap();
        std::os::unix::fs::symlink(&target, resources.join("linked.dtd")).unwrap();

        let resolver = ResourceResolver::from_resources(&[resources], &[]).unwrap();
        assert!(resolver.resolve("linked.dtd").ends_with("resources/linked.dtd"));
    }

    #[test]
    fn test_from_resources_missing_directory() {
        let err = ResourceResolver::from_resources(&[PathBuf::from("/definitely/not/here")], &[])
            .unwrap_err();
        assert!(matches!(err, ValidationError::FileSystemTraversal { .. }));
    }

    #[test]
    fn test_open_missing_resource() {
        let resolver = ResourceResolver::default();
        let err = resolver.open("/definitely/not/here.xml").unwrap_err();
        match err {
            ValidationError::ResourceNotFound { reference } => {
                assert_eq!(reference, "/definitely/not/here.xml")
            }
            other => panic!("Expected ResourceNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_open_resolved_resource() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("codes.xml");
        std::fs::write(&path, "<codes/>").unwrap();

        let resolver = ResourceResolver::new([path]);
        assert_eq!(resolver.open("codes.xml").unwrap(), b"<codes/>");
    }
}
