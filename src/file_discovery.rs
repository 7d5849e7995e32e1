use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, ValidationError};

/// Async discovery of the documents to validate
///
/// Files are returned sorted by path so that batch results and reports come
/// out in a stable order regardless of directory iteration order.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include, lower case, without the dot
    extensions: Vec<String>,
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
    /// Maximum directory depth below the root (None = unlimited)
    max_depth: Option<usize>,
    follow_symlinks: bool,
}

/// Statistics about a discovery run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub files_found: usize,
    /// Entries that could not be read and were skipped
    pub errors: usize,
}

#[derive(Default)]
struct Walk {
    files: Vec<PathBuf>,
    errors: usize,
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            include_set: None,
            exclude_set: None,
            max_depth: None,
            follow_symlinks: false,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|extension| extension.trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Only process files matching at least one of `patterns`
    pub fn with_include_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.include_set = build_glob_set(&patterns, "include")?;
        Ok(self)
    }

    /// Never process files matching any of `patterns`
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.exclude_set = build_glob_set(&patterns, "exclude")?;
        Ok(self)
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Discover files under `path` (a file or a directory)
    ///
    /// A missing root is an error; unreadable entries below it are logged
    /// and skipped.
    pub async fn discover_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        Ok(self.walk_root(path).await?.files)
    }

    pub async fn get_discovery_stats(&self, root: &Path) -> Result<DiscoveryStats> {
        let walk = self.walk_root(root).await?;
        Ok(DiscoveryStats {
            files_found: walk.files.len(),
            errors: walk.errors,
        })
    }

    async fn walk_root(&self, path: &Path) -> Result<Walk> {
        let metadata = fs::metadata(path).await?;
        let mut walk = Walk::default();

        if metadata.is_file() {
            if self.should_process(path) {
                walk.files.push(path.to_path_buf());
            }
            return Ok(walk);
        }

        if !metadata.is_dir() {
            return Err(ValidationError::FileSystemTraversal {
                path: path.to_path_buf(),
                reason: "neither a file nor a directory".to_string(),
            });
        }

        self.walk_directory(path, 0, &mut walk).await?;
        walk.files.sort();
        debug!(
            root = %path.display(),
            files = walk.files.len(),
            errors = walk.errors,
            "file discovery finished"
        );
        Ok(walk)
    }

    /// Visit the entries of `directory`, which sits `depth` levels below the root
    fn walk_directory<'a>(
        &'a self,
        directory: &'a Path,
        depth: usize,
        walk: &'a mut Walk,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = fs::read_dir(directory).await?;

            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();

                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(err) => {
                        warn!(path = %entry_path.display(), error = %err, "skipping unreadable entry");
                        walk.errors += 1;
                        continue;
                    }
                };
                if file_type.is_symlink() && !self.follow_symlinks {
                    continue;
                }

                // Follows the link when the entry is a symlink.
                let metadata = match fs::metadata(&entry_path).await {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        warn!(path = %entry_path.display(), error = %err, "skipping unreadable entry");
                        walk.errors += 1;
                        continue;
                    }
                };

                if metadata.is_file() {
                    if self.should_process(&entry_path) {
                        walk.files.push(entry_path);
                    }
                } else if metadata.is_dir() {
                    if self.max_depth.is_some_and(|max_depth| depth >= max_depth) {
                        continue;
                    }
                    if let Err(err) = self.walk_directory(&entry_path, depth + 1, walk).await {
                        warn!(path = %entry_path.display(), error = %err, "skipping unreadable directory");
                        walk.errors += 1;
                    }
                }
            }

            Ok(())
        })
    }

    /// Check a file against the extension list and the glob patterns
    pub fn should_process(&self, path: &Path) -> bool {
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        if !self.extensions.contains(&extension.to_lowercase()) {
            return false;
        }

        if let Some(exclude_set) = &self.exclude_set
            && exclude_set.is_match(path)
        {
            return false;
        }

        match &self.include_set {
            Some(include_set) => include_set.is_match(path),
            None => true,
        }
    }
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

fn build_glob_set(patterns: &[String], kind: &str) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                ValidationError::Config(format!("Invalid glob pattern '{}': {}", pattern, e))
            })?;
        builder.add(glob);
    }

    let set = builder.build().map_err(|e| {
        ValidationError::Config(format!("Failed to build {} glob set: {}", kind, e))
    })?;
    Ok(Some(set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_invoice_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("2024")).await.unwrap();
        fs::create_dir_all(root.join("2025/drafts")).await.unwrap();

        fs::write(root.join("b-invoice.xml"), "<Invoice/>").await.unwrap();
        fs::write(root.join("a-invoice.XML"), "<Invoice/>").await.unwrap();
        fs::write(root.join("notes.txt"), "text").await.unwrap();
        fs::write(root.join("rules.sch"), "<schema/>").await.unwrap();
        fs::write(root.join("2024/march.xml"), "<Invoice/>").await.unwrap();
        fs::write(root.join("2025/drafts/draft.xml"), "<Invoice/>")
            .await
            .unwrap();

        temp_dir
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_discover_sorted() {
        let temp_dir = create_invoice_tree().await;
        let files = FileDiscovery::new()
            .discover_files(temp_dir.path())
            .await
            .unwrap();

        assert_eq!(
            names(&files),
            ["march.xml", "draft.xml", "a-invoice.XML", "b-invoice.xml"]
        );
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
    }

    #[tokio::test]
    async fn test_extensions_are_normalised() {
        let temp_dir = create_invoice_tree().await;
        let files = FileDiscovery::new()
            .with_extensions(vec![".SCH".to_string()])
            .discover_files(temp_dir.path())
            .await
            .unwrap();
        assert_eq!(names(&files), ["rules.sch"]);
    }

    #[tokio::test]
    async fn test_max_depth() {
        let temp_dir = create_invoice_tree().await;
        let files = FileDiscovery::new()
            .with_max_depth(Some(1))
            .discover_files(temp_dir.path())
            .await
            .unwrap();

        let found = names(&files);
        assert_eq!(found.len(), 3);
        assert!(!found.contains(&"draft.xml".to_string()));

        let root_only = FileDiscovery::new()
            .with_max_depth(Some(0))
            .discover_files(temp_dir.path())
            .await
            .unwrap();
        assert_eq!(root_only.len(), 2);
    }

    #[tokio::test]
    async fn test_include_and_exclude_patterns() {
        let temp_dir = create_invoice_tree().await;

        let included = FileDiscovery::new()
            .with_include_patterns(vec!["**/*-invoice.*".to_string()])
            .unwrap()
            .discover_files(temp_dir.path())
            .await
            .unwrap();
        assert_eq!(included.len(), 2);

        let excluded = FileDiscovery::new()
            .with_exclude_patterns(vec!["**/drafts/**".to_string()])
            .unwrap()
            .discover_files(temp_dir.path())
            .await
            .unwrap();
        assert_eq!(excluded.len(), 3);
        assert!(!names(&excluded).contains(&"draft.xml".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_glob() {
        let result = FileDiscovery::new().with_include_patterns(vec!["[".to_string()]);
        assert!(matches!(result, Err(ValidationError::Config(_))));
    }

    #[tokio::test]
    async fn test_single_file_root() {
        let temp_dir = create_invoice_tree().await;
        let file = temp_dir.path().join("b-invoice.xml");

        let files = FileDiscovery::new().discover_files(&file).await.unwrap();
        assert_eq!(files, [file]);

        let text = temp_dir.path().join("notes.txt");
        assert!(FileDiscovery::new().discover_files(&text).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_should_process() {
        let discovery = FileDiscovery::new();
        assert!(discovery.should_process(Path::new("invoice.xml")));
        assert!(discovery.should_process(Path::new("INVOICE.XML")));
        assert!(!discovery.should_process(Path::new("invoice.txt")));
        assert!(!discovery.should_process(Path::new("invoice")));
    }

    #[tokio::test]
    async fn test_discovery_stats() {
        let temp_dir = create_invoice_tree().await;
        let stats = FileDiscovery::new()
            .get_discovery_stats(temp_dir.path())
            .await
            .unwrap();
        assert_eq!(
            stats,
            DiscoveryStats {
                files_found: 4,
                errors: 0
            }
        );
    }

    #[tokio::test]
    async fn test_nonexistent_root() {
        let result = FileDiscovery::new()
            .discover_files(Path::new("/nonexistent/path"))
            .await;
        assert!(matches!(result, Err(ValidationError::Io(_))));
    }
}
