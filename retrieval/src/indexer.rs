//! Offline repository indexer.
//!
//! Walks a source tree, encodes every supported file, and reconciles the
//! vector index with what is on disk. Re-running over an unchanged tree
//! produces the same cardinality (upsert semantics). A file that fails to
//! encode is logged and skipped; an index-level failure aborts the cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::Serialize;
use tracing::{info, warn};

use crate::encoder::HashEncoder;
use crate::index::{IndexError, VectorIndex};

/// Directory names that are never source material, even when not
/// git-ignored.
const VENDORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "target",
    "__pycache__",
    ".venv",
    "venv",
];

/// Outcome of one indexing cycle.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    /// Files successfully encoded and upserted.
    pub indexed: usize,
    /// Files skipped (unreadable, binary, or encode failure).
    pub skipped: usize,
    /// Index cardinality after the cycle.
    pub cardinality: u64,
}

/// Walks `repo_path` and keeps a [`VectorIndex`] consistent with it.
pub struct RepoIndexer {
    encoder: Arc<HashEncoder>,
    index: Arc<dyn VectorIndex>,
    extensions: Vec<String>,
}

impl RepoIndexer {
    /// `extensions` is the supported set without leading dots, e.g. `["py"]`.
    pub fn new(
        encoder: Arc<HashEncoder>,
        index: Arc<dyn VectorIndex>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            encoder,
            index,
            extensions,
        }
    }

    /// Run one full cycle over `repo_path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] only for index-level failures; per-file
    /// problems are logged and counted in `skipped`.
    pub async fn index(&self, repo_path: &Path) -> Result<IndexReport, IndexError> {
        let mut indexed = 0usize;
        let mut skipped = 0usize;

        for path in self.enumerate(repo_path) {
            let rel = path
                .strip_prefix(repo_path)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            // Binary files fail the UTF-8 read and are skipped.
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %rel, error = %e, "skipping unreadable file");
                    skipped += 1;
                    continue;
                }
            };

            // Encode failures are transient per contract: retry once, then skip.
            let vector = match self
                .encoder
                .encode(&content)
                .or_else(|_| self.encoder.encode(&content))
            {
                Ok(v) => v,
                Err(e) => {
                    warn!(file = %rel, error = %e, "skipping file that failed to encode");
                    skipped += 1;
                    continue;
                }
            };

            self.index.upsert(&rel, &content, vector).await?;
            indexed += 1;
        }

        let cardinality = self.index.count().await?;
        info!(indexed, skipped, cardinality, "index cycle complete");
        Ok(IndexReport {
            indexed,
            skipped,
            cardinality,
        })
    }

    /// Enumerate supported source files under `repo_path`, deterministically
    /// ordered, honoring .gitignore and skipping vendored directories.
    fn enumerate(&self, repo_path: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(repo_path)
            .hidden(true)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !VENDORED_DIRS.contains(&name.as_ref())
            })
            .build();

        let mut files: Vec<PathBuf> = walker
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.into_path())
            .filter(|p| self.supported(p))
            .collect();
        files.sort();
        files
    }

    fn supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|s| s == ext))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryVectorIndex;

    fn fixture() -> (tempfile::TempDir, RepoIndexer, Arc<MemoryVectorIndex>) {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(HashEncoder::with_defaults());
        let index = Arc::new(MemoryVectorIndex::new(encoder.dimension()));
        let indexer = RepoIndexer::new(encoder, index.clone(), vec!["py".into()]);
        (dir, indexer, index)
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_index_counts_supported_files_only() {
        let (dir, indexer, _) = fixture();
        write(dir.path(), "domain/validators.py", "def validate(): pass");
        write(dir.path(), "api/handlers.py", "def handle(): pass");
        write(dir.path(), "README.md", "# readme");

        let report = indexer.index(dir.path()).await.unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.cardinality, 2);
    }

    #[tokio::test]
    async fn test_index_is_idempotent() {
        let (dir, indexer, _) = fixture();
        write(dir.path(), "a.py", "x = 1");
        write(dir.path(), "b.py", "y = 2");

        let first = indexer.index(dir.path()).await.unwrap();
        let second = indexer.index(dir.path()).await.unwrap();
        assert_eq!(first.cardinality, 2);
        assert_eq!(second.cardinality, 2);
    }

    #[tokio::test]
    async fn test_index_skips_vendored_dirs() {
        let (dir, indexer, _) = fixture();
        write(dir.path(), "app.py", "x = 1");
        write(dir.path(), "__pycache__/app.py", "cached");
        write(dir.path(), "node_modules/pkg/setup.py", "vendored");

        let report = indexer.index(dir.path()).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.cardinality, 1);
    }

    #[tokio::test]
    async fn test_index_skips_binary_files() {
        let (dir, indexer, _) = fixture();
        write(dir.path(), "ok.py", "x = 1");
        std::fs::write(dir.path().join("bad.py"), [0xC0u8, 0xFF, 0x00, 0x9F]).unwrap();

        let report = indexer.index(dir.path()).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_index_uses_forward_slash_relative_paths() {
        let (dir, indexer, index) = fixture();
        write(dir.path(), "domain/validators.py", "def validate(): pass");

        indexer.index(dir.path()).await.unwrap();
        assert!(index.get("domain/validators.py").await.unwrap().is_some());
    }
}
