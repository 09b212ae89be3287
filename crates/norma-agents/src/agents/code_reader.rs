//! CodeReader — semantic retrieval of impacted files.
//!
//! Input: `regulatory_model`. Output: `impacted_files`.
//!
//! The retrieval query is the concatenation of title, description, and
//! requirements (plus the optional configured keyword augmentation). Empty
//! search results are not an error, and an unavailable index degrades to an
//! empty list so the rest of the pipeline still runs. Snippets prefer the
//! file on disk under the repository root; the indexed content is the
//! fallback, and files with neither are dropped.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use retrieval::{HashEncoder, VectorIndex};
use tracing::warn;

use crate::state::{ImpactedFile, SharedState, SNIPPET_MAX_CHARS};

use super::{Agent, AgentError};

pub struct CodeReader {
    encoder: Arc<HashEncoder>,
    index: Arc<dyn VectorIndex>,
    repo_root: PathBuf,
    top_k: usize,
    threshold: f32,
    query_keywords: Vec<String>,
}

impl CodeReader {
    pub fn new(
        encoder: Arc<HashEncoder>,
        index: Arc<dyn VectorIndex>,
        repo_root: PathBuf,
        top_k: usize,
        threshold: f32,
        query_keywords: Vec<String>,
    ) -> Self {
        Self {
            encoder,
            index,
            repo_root,
            top_k,
            threshold,
            query_keywords,
        }
    }

    fn build_query(&self, state: &SharedState) -> Option<String> {
        let model = state.regulatory_model.as_ref()?;
        let mut parts = vec![model.title.clone(), model.description.clone()];
        parts.extend(model.requirements.iter().cloned());
        parts.extend(self.query_keywords.iter().cloned());
        Some(parts.join("\n"))
    }

    /// Disk root for snippet reads: the run's repository when set, the
    /// configured default otherwise.
    fn snippet_root(&self, state: &SharedState) -> PathBuf {
        if state.repo_path.is_empty() {
            self.repo_root.clone()
        } else {
            PathBuf::from(&state.repo_path)
        }
    }

    /// First 200 chars of the file, read from disk with the indexed content
    /// as fallback. `None` drops the file from the results.
    fn snippet(&self, root: &std::path::Path, file_path: &str, indexed_content: &str) -> Option<String> {
        let on_disk = std::fs::read_to_string(root.join(file_path)).ok();
        let source = match on_disk {
            Some(content) => content,
            None => {
                if indexed_content.is_empty() {
                    warn!(file = file_path, "dropping file: unreadable and no indexed content");
                    return None;
                }
                indexed_content.to_string()
            }
        };
        Some(source.chars().take(SNIPPET_MAX_CHARS).collect())
    }
}

#[async_trait]
impl Agent for CodeReader {
    fn name(&self) -> &'static str {
        "CodeReader"
    }

    async fn run(&self, state: &mut SharedState) -> Result<(), AgentError> {
        let Some(query) = self.build_query(state) else {
            return Err(AgentError::new("regulatory model missing"));
        };

        // Encode failures are transient: retry once, then degrade to an
        // empty result set like an unavailable index.
        let vector = match self
            .encoder
            .encode(&query)
            .or_else(|_| self.encoder.encode(&query))
        {
            Ok(v) => v,
            Err(e) => {
                warn!(execution_id = %state.execution_id, error = %e, "query encoding failed, returning no files");
                state.impacted_files = Vec::new();
                return Ok(());
            }
        };

        let hits = match self.index.search(&vector, self.top_k, self.threshold).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(execution_id = %state.execution_id, error = %e, "vector index unavailable, returning no files");
                state.impacted_files = Vec::new();
                return Ok(());
            }
        };

        let root = self.snippet_root(state);
        state.impacted_files = hits
            .into_iter()
            .filter_map(|hit| {
                let snippet = self.snippet(&root, &hit.file_path, &hit.content)?;
                Some(ImpactedFile {
                    file_path: hit.file_path,
                    relevance_score: hit.score.clamp(0.0, 1.0),
                    snippet,
                })
            })
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrieval::{IndexError, MemoryVectorIndex, SearchHit};
    use crate::state::RegulatoryModel;

    fn pix_model() -> RegulatoryModel {
        RegulatoryModel {
            title: "Validação de chaves Pix".into(),
            description: "Regras para validação de chaves".into(),
            requirements: vec!["Validar formato da chave Pix".into()],
            deadlines: vec![],
            affected_systems: vec![],
        }
    }

    fn reader_with(index: Arc<dyn VectorIndex>) -> CodeReader {
        let encoder = Arc::new(HashEncoder::with_defaults());
        CodeReader::new(encoder, index, PathBuf::from("/nonexistent"), 10, 0.0, vec![])
    }

    async fn seeded_index(encoder: &HashEncoder) -> Arc<MemoryVectorIndex> {
        let index = Arc::new(MemoryVectorIndex::new(encoder.dimension()));
        let files = [
            (
                "domain/validators.py",
                "def validate_pix_key(chave): # validação de chave pix\n    return True",
            ),
            (
                "infra/database.py",
                "def connect(): # conexão com o banco de dados\n    pass",
            ),
        ];
        for (path, content) in files {
            index
                .upsert(path, content, encoder.encode(content).unwrap())
                .await
                .unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_finds_semantically_close_files() {
        let encoder = HashEncoder::with_defaults();
        let index = seeded_index(&encoder).await;
        let reader = reader_with(index);

        let mut state = SharedState::new("texto", "repo");
        state.regulatory_model = Some(pix_model());
        reader.run(&mut state).await.unwrap();

        assert!(!state.impacted_files.is_empty());
        assert_eq!(state.impacted_files[0].file_path, "domain/validators.py");
        assert!(state
            .impacted_files
            .windows(2)
            .all(|w| w[0].relevance_score >= w[1].relevance_score));
    }

    #[tokio::test]
    async fn test_snippet_uses_indexed_content_and_truncates() {
        let encoder = HashEncoder::with_defaults();
        let index = Arc::new(MemoryVectorIndex::new(encoder.dimension()));
        let long_content = format!("# validação de chave pix\n{}", "x".repeat(500));
        index
            .upsert(
                "domain/validators.py",
                &long_content,
                encoder.encode(&long_content).unwrap(),
            )
            .await
            .unwrap();
        let reader = reader_with(index);

        let mut state = SharedState::new("texto", "repo");
        state.regulatory_model = Some(pix_model());
        reader.run(&mut state).await.unwrap();

        assert_eq!(state.impacted_files.len(), 1);
        assert_eq!(
            state.impacted_files[0].snippet.chars().count(),
            SNIPPET_MAX_CHARS
        );
    }

    #[tokio::test]
    async fn test_empty_index_yields_empty_list() {
        let encoder = HashEncoder::with_defaults();
        let index = Arc::new(MemoryVectorIndex::new(encoder.dimension()));
        let reader = reader_with(index);

        let mut state = SharedState::new("texto", "repo");
        state.regulatory_model = Some(pix_model());
        reader.run(&mut state).await.unwrap();
        assert!(state.impacted_files.is_empty());
    }

    struct OfflineIndex;

    #[async_trait]
    impl VectorIndex for OfflineIndex {
        async fn upsert(&self, _: &str, _: &str, _: Vec<f32>) -> Result<(), IndexError> {
            Err(IndexError::Unavailable("offline".into()))
        }
        async fn search(
            &self,
            _: &[f32],
            _: usize,
            _: f32,
        ) -> Result<Vec<SearchHit>, IndexError> {
            Err(IndexError::Unavailable("offline".into()))
        }
        async fn count(&self) -> Result<u64, IndexError> {
            Err(IndexError::Unavailable("offline".into()))
        }
        async fn get(&self, _: &str) -> Result<Option<retrieval::EmbeddingRecord>, IndexError> {
            Err(IndexError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_index_degrades_to_empty_list() {
        let reader = reader_with(Arc::new(OfflineIndex));
        let mut state = SharedState::new("texto", "repo");
        state.regulatory_model = Some(pix_model());
        reader.run(&mut state).await.unwrap();
        assert!(state.impacted_files.is_empty());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_missing_model_is_fatal() {
        let encoder = HashEncoder::with_defaults();
        let index = Arc::new(MemoryVectorIndex::new(encoder.dimension()));
        let reader = reader_with(index);
        let mut state = SharedState::new("texto", "repo");
        assert!(reader.run(&mut state).await.is_err());
    }
}
