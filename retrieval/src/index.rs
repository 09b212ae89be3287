//! Vector index contract and in-memory reference implementation.
//!
//! The index stores one record per `file_path` (upsert semantics, so
//! duplicate keys are impossible) and answers top-k cosine queries with a
//! deterministic ordering: score descending, ties broken by `file_path`
//! ascending. Both implementations rank with the same exact kernel, so at
//! POC scale results always match brute force.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// A persisted embedding row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub file_path: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One search result. `score = 1 − cosine_distance`, in `[0, 1]` for
/// non-negative-free unit vectors and clamped by callers that need the
/// closed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_path: String,
    pub content: String,
    pub score: f32,
}

/// Index failures.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The backing store cannot be reached. Surfaced as 503 upstream.
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    /// A vector with the wrong dimension was handed in.
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
}

/// Storage contract for `(file_path, content, vector)` records.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert-or-replace by `file_path`; replacement bumps `updated_at`.
    async fn upsert(&self, file_path: &str, content: &str, vector: Vec<f32>)
        -> Result<(), IndexError>;

    /// Top-k cosine search. Results are strictly ordered by score descending,
    /// ties broken by `file_path` ascending, and filtered to
    /// `score >= threshold`.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, IndexError>;

    /// Number of records currently stored.
    async fn count(&self) -> Result<u64, IndexError>;

    /// Fetch one record by key.
    async fn get(&self, file_path: &str) -> Result<Option<EmbeddingRecord>, IndexError>;
}

/// Cosine similarity (`1 − cosine_distance`) of two equal-length vectors.
///
/// Zero-norm inputs score 0.0 rather than NaN.
pub fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Shared ranking kernel used by every implementation: score, filter, order,
/// truncate. Keeping this in one place is what guarantees deterministic
/// parity between backends.
pub(crate) fn rank(
    records: impl Iterator<Item = EmbeddingRecord>,
    query: &[f32],
    top_k: usize,
    threshold: f32,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = records
        .map(|r| SearchHit {
            score: cosine_score(query, &r.vector),
            file_path: r.file_path,
            content: r.content,
        })
        .filter(|h| h.score >= threshold)
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    hits.truncate(top_k);
    hits
}

/// Exact-scan in-memory index. Reference semantics for tests and for
/// deployments without a database.
pub struct MemoryVectorIndex {
    dimension: usize,
    records: RwLock<HashMap<String, EmbeddingRecord>>,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(
        &self,
        file_path: &str,
        content: &str,
        vector: Vec<f32>,
    ) -> Result<(), IndexError> {
        self.check_dimension(&vector)?;
        let now = Utc::now();
        let mut records = self.records.write().await;
        match records.get_mut(file_path) {
            Some(record) => {
                record.content = content.to_string();
                record.vector = vector;
                record.updated_at = now;
            }
            None => {
                records.insert(
                    file_path.to_string(),
                    EmbeddingRecord {
                        file_path: file_path.to_string(),
                        content: content.to_string(),
                        vector,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, IndexError> {
        self.check_dimension(query)?;
        let records = self.records.read().await;
        Ok(rank(records.values().cloned(), query, top_k, threshold))
    }

    async fn count(&self) -> Result<u64, IndexError> {
        Ok(self.records.read().await.len() as u64)
    }

    async fn get(&self, file_path: &str) -> Result<Option<EmbeddingRecord>, IndexError> {
        Ok(self.records.read().await.get(file_path).cloned())
    }
}
