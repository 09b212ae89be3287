//! Postgres-backed vector index.
//!
//! Rows live in the `embeddings` table (unique key on `file_path`, vector
//! stored as `real[]`). Candidate rows are ranked client-side with the same
//! exact cosine kernel as the in-memory index, so top-k results match brute
//! force — the accuracy contract at POC scale (thousands of files).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::index::{rank, EmbeddingRecord, IndexError, SearchHit, VectorIndex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS embeddings (
    id         BIGSERIAL PRIMARY KEY,
    file_path  TEXT NOT NULL UNIQUE,
    content    TEXT NOT NULL,
    vector     REAL[] NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS embeddings_file_path_idx ON embeddings (file_path);
";

/// Vector index over a `tokio-postgres` connection.
pub struct PgVectorIndex {
    client: Arc<Client>,
    dimension: usize,
}

impl PgVectorIndex {
    /// Connect, spawn the connection driver, and ensure the schema exists.
    pub async fn connect(database_url: &str, dimension: usize) -> Result<Self, IndexError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "embeddings connection closed");
            }
        });

        let index = Self {
            client: Arc::new(client),
            dimension,
        };
        index
            .client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;
        info!(dimension, "embeddings schema ready");
        Ok(index)
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
impl VectorIndex for PgVectorIndex {
    async fn upsert(
        &self,
        file_path: &str,
        content: &str,
        vector: Vec<f32>,
    ) -> Result<(), IndexError> {
        self.check_dimension(&vector)?;
        let now = Utc::now();
        self.client
            .execute(
                "INSERT INTO embeddings (file_path, content, vector, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $4)
                 ON CONFLICT (file_path)
                 DO UPDATE SET content = $2, vector = $3, updated_at = $4",
                &[&file_path, &content, &vector, &now],
            )
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, IndexError> {
        self.check_dimension(query)?;
        let rows = self
            .client
            .query(
                "SELECT file_path, content, vector, created_at, updated_at FROM embeddings",
                &[],
            )
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let records = rows.into_iter().map(|row| EmbeddingRecord {
            file_path: row.get(0),
            content: row.get(1),
            vector: row.get(2),
            created_at: row.get(3),
            updated_at: row.get(4),
        });
        Ok(rank(records, query, top_k, threshold))
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM embeddings", &[])
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    async fn get(&self, file_path: &str) -> Result<Option<EmbeddingRecord>, IndexError> {
        let row = self
            .client
            .query_opt(
                "SELECT file_path, content, vector, created_at, updated_at
                 FROM embeddings WHERE file_path = $1",
                &[&file_path],
            )
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        Ok(row.map(|row| EmbeddingRecord {
            file_path: row.get(0),
            content: row.get(1),
            vector: row.get(2),
            created_at: row.get(3),
            updated_at: row.get(4),
        }))
    }
}
