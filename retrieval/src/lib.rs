//! Semantic code retrieval for the norma pipeline.
//!
//! Three pieces, leaves first:
//! - [`encoder`] — deterministic text → fixed-dimension vector.
//! - [`index`] — cosine top-k search over `(file_path, content, vector)`
//!   records, with an in-memory reference implementation and a Postgres
//!   backend in [`pg`].
//! - [`indexer`] — offline walker that keeps an index consistent with a
//!   source tree.

pub mod encoder;
pub mod index;
pub mod indexer;
pub mod pg;

pub use encoder::{EncoderError, HashEncoder};
pub use index::{cosine_score, EmbeddingRecord, IndexError, MemoryVectorIndex, SearchHit, VectorIndex};
pub use indexer::{IndexReport, RepoIndexer};
pub use pg::PgVectorIndex;
