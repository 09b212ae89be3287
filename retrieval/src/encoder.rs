//! Deterministic feature-hashing text encoder.
//!
//! Maps text to a fixed-dimension unit vector without any network access:
//! lowercase alphanumeric tokenization, blake3 token hashing into signed
//! buckets, L2 normalization. The same model identity always produces the
//! same vector for the same input, which is what the retrieval layer needs
//! for reproducible ranking.
//!
//! Model identifiers follow `hash-v1-<dimension>` (default `hash-v1-384`).

use thiserror::Error;

/// Default model identifier, 384-dimension output.
pub const DEFAULT_MODEL: &str = "hash-v1-384";

/// Errors raised by the encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The configured model identifier cannot be loaded. Fatal at startup.
    #[error("cannot load embedding model {0:?}")]
    ModelLoad(String),

    /// Encoding a specific input failed. Transient; callers may retry once.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Feature-hashing encoder with a fixed output dimension.
#[derive(Debug, Clone)]
pub struct HashEncoder {
    model: String,
    dimension: usize,
}

impl HashEncoder {
    /// Build an encoder from a model identifier such as `hash-v1-384`.
    ///
    /// # Errors
    ///
    /// Returns [`EncoderError::ModelLoad`] for unknown identifiers or a zero
    /// dimension.
    pub fn from_model_id(model: &str) -> Result<Self, EncoderError> {
        let dimension = model
            .strip_prefix("hash-v1-")
            .and_then(|d| d.parse::<usize>().ok())
            .ok_or_else(|| EncoderError::ModelLoad(model.to_string()))?;
        if dimension == 0 {
            return Err(EncoderError::ModelLoad(model.to_string()));
        }
        Ok(Self {
            model: model.to_string(),
            dimension,
        })
    }

    /// Encoder with the default model identity.
    pub fn with_defaults() -> Self {
        Self::from_model_id(DEFAULT_MODEL).expect("default model id is valid")
    }

    /// The model identifier this encoder was constructed with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Output dimension, fixed at construction.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encode one text into a unit vector of `dimension()` floats.
    ///
    /// Empty or token-free input encodes to the zero vector rather than an
    /// error so that degenerate queries degrade to "no similarity" instead of
    /// aborting a run.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EncoderError> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let h = u64::from_le_bytes(bytes[..8].try_into().map_err(|_| {
                EncoderError::Encode(format!("short digest for token {token:?}"))
            })?);
            let bucket = (h % self.dimension as u64) as usize;
            // Sign bit from the top of the hash keeps bucket collisions from
            // always reinforcing each other.
            let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    /// Encode a batch of texts, preserving order.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EncoderError> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}

/// Lowercase alphanumeric tokens, ASCII-folded for accents-insensitive
/// matching of Portuguese regulatory text ("validação" and "validacao" hash
/// to the same bucket).
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(fold_ascii)
        .collect()
}

fn fold_ascii(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' => 'a',
            'é' | 'ê' => 'e',
            'í' => 'i',
            'ó' | 'ô' | 'õ' => 'o',
            'ú' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
