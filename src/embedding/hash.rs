//! Feature-hashing embedder.
//!
//! Maps lowercase word unigrams and bigrams into a fixed number of signed
//! buckets using SHA-256, weights by `1 + ln(tf)` and L2-normalizes. Texts
//! sharing vocabulary score higher under cosine similarity. Fully
//! deterministic across platforms and runs.

use sha2::{Digest, Sha256};

use super::{Embedder, EmbeddingError, EmbeddingResult};

/// Default number of buckets.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASH_DIMENSION,
        }
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> EmbeddingResult<Self> {
        if dimension == 0 {
            return Err(EmbeddingError::ModelInit(
                "hash embedder dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut counts = vec![0.0f32; self.dimension];

        let bigrams = tokens.windows(2).map(|w| format!("{} {}", w[0], w[1]));
        for feature in tokens.iter().cloned().chain(bigrams) {
            let (bucket, sign) = self.bucket(&feature);
            counts[bucket] += sign;
        }

        let mut vector: Vec<f32> = counts
            .into_iter()
            .map(|c| {
                if c == 0.0 {
                    0.0
                } else {
                    c.signum() * (1.0 + c.abs().ln())
                }
            })
            .collect();

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let value = u64::from_le_bytes(head);

        let bucket = (value % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
